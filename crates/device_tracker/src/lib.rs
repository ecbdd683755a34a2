pub mod device_tracker;
pub mod domain;
pub mod mqtt;
pub mod websocket;

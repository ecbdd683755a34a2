mod config;
pub(crate) mod subscriber;

pub use config::MqttConfig;
pub use subscriber::run_mqtt_subscriber;

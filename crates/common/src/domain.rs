mod device;
mod in_memory_device_repository;
mod result;

pub use device::*;
pub use in_memory_device_repository::*;
pub use result::*;

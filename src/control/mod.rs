pub mod intent;
pub mod service;

pub use intent::Intent;
pub use service::{BridgeError, DeviceBridge};

pub mod decoder;
pub mod models;
pub mod service;

pub use models::{SensorField, SensorRecord};
pub use service::{Cancellation, InvalidRange, QueryRange, ReaderError, SensorService, TimeSeriesReader};

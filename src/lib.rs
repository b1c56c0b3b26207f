pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod mqtt;
pub mod publisher;
pub mod store;

// Re-export commonly used items
pub use config::{Config, Role};
pub use error::AppError;
pub use store::{Measurement, SampleStore};

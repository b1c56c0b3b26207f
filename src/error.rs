use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("bad payload on {topic}: {reason}")]
    Payload { topic: String, reason: String },
    #[error("service registration failed: {0}")]
    Registration(String),
}

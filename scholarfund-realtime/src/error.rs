use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid realtime endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid reconnect policy: {0}")]
    InvalidPolicy(String),

    #[error("No tokio runtime available to drive reconnect timers")]
    NoRuntime,

    #[error("Broadcaster not started")]
    NotStarted,

    #[error("Broadcaster already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, RealtimeError>;

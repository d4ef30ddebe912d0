use thiserror::Error;

/// The errors of the Cast session adapter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CastError {
    #[error("failed to establish connection with Cast device, {0}")]
    Connection(String),
    #[error("failed to send Cast device heartbeat, {0}")]
    Heartbeat(String),
    #[error("the cast channel is not connected")]
    NotConnected,
    #[error("no media is loaded to skip an ad on")]
    NoMediaSkipad,
}

/// A specialized `Result` type for Cast session operations.
pub type Result<T> = std::result::Result<T, CastError>;

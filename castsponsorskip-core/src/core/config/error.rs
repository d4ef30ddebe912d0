use thiserror::Error;

/// The errors that can occur while loading the application configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to load config file {0}, {1}")]
    InvalidFile(String, String),
    #[error("failed to parse {0}, {1}")]
    InvalidValue(String, String),
    #[error("failed to parse IP from device address {0}")]
    InvalidIP(String),
    #[error("failed to resolve network interface {0}")]
    UnknownInterface(String),
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

//! Error types shared across MDP crates

use thiserror::Error;

/// Result type alias for MDP operations
pub type Result<T> = std::result::Result<T, MdpError>;

/// Errors raised while setting up the process (configuration, logging, files)
#[derive(Error, Debug)]
pub enum MdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl MdpError {
    /// Build a configuration error for an environment variable with a bad value
    pub fn invalid_var(name: &str, value: &str, expected: &str) -> Self {
        Self::Config(format!("{name}={value:?} is invalid, expected {expected}"))
    }
}

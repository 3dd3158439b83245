//! Error types for Subflow

use thiserror::Error;

/// Main error type for Subflow
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Component already registered: {0}")]
    DuplicateComponent(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Cross-pool dial: {0}")]
    CrossPool(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

impl Error {
    /// Errors in this class are fatal at startup and must never be
    /// produced once the serving phase has begun.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::DuplicateComponent(_)
                | Error::UnknownComponent(_)
                | Error::CrossPool(_)
        )
    }
}

/// Result type alias for Subflow
pub type Result<T> = std::result::Result<T, Error>;

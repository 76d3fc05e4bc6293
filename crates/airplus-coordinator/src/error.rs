//! Coordinator error types.

use thiserror::Error;

/// Coordinator error type.
#[derive(Error, Debug)]
pub enum CoordError {
    /// Authentication could not be initialized
    #[error("Failed to initialize authentication")]
    AuthFailed,

    /// Broker connection could not be established during setup
    #[error("Failed to connect to broker: {0}")]
    ConnectFailed(String),
}

/// Result type alias using CoordError.
pub type CoordResult<T> = Result<T, CoordError>;

//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// MQTT packet codec error
    #[error("Packet error: {0}")]
    Packet(#[from] crate::packet::PacketError),

    /// Broker refused the connection
    #[error("Connection refused by broker: return code {0}")]
    ConnectionRefused(u8),

    /// Connection attempt timed out
    #[error("Connect timed out")]
    Timeout,

    /// Credential material not representable as a header value
    #[error("Invalid header value for {0}")]
    Header(&'static str),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

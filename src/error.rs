//! Error types for filegate-client

use thiserror::Error;

/// Errors surfaced by the gateway client.
///
/// Every failed call settles with exactly one of these; the variants map
/// one-to-one onto the terminal states of a call.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A call was attempted while the client had no live connection.
    #[error("Connection not established")]
    ConnectionNotEstablished,

    /// The gateway refused the authenticate handshake (bad or expired token).
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// No terminal message arrived within the configured duration.
    #[error("Request timed out")]
    Timeout,

    /// The caller cancelled the call before it settled.
    #[error("Call cancelled")]
    Cancelled,

    /// The connection was torn down while the call was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The gateway reported a failure for this call.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The terminal payload did not match the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Channel-level failure (dial, send, or receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

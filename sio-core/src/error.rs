//! Global error types for the multiplexed socket client.
//!
//! All error categories across `sio-client` and `sio-protocol` are unified
//! into a single `SioError` enum, the same way the rest of the stack leans
//! on one `thiserror` enum instead of per-module error types.

use thiserror::Error;

/// Convenience type alias for Results using SioError.
pub type SioResult<T> = Result<T, SioError>;

/// Unified error type covering all error categories in the client stack.
#[derive(Error, Debug)]
pub enum SioError {
    /// The engine transport reported an error (connect failure, socket reset, ...).
    #[error("engine error: {0}")]
    Engine(String),

    /// The engine transport closed or failed to open before the manager's
    /// connect timeout elapsed.
    #[error("connect timeout: {0}")]
    Timeout(String),

    /// A wire frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A server-sent ERROR packet (middleware rejection, auth failure, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Caller attempted to emit a reserved event name.
    #[error("\"{0}\" is a reserved event name")]
    ReservedEvent(String),

    /// Underlying I/O failure (log file setup, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

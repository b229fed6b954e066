//! Error types for beanwire.

use thiserror::Error;

use crate::wire::RemoteFailure;

/// Main error type for all beanwire operations.
#[derive(Debug, Error)]
pub enum BeanwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal framing or codec error (structurally invalid bytes).
    ///
    /// This is terminal for the connection. An "insufficient bytes"
    /// condition never surfaces here; the decoder retries it silently.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation code not present in the catalog.
    #[error("unknown operation code: {0}")]
    UnknownOperation(u8),

    /// Configuration error (bad connector URL, duplicate codec tag, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// Invocation failure carried back from the remote registry.
    ///
    /// Delivered through correlation like any other result, then
    /// re-raised to the caller instead of a value.
    #[error("remote invocation failed: {0}")]
    Remote(RemoteFailure),

    /// Synchronous call did not receive its response in time.
    #[error("request timed out")]
    Timeout,

    /// Connection closed while the operation was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Structural-fallback encode error (MsgPack).
    #[error("structural encode error: {0}")]
    StructuralEncode(#[from] rmp_serde::encode::Error),

    /// Structural-fallback decode error (MsgPack).
    #[error("structural decode error: {0}")]
    StructuralDecode(#[from] rmp_serde::decode::Error),
}

/// Result type alias using BeanwireError.
pub type Result<T> = std::result::Result<T, BeanwireError>;

//! Error types for the audit crate.

use thiserror::Error;

/// Errors raised while persisting decisions.
///
/// These never reach the query path: sinks log them and move on.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or write the audit file.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The background writer is gone.
    #[error("audit channel closed")]
    ChannelClosed,
}

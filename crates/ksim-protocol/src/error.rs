//! Error types crossing the collaborator boundaries.

use thiserror::Error;

/// Failure reported by an extension while handling an event.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension rejected event: {0}")]
    Rejected(String),
    #[error("extension failed: {0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a remote power transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid target address: {0}")]
    InvalidTarget(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fault level: {0}")]
pub struct LevelParseError(pub String);

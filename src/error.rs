use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LarderError>;

/// Errors surfaced by the store, its indexes and the free-space tree.
///
/// Every variant is a recoverable result; nothing here aborts the process.
/// `Corruption` should nevertheless be treated as fatal for the current
/// session: once an internal invariant has been violated the structure's
/// state can no longer be trusted.
#[derive(Debug, Error)]
pub enum LarderError {
    /// Underlying storage read/write/flush failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Creation of something that is already there (store files, index names).
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// Missing key, index name or indexed value.
    #[error("{0} not found")]
    NotFound(String),
    /// Insert with a key already present, or a unique-index collision.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// Violated internal invariant or malformed on-disk frame.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Codec failed to encode or decode a value.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Caller passed an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

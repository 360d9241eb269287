//! Error handling for swap map operations.
//!
//! All public APIs return [`Result<T>`], an alias over [`SwapError`].
//! The variants map directly onto the failure modes of the system:
//! construction collisions, missing keys, unencodable payloads, and
//! damaged backing files.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for swap map operations.
pub type Result<T> = std::result::Result<T, SwapError>;

/// Errors that can occur while operating on a swap map.
#[derive(Debug, Error)]
pub enum SwapError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A backing file with the requested base name already exists and
    /// the caller did not ask for it to be replaced. Fatal at
    /// construction; never retried internally.
    #[error("backing file already exists: {}", .0.display())]
    FileCollision(PathBuf),

    /// `get` or `delete` of a key that is absent from the backing file,
    /// including a hashed key that was never recorded in the key index.
    /// Recoverable; the caller decides whether to insert or ignore.
    #[error("key not found")]
    KeyNotFound,

    /// A key or value could not be encoded for the backing format, or a
    /// stored payload no longer decodes as the requested type.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing file envelope is damaged: bad magic, unsupported
    /// version, truncated payload, or checksum mismatch.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Invalid argument or operation, such as touching a map after
    /// `close()`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

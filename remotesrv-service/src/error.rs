use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the chunk storage layer.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk hash that is empty, too long, or contains invalid characters.
    #[error("invalid chunk hash `{0}`")]
    InvalidHash(String),

    /// A repository identifier that resolves outside of the filesystem root.
    #[error("path `{0}` escapes the filesystem root")]
    PathEscapesRoot(String),

    /// A store file that exists but cannot be decoded.
    #[error("corrupt store file {path}")]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// The decoding error.
        #[source]
        cause: serde_json::Error,
    },

    /// A commit referencing a root chunk that was never uploaded.
    #[error("cannot commit to missing chunk {0}")]
    MissingChunk(String),
}

/// Result type for storage operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

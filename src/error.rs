//! Error types shared across the ring, DHT, and file engine layers.
//!
//! Every fallible operation in the crate returns [`DfsResult`]. Transport
//! failures while forwarding ring messages surface as [`DfsError::Routing`];
//! decryption and descriptor-parse failures surface as
//! [`DfsError::MalformedDescriptor`]. Nothing here retries — callers decide.

use thiserror::Error;

/// Error taxonomy of the core.
#[derive(Debug, Error)]
pub enum DfsError {
    /// Local storage failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The DHT returned absence for a required key.
    #[error("no reference to {0}")]
    NoReference(String),

    /// A descriptor block was fetched and decrypted but cannot be parsed.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// Operation not valid in the file's open mode (including the
    /// unsupported seek/tell/truncate family).
    #[error("bad mode: {0}")]
    BadMode(String),

    /// A directory entry is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation on a closed file or directory.
    #[error("closed")]
    Closed,

    /// Transport failure while forwarding a ring message.
    #[error("routing error: {0}")]
    Routing(String),

    /// A part referenced by the descriptor chain is absent at read time.
    #[error("incomplete read: missing part {0}")]
    IncompleteRead(String),

    /// A peer sent a frame we cannot decode, or replied with an error.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Invalid or unusable configuration (bad key encoding, bad block size).
    #[error("configuration error: {0}")]
    Config(String),

    /// Opt-in content hash verification failed.
    #[error("integrity check failed: {0}")]
    Integrity(String),
}

impl From<std::io::Error> for DfsError {
    fn from(error: std::io::Error) -> Self {
        DfsError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for DfsError {
    fn from(error: serde_json::Error) -> Self {
        DfsError::Rpc(format!("bad frame: {}", error))
    }
}

/// Result type alias for DFS operations.
pub type DfsResult<T> = Result<T, DfsError>;

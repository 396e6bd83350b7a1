//! Error types for the VPK crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when working with VPK archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural decode or encode error.
    #[error("{0}")]
    Binary(#[from] nohats_binary::Error),

    /// The archive path does not name a `_dir.vpk` file.
    #[error("not a VPK directory file: {0}")]
    NotDirectoryFile(PathBuf),

    /// A data archive referenced by the index is missing.
    #[error("archive file not found: {0}")]
    ArchiveNotFound(PathBuf),

    /// Entry data extends past the end of its archive file.
    #[error("{path}: needs {needed} bytes at offset {offset}, archive has {available}")]
    Truncated {
        path: String,
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// Entry data does not match the CRC stored in the index.
    #[error("CRC mismatch for {path}: index says {expected:#010x}, data is {actual:#010x}")]
    CrcMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Invalid glob pattern.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Result type for VPK operations.
pub type Result<T> = std::result::Result<T, Error>;

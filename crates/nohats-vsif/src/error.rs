//! Error types for the VSIF crate.

use thiserror::Error;

/// Errors that can occur when working with scene images.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural decode or encode error.
    #[error("{0}")]
    Binary(#[from] nohats_binary::Error),

    /// No scene at this position.
    #[error("scene {index} out of range ({count} scenes)")]
    SceneOutOfRange { index: usize, count: usize },
}

/// Result type for VSIF operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the MDL crate.

use thiserror::Error;

/// Errors that can occur when working with model files.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural decode or encode error.
    #[error("{0}")]
    Binary(#[from] nohats_binary::Error),

    /// No local sequence at this position.
    #[error("sequence {index} out of range ({count} sequences)")]
    SequenceOutOfRange { index: usize, count: usize },

    /// No skin family at this position.
    #[error("skin family {index} out of range ({count} families)")]
    SkinFamilyOutOfRange { index: usize, count: usize },

    /// Text to append contains a NUL byte.
    #[error("string contains NUL: {0:?}")]
    EmbeddedNul(String),
}

/// Result type for MDL operations.
pub type Result<T> = std::result::Result<T, Error>;

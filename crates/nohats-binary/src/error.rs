//! Error types for nohats-binary.

use thiserror::Error;

/// Errors raised while decoding or encoding a field tree.
///
/// Every variant aborts the current decode or encode call. Nothing in the
/// framework downgrades one of these to a warning or returns a partial result.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer bytes were available than a read required.
    #[error("unexpected end of stream: needed {needed} bytes but only {available} available")]
    EndOfStream { needed: usize, available: usize },

    /// A magic constant or version field did not match its expected literal.
    #[error("{what} mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    /// An index referenced a position outside its backing table.
    #[error("index {index} out of bounds for table of length {len}")]
    LookupFailure { index: u64, len: usize },

    /// The caller supplied a value the schema cannot encode.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The fixed-point solver did not stabilize.
    #[error("encoding did not converge after {passes} passes")]
    NonConvergence { passes: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Compression error.
    #[error("compression error: {0}")]
    Compression(String),
}

impl Error {
    /// Build a [`Error::ContractViolation`] from anything printable.
    pub fn contract(message: impl Into<String>) -> Self {
        Error::ContractViolation(message.into())
    }

    /// Build a [`Error::FormatMismatch`] from debug-printable values.
    pub fn mismatch(
        what: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Error::FormatMismatch {
            what: what.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

/// Result type alias using the framework Error type.
pub type Result<T> = std::result::Result<T, Error>;

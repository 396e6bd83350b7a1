//! Error types for the VDF crate.

use thiserror::Error;

/// Errors that can occur when reading or writing KeyValues text.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Unexpected character.
    #[error("line {line}: expected {expected}, got {found:?} in {context}")]
    Unexpected {
        line: usize,
        expected: &'static str,
        found: char,
        context: String,
    },

    /// Input ended inside a string or block.
    #[error("line {line}: unexpected end of input in {context}")]
    UnexpectedEof { line: usize, context: String },
}

/// Result type for VDF operations.
pub type Result<T> = std::result::Result<T, Error>;

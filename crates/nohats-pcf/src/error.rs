//! Error types for the PCF crate.

use thiserror::Error;

/// Errors that can occur when working with particle files.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural decode or encode error.
    #[error("{0}")]
    Binary(#[from] nohats_binary::Error),

    /// Header names a DMX encoding other than binary 2 or binary 5.
    #[error("unsupported PCF version: {0:?}")]
    UnsupportedVersion(String),

    /// Invalid GUID text.
    #[error("invalid GUID format: {0}")]
    InvalidGuid(String),

    /// No element with this GUID in the file or its pool.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// No particle system definition with this name.
    #[error("particle system not found: {0}")]
    SystemNotFound(String),

    /// The file was decoded without attribute lists.
    #[error("attribute lists were not decoded")]
    NoAttributes,
}

/// Result type for PCF operations.
pub type Result<T> = std::result::Result<T, Error>;

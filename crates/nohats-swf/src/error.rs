//! Error types for the SWF crate.

use thiserror::Error;

/// Errors that can occur when working with ScaleForm files.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural decode or encode error.
    #[error("{0}")]
    Binary(#[from] nohats_binary::Error),

    /// No ABC instance with this name.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The instance has no method trait with this name.
    #[error("method {method} not found on {instance}")]
    MethodNotFound { instance: String, method: String },

    /// The method has no body (native or interface method).
    #[error("no method body for method {0}")]
    MethodBodyNotFound(u64),

    /// Bytecode patch pattern did not occur in the method body.
    #[error("pattern not found in {0}")]
    PatternNotFound(String),

    /// Bytecode patches must keep the body length.
    #[error("replacement is {replace} bytes, pattern is {find}")]
    LengthMismatch { find: usize, replace: usize },
}

/// Result type for SWF operations.
pub type Result<T> = std::result::Result<T, Error>;

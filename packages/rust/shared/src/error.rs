//! Error types for regenrich.
//!
//! Library crates use [`EnrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all regenrich operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Source spreadsheet missing, unreadable, or without the identifier column.
    #[error("input error: {message}")]
    Input { message: String },

    /// A value failed identifier shape validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Cache database connection, read, or write failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Network failure or malformed registry response for one chunk.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// A lookup was issued with zero identifiers.
    #[error("lookup called with an empty chunk")]
    EmptyInput,

    /// The final report could not be written.
    #[error("output error: {message}")]
    Output { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichError>;

impl EnrichError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an input error from any displayable message.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an output error from any displayable message.
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

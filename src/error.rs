//! Unified error types for chatlens.
//!
//! This module provides a single [`ChatlensError`] enum that covers all error
//! cases in the library. This design follows the pattern used by popular crates
//! like `reqwest`, `serde_json`, and `rusqlite`.
//!
//! # Error Handling Philosophy
//!
//! - **Library users** get typed errors they can match on
//! - **Application users** get clear, actionable error messages
//! - **Developers** get source error chains for debugging
//!
//! Record-level parse failures are deliberately *not* represented here: a
//! malformed line or JSON record is counted and skipped during import, never
//! raised. Only structural failures (unreadable header, truncated top-level
//! JSON, wrong encoding) become [`ChatlensError::Parse`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized [`Result`] type for chatlens operations.
pub type Result<T> = std::result::Result<T, ChatlensError>;

/// The error type for all chatlens operations.
///
/// Each variant contains context about what went wrong and, where applicable,
/// the underlying source error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChatlensError {
    /// An I/O error occurred.
    ///
    /// This typically happens when:
    /// - The input file doesn't exist
    /// - Permission denied
    /// - Disk is full (when writing the corpus database)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The sniffer found no parser descriptor matching the file.
    #[error("Unknown format: no parser matched {}", path.display())]
    UnknownFormat {
        /// The file that could not be identified
        path: PathBuf,
    },

    /// The format was identified but the file is malformed at a level that
    /// prevents progress.
    #[error("Failed to parse {format} export{}: {source}", path.as_ref().map(|p| format!(" (file: {})", p.display())).unwrap_or_default())]
    Parse {
        /// The format being parsed (e.g., "LINE TXT", "WeChat JSON")
        format: &'static str,
        /// The underlying structural error
        #[source]
        source: ParseErrorKind,
        /// The file path, if available
        path: Option<PathBuf>,
    },

    /// Database error from the embedded store.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store cannot be opened safely: schema version from the future or
    /// a failed migration. Fatal on open.
    #[error("Store integrity error: {message}")]
    StoreIntegrity {
        /// Description of the integrity violation
        message: String,
    },

    /// A SQL-lab statement was rejected by the read-only guardrail.
    #[error("SQL rejected: {message}")]
    RejectedSql {
        /// Why the statement was rejected
        message: String,
    },

    /// JSON parsing/serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single record exceeded the maximum allowed size.
    #[error("Record too large: {actual_size} bytes (maximum: {max_size} bytes)")]
    RecordTooLarge {
        /// Maximum allowed size in bytes
        max_size: usize,
        /// Actual size encountered
        actual_size: usize,
    },

    /// The file ended before parsing was complete.
    #[error("Unexpected end of file while {context}")]
    UnexpectedEof {
        /// Context about what was being parsed
        context: String,
    },

    /// Cooperative cancellation completed.
    #[error("Operation canceled")]
    Canceled,

    /// An analytics deadline was exceeded.
    #[error("Operation timed out")]
    Timeout,

    /// Unrecoverable bug. Fatal to the job, not the process.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Kinds of structural parse errors.
#[derive(Debug, Error)]
pub enum ParseErrorKind {
    /// JSON parsing error
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The file head doesn't match the expected structure
    #[error("{0}")]
    Header(String),
    /// Generic structural error
    #[error("{0}")]
    Other(String),
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl ChatlensError {
    /// Creates an unknown-format error for the given path.
    pub fn unknown_format(path: impl Into<PathBuf>) -> Self {
        ChatlensError::UnknownFormat { path: path.into() }
    }

    /// Creates a structural parse error from a JSON source.
    pub fn parse_json(
        format: &'static str,
        source: serde_json::Error,
        path: Option<PathBuf>,
    ) -> Self {
        ChatlensError::Parse {
            format,
            source: ParseErrorKind::Json(source),
            path,
        }
    }

    /// Creates a structural parse error for a bad file header.
    pub fn parse_header(
        format: &'static str,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        ChatlensError::Parse {
            format,
            source: ParseErrorKind::Header(message.into()),
            path,
        }
    }

    /// Creates a generic structural parse error.
    pub fn parse_other(
        format: &'static str,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        ChatlensError::Parse {
            format,
            source: ParseErrorKind::Other(message.into()),
            path,
        }
    }

    /// Creates a store-integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        ChatlensError::StoreIntegrity {
            message: message.into(),
        }
    }

    /// Creates a rejected-SQL error.
    pub fn rejected_sql(message: impl Into<String>) -> Self {
        ChatlensError::RejectedSql {
            message: message.into(),
        }
    }

    /// Creates a record-too-large error.
    pub fn record_too_large(max_size: usize, actual_size: usize) -> Self {
        ChatlensError::RecordTooLarge {
            max_size,
            actual_size,
        }
    }

    /// Creates an unexpected EOF error.
    pub fn unexpected_eof(context: impl Into<String>) -> Self {
        ChatlensError::UnexpectedEof {
            context: context.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ChatlensError::Internal(message.into())
    }

    /// Returns `true` if this is an IO error.
    pub fn is_io(&self) -> bool {
        matches!(self, ChatlensError::Io(_))
    }

    /// Returns `true` if this is an unknown-format error.
    pub fn is_unknown_format(&self) -> bool {
        matches!(self, ChatlensError::UnknownFormat { .. })
    }

    /// Returns `true` if this is a structural parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self, ChatlensError::Parse { .. })
    }

    /// Returns `true` if this is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ChatlensError::Canceled)
    }

    /// Returns `true` if this is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChatlensError::Timeout)
    }

    /// Returns `true` if this error must terminate the worker that hit it.
    ///
    /// Only `Internal` and `StoreIntegrity` are worker-fatal; every other
    /// kind surfaces as a typed job result.
    pub fn is_worker_fatal(&self) -> bool {
        matches!(
            self,
            ChatlensError::Internal(_) | ChatlensError::StoreIntegrity { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = ChatlensError::from(io_err);
        let display = err.to_string();
        assert!(display.contains("IO error"));
        assert!(display.contains("file not found"));
    }

    #[test]
    fn test_parse_error_with_path() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = ChatlensError::parse_json(
            "WeChat JSON",
            json_err,
            Some(PathBuf::from("/path/to/file.json")),
        );
        let display = err.to_string();
        assert!(display.contains("WeChat JSON"));
        assert!(display.contains("/path/to/file.json"));
    }

    #[test]
    fn test_unknown_format_display() {
        let err = ChatlensError::unknown_format("/tmp/mystery.dat");
        let display = err.to_string();
        assert!(display.contains("mystery.dat"));
        assert!(err.is_unknown_format());
    }

    #[test]
    fn test_record_too_large_display() {
        let err = ChatlensError::record_too_large(1024, 2048);
        let display = err.to_string();
        assert!(display.contains("2048"));
        assert!(display.contains("1024"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = ChatlensError::from(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_is_methods() {
        let io_err = ChatlensError::Io(io::Error::new(io::ErrorKind::NotFound, ""));
        assert!(io_err.is_io());
        assert!(!io_err.is_parse());

        assert!(ChatlensError::Canceled.is_canceled());
        assert!(ChatlensError::Timeout.is_timeout());
        assert!(!ChatlensError::Timeout.is_canceled());
    }

    #[test]
    fn test_worker_fatal_classification() {
        assert!(ChatlensError::internal("bug").is_worker_fatal());
        assert!(ChatlensError::integrity("schema from the future").is_worker_fatal());
        assert!(!ChatlensError::Canceled.is_worker_fatal());
        assert!(!ChatlensError::rejected_sql("not a SELECT").is_worker_fatal());
    }

    #[test]
    fn test_convenience_constructors() {
        let err = ChatlensError::parse_header("QQ TXT", "missing 消息对象 header", None);
        assert!(err.is_parse());
        assert!(err.to_string().contains("QQ TXT"));

        let err = ChatlensError::unexpected_eof("reading message array");
        assert!(err.to_string().contains("reading message array"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<i32> {
            Err(ChatlensError::Canceled)
        }
        assert!(returns_error().is_err());
    }
}

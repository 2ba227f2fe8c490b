//! Progress reporting for imports and other long-running operations.
//!
//! The import coordinator pushes [`ImportProgress`] snapshots to a
//! [`ProgressCallback`] at least every 1000 messages or every 250 ms,
//! whichever comes first. Library users who don't care pass
//! [`no_progress`].
//!
//! # Example
//!
//! ```rust
//! use chatlens::progress::{ImportPhase, ImportProgress, ProgressCallback};
//! use std::sync::Arc;
//!
//! let callback: ProgressCallback = Arc::new(|progress| {
//!     if let Some(pct) = progress.percentage() {
//!         println!("{:?}: {:.1}%", progress.phase, pct);
//!     }
//! });
//!
//! callback(ImportProgress::new(ImportPhase::Parsing, 512, Some(1024), 10));
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Phase of an import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    Sniffing,
    Parsing,
    Writing,
    Done,
}

/// A progress snapshot from an import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Current pipeline phase
    pub phase: ImportPhase,

    /// Bytes consumed from the source file so far
    pub bytes_processed: u64,

    /// Total file size, if known
    pub total_bytes: Option<u64>,

    /// Messages that have passed normalization so far
    pub messages_processed: u64,

    /// Optional human-oriented note ("binding replies", …)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub note: Option<String>,
}

impl ImportProgress {
    pub fn new(
        phase: ImportPhase,
        bytes_processed: u64,
        total_bytes: Option<u64>,
        messages_processed: u64,
    ) -> Self {
        Self {
            phase,
            bytes_processed,
            total_bytes,
            messages_processed,
            note: None,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Returns the progress as a percentage (0.0 - 100.0), if total bytes is
    /// known.
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_processed as f64 / total as f64) * 100.0
            }
        })
    }

    /// Returns whether the import has reached the terminal phase.
    pub fn is_done(&self) -> bool {
        self.phase == ImportPhase::Done
    }
}

/// Callback type for receiving progress updates.
///
/// Thread-safe; the import worker invokes it from its own thread.
pub type ProgressCallback = Arc<dyn Fn(ImportProgress) + Send + Sync>;

/// Creates a no-op progress callback.
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Creates a progress callback that prints to stderr.
///
/// Useful for CLI applications that want simple progress output.
pub fn stderr_progress() -> ProgressCallback {
    Arc::new(|progress| {
        if let Some(pct) = progress.percentage() {
            eprintln!(
                "{:?}: {:.1}% ({} messages)",
                progress.phase, pct, progress.messages_processed
            );
        }
    })
}

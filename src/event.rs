//! The tagged parser event stream and parse options.
//!
//! Every parser, regardless of source format, yields the same finite
//! sequence of [`ParseEvent`]s:
//!
//! 1. exactly one [`ParseEvent::Meta`],
//! 2. exactly one [`ParseEvent::Members`] (possibly empty),
//! 3. zero or more [`ParseEvent::Messages`] batches of at most
//!    `batch_size` messages,
//! 4. [`ParseEvent::Progress`] interleaved at a bounded rate,
//! 5. exactly one terminal [`ParseEvent::Done`].
//!
//! Errors terminate the stream through the iterator's `Err` item. The
//! consumer (the import coordinator) relies on this ordering contract, not
//! on any parser-specific behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{ChatMeta, MemberRecord, RawMessage};

/// Default number of messages per `Messages` batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of messages between `Progress` events.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

/// Default maximum size of a single record in bytes.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

/// One event in a parse stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Chat-level metadata; always the first event.
    Meta(ChatMeta),

    /// The roster, emitted once after `Meta`. Empty when the format carries
    /// no roster and members are inferred from messages.
    Members(Vec<MemberRecord>),

    /// A bounded batch of parsed messages.
    Messages(Vec<RawMessage>),

    /// Byte-level progress, interleaved at a bounded rate.
    Progress(StreamProgress),

    /// Terminal event carrying final counts.
    Done {
        message_count: u64,
        member_count: u64,
    },
}

/// Byte-level progress snapshot from a parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProgress {
    /// Bytes consumed from the source file so far
    pub bytes_processed: u64,

    /// Total file size, if known
    pub total_bytes: Option<u64>,

    /// Messages emitted so far
    pub messages_processed: u64,
}

impl StreamProgress {
    pub fn new(bytes_processed: u64, total_bytes: Option<u64>, messages_processed: u64) -> Self {
        Self {
            bytes_processed,
            total_bytes,
            messages_processed,
        }
    }

    /// Returns the progress as a percentage (0.0 - 100.0), if the total is
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
}

/// Cooperative cancellation token.
///
/// Cloned freely; all clones observe the same flag. Parsers and the import
/// coordinator check it at batch boundaries; analytics jobs at row
/// checkpoints. There is no preemption.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Options controlling a single parse run.
///
/// # Example
///
/// ```rust
/// use chatlens::event::ParseOptions;
///
/// let options = ParseOptions::new()
///     .with_batch_size(200)
///     .with_tz_offset_secs(9 * 3600); // JST
/// assert_eq!(options.batch_size, 200);
/// ```
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Maximum messages per `Messages` batch (default: 500)
    pub batch_size: usize,

    /// Messages between `Progress` events (default: 1000)
    pub progress_interval: usize,

    /// Fixed UTC offset in seconds applied to wall-clock timestamps.
    /// `None` means the host local zone at parse time.
    pub tz_offset_secs: Option<i32>,

    /// Maximum size of a single record in bytes (default: 10MB)
    pub max_record_size: usize,

    /// Cooperative cancellation token checked at batch boundaries
    pub cancel: CancelToken,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            tz_offset_secs: None,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            cancel: CancelToken::new(),
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn with_tz_offset_secs(mut self, offset: i32) -> Self {
        self.tz_offset_secs = Some(offset);
        self
    }

    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resolves the effective offset: the explicit override, or the host
    /// local zone.
    pub fn effective_tz_offset(&self) -> i32 {
        use chrono::Offset;
        self.tz_offset_secs.unwrap_or_else(|| {
            chrono::Local::now().offset().fix().local_minus_utc()
        })
    }
}

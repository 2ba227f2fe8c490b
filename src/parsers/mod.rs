//! Chat export parsers, one per supported format.
//!
//! Every parser exposes the same operation: given a path and
//! [`ParseOptions`], produce a finite lazy [`EventStream`] obeying the
//! ordering contract in [`crate::event`]. Parsers are streaming — memory
//! used is O(batch size + open-file buffers), independent of file size.
//! Line-oriented parsers read forward once; JSON parsers use incremental
//! readers.
//!
//! The parser set is closed and known at build time, so dispatch is a
//! plain match over descriptor ids rather than an open registry.

mod chatlab;
mod json;
mod line;
mod qq;
mod wechat;

pub use chatlab::ChatLabParser;
pub use line::LineParser;
pub use qq::QqParser;
pub use wechat::WeChatParser;

use std::path::Path;

use crate::error::Result;
use crate::event::{ParseEvent, ParseOptions};

/// A finite lazy sequence of parse events with byte-level progress.
pub trait EventStream: Iterator<Item = Result<ParseEvent>> + Send {
    /// Bytes consumed from the source so far.
    fn bytes_processed(&self) -> u64;

    /// Total source size, if known.
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// Records that could not be parsed and were skipped (never fatal).
    fn records_skipped(&self) -> u64 {
        0
    }
}

/// A parser for one export format.
pub trait FormatParser: Send + Sync {
    /// The descriptor id this parser implements (e.g. `"line-txt"`).
    fn id(&self) -> &'static str;

    /// Opens a file and returns the event stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is
    /// structurally invalid. Record-level problems surface later as
    /// skipped-record counts, not errors.
    fn parse(&self, path: &Path, options: &ParseOptions) -> Result<Box<dyn EventStream>>;
}

/// Creates the parser for a sniffed descriptor id.
///
/// Returns `None` for ids outside the closed set.
pub fn create_parser(descriptor_id: &str) -> Option<Box<dyn FormatParser>> {
    match descriptor_id {
        "chatlab-json" | "chatlab-jsonl" => Some(Box::new(ChatLabParser::new())),
        "line-txt" => Some(Box::new(LineParser::new())),
        "qq-txt" => Some(Box::new(QqParser::new())),
        "wechat-json" => Some(Box::new(WeChatParser::new())),
        _ => None,
    }
}

// ============================================================================
// Shared wall-clock helpers
// ============================================================================

/// Converts a zone-less local datetime to UTC seconds using a fixed offset.
pub(crate) fn local_to_utc_secs(naive: chrono::NaiveDateTime, tz_offset_secs: i32) -> i64 {
    naive.and_utc().timestamp() - i64::from(tz_offset_secs)
}

/// Parses a clock string with optional locale AM/PM markers.
///
/// Accepts `10:15`, `10:15:30`, `10:15 PM`, and the CJK day-half markers in
/// both prefix and suffix position: `上午10:15`, `下午3:20`, `午前10:15`,
/// `午後3:20`.
pub(crate) fn parse_clock(input: &str) -> Option<(u32, u32, u32)> {
    let mut text = input.trim();
    let mut half: Option<DayHalf> = None;

    for (marker, h) in [
        ("上午", DayHalf::Am),
        ("午前", DayHalf::Am),
        ("下午", DayHalf::Pm),
        ("午後", DayHalf::Pm),
    ] {
        if let Some(rest) = text.strip_prefix(marker) {
            half = Some(h);
            text = rest.trim();
        } else if let Some(rest) = text.strip_suffix(marker) {
            half = Some(h);
            text = rest.trim();
        }
    }

    let lowered = text.to_ascii_lowercase();
    let mut core = lowered.as_str();
    for (marker, h) in [("am", DayHalf::Am), ("pm", DayHalf::Pm)] {
        if let Some(rest) = core.strip_suffix(marker) {
            half = Some(h);
            core = rest.trim();
        } else if let Some(rest) = core.strip_prefix(marker) {
            half = Some(h);
            core = rest.trim();
        }
    }

    let mut parts = core.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    let second: u32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || minute > 59 || second > 59 {
        return None;
    }

    let hour = match half {
        Some(DayHalf::Pm) if hour < 12 => hour + 12,
        Some(DayHalf::Am) if hour == 12 => 0,
        _ => hour,
    };
    if hour > 23 {
        return None;
    }

    Some((hour, minute, second))
}

#[derive(Clone, Copy)]
enum DayHalf {
    Am,
    Pm,
}

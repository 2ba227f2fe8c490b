//! Import coordinator: sniff → parse → normalize → bulk-write.
//!
//! Drives a parser's event stream through the normalizer into the store in
//! bounded batches. Progress reaches the callback at least every 1000
//! messages or every 250 ms, whichever comes first; cancellation is
//! checked at every batch boundary, leaving the corpus marked partial.
//!
//! Record-level parse errors are counted and logged, never fatal;
//! structural errors abort with a typed error.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{ChatlensError, Result};
use crate::event::{ParseEvent, ParseOptions};
use crate::normalize::{ImportWarning, Normalizer};
use crate::parsers::create_parser;
use crate::progress::{ImportPhase, ImportProgress, ProgressCallback};
use crate::sniffer;
use crate::store::Store;
use crate::types::{ChatKind, ChatMeta, Platform};

/// Cadence bounds for progress reporting.
const PROGRESS_EVERY_MESSAGES: u64 = 1000;
const PROGRESS_EVERY: Duration = Duration::from_millis(250);

/// Outcome of one import run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub corpus_id: String,
    pub message_count: u64,
    pub member_count: u64,
    /// Records the parser could not parse (counted, skipped)
    pub skipped_records: u64,
    /// Messages dropped as duplicates of persisted or in-run messages
    pub duplicates_skipped: u64,
    pub warnings: Vec<ImportWarning>,
}

/// Derives the stable, opaque corpus id for a chat.
///
/// Re-importing an export of the same chat lands in the same corpus, which
/// is what makes deduplication possible.
pub fn derive_corpus_id(platform: Platform, name: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{}-{}", platform.as_str(), hex)
}

/// Runs a full import of `path` into the store.
pub fn run_import(
    store: &mut Store,
    path: &Path,
    options: &ParseOptions,
    progress: &ProgressCallback,
) -> Result<ImportReport> {
    progress(ImportProgress::new(ImportPhase::Sniffing, 0, None, 0));
    let descriptor = sniffer::sniff(path)?;
    tracing::info!(format = descriptor.id, path = %path.display(), "starting import");

    let parser = create_parser(descriptor.id).ok_or_else(|| {
        ChatlensError::internal(format!("no parser registered for '{}'", descriptor.id))
    })?;
    let mut stream = parser.parse(path, options)?;

    let mut state = RunState {
        normalizer: Normalizer::new(),
        corpus_id: None,
        meta: None,
        messages_written: 0,
        duplicates_skipped: 0,
        since_progress: 0,
        last_progress: Instant::now(),
        done: None,
    };

    while let Some(event) = stream.next() {
        let total = stream.total_bytes();
        let bytes = stream.bytes_processed();
        state.handle(store, options, progress, event?, bytes, total)?;
        if state.done.is_some() {
            break;
        }
    }

    let Some((message_count, _)) = state.done else {
        return Err(ChatlensError::parse_other(
            descriptor.display_name,
            "event stream ended without a terminal event",
            Some(path.to_path_buf()),
        ));
    };
    let Some(corpus_id) = state.corpus_id.clone() else {
        return Err(ChatlensError::internal("stream produced no meta event"));
    };
    let Some(meta) = state.meta.clone() else {
        return Err(ChatlensError::internal("stream produced no meta event"));
    };

    // Second pass: bind late replies, settle silent members, decide the
    // final chat kind, clear the partial flag.
    let kind = if meta.kind_explicit {
        meta.kind
    } else {
        state.normalizer.inferred_kind()
    };
    let member_count = state.normalizer.member_count() as u64;
    let min_ts = store.corpus(&corpus_id)?.and_then(|c| c.min_ts);
    let report = state.normalizer.finish(min_ts);
    store.finalize_import(&corpus_id, kind, &report)?;

    progress(
        ImportProgress::new(
            ImportPhase::Done,
            stream.bytes_processed(),
            stream.total_bytes(),
            message_count,
        )
        .with_note("import complete"),
    );

    for warning in &report.warnings {
        tracing::warn!(corpus = %corpus_id, %warning, "normalization warning");
    }

    Ok(ImportReport {
        corpus_id,
        message_count,
        member_count,
        skipped_records: stream.records_skipped(),
        duplicates_skipped: state.duplicates_skipped,
        warnings: report.warnings,
    })
}

struct RunState {
    normalizer: Normalizer,
    corpus_id: Option<String>,
    meta: Option<ChatMeta>,
    messages_written: u64,
    duplicates_skipped: u64,
    since_progress: u64,
    last_progress: Instant,
    done: Option<(u64, u64)>,
}

impl RunState {
    fn handle(
        &mut self,
        store: &mut Store,
        options: &ParseOptions,
        progress: &ProgressCallback,
        event: ParseEvent,
        bytes: u64,
        total: Option<u64>,
    ) -> Result<()> {
        match event {
            ParseEvent::Meta(meta) => {
                let corpus_id = derive_corpus_id(meta.platform, &meta.name);
                let existing = store
                    .corpus(&corpus_id)?
                    .is_some_and(|c| c.message_count > 0);
                store.begin_corpus(&corpus_id, &meta, options.effective_tz_offset())?;
                if existing {
                    tracing::info!(corpus = %corpus_id, "re-import: seeding normalizer");
                    store.seed_normalizer(&corpus_id, &mut self.normalizer)?;
                }
                self.corpus_id = Some(corpus_id);
                self.meta = Some(meta);
            }
            ParseEvent::Members(records) => {
                let corpus_id = self.require_corpus()?;
                let created = self.normalizer.ingest_roster(records);
                if !created.is_empty() {
                    let batch = crate::normalize::NormalizedBatch {
                        new_members: created,
                        ..Default::default()
                    };
                    store.write_batch(&corpus_id, &batch)?;
                }
            }
            ParseEvent::Messages(messages) => {
                if options.cancel.is_canceled() {
                    return Err(ChatlensError::Canceled);
                }
                let corpus_id = self.require_corpus()?;
                let batch = self.normalizer.ingest_batch(messages);
                self.messages_written += batch.messages.len() as u64;
                self.since_progress += batch.messages.len() as u64;
                self.duplicates_skipped += batch.duplicates_skipped;
                store.write_batch(&corpus_id, &batch)?;

                if self.since_progress >= PROGRESS_EVERY_MESSAGES
                    || self.last_progress.elapsed() >= PROGRESS_EVERY
                {
                    self.since_progress = 0;
                    self.last_progress = Instant::now();
                    progress(ImportProgress::new(
                        ImportPhase::Writing,
                        bytes,
                        total,
                        self.messages_written,
                    ));
                }
            }
            ParseEvent::Progress(p) => {
                progress(ImportProgress::new(
                    ImportPhase::Parsing,
                    p.bytes_processed,
                    p.total_bytes,
                    self.messages_written,
                ));
            }
            ParseEvent::Done {
                message_count,
                member_count,
            } => {
                if message_count != self.messages_written {
                    tracing::debug!(
                        parsed = message_count,
                        written = self.messages_written,
                        "parser and normalizer counts differ (duplicates or skips)"
                    );
                }
                // The authoritative count is what survived normalization.
                self.done = Some((self.messages_written, member_count));
            }
        }
        Ok(())
    }

    fn require_corpus(&self) -> Result<String> {
        self.corpus_id
            .clone()
            .ok_or_else(|| ChatlensError::internal("event stream violated ordering: no meta yet"))
    }
}

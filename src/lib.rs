//! # Chatlens
//!
//! A local-first chat-log analytics engine. Chatlens imports raw export
//! files from messaging platforms (LINE, QQ, WeChat, plus its own native
//! JSON/JSONL format) into a normalized SQLite corpus and computes the
//! statistics a chat-analysis UI needs: activity ranking, name history,
//! per-day top talkers, monologue streaks, repeat chains and
//! catchphrases.
//!
//! ## Pipeline
//!
//! A raw file flows through format sniffing, a streaming parser, the
//! normalizer and batched store writes:
//!
//! ```text
//! file -> sniffer -> parser events -> normalizer -> corpus store
//!                                                      |
//!                              analytics queries  <----+
//! ```
//!
//! Parsers are streaming: memory stays O(batch size) regardless of file
//! size. Imports and analytics run on a small worker pool so the calling
//! thread never blocks; results correlate by job id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatlens::engine::Engine;
//! use chatlens::event::ParseOptions;
//! use chatlens::worker::{JobData, JobEvent};
//! use std::path::Path;
//!
//! # fn main() -> chatlens::Result<()> {
//! let engine = Engine::open(Path::new("chatlens.db"))?;
//! let job = engine.import_start(Path::new("line_chat.txt"), ParseOptions::new());
//!
//! while let Ok(event) = engine.events().recv() {
//!     match event {
//!         JobEvent::Progress { id, progress } if id == job => {
//!             println!("{:?}: {} messages", progress.phase, progress.messages_processed);
//!         }
//!         JobEvent::Finished(outcome) if outcome.id == job => {
//!             if let Ok(JobData::Import(report)) = outcome.result {
//!                 println!("imported {} messages", report.message_count);
//!             }
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Library users who don't need the pool can drive the pieces directly:
//! [`import::run_import`] against a [`store::Store`], then the
//! [`analytics`] functions.
//!
//! ## Module Structure
//!
//! - [`engine`] - **Boundary facade** (recommended entry point)
//! - [`sniffer`] - Format registry and content-signature detection
//! - [`parsers`] - One streaming parser per supported format
//! - [`event`] - The uniform parse event stream and options
//! - [`normalize`] - Identity, name history, replies, dedup
//! - [`store`] - SQLite corpus store, migrations, SQL lab, catalog
//! - [`import`] - The sniff/parse/normalize/write coordinator
//! - [`analytics`] - Read-only statistics with time-window pushdown
//! - [`worker`] - Worker pool and job router
//! - [`progress`] - Progress reporting for long-running operations
//! - [`error`] - Unified error types ([`ChatlensError`], [`Result`])
//! - [`types`] - Core data model shared by all layers

pub mod analytics;
pub mod engine;
pub mod error;
pub mod event;
pub mod import;
pub mod normalize;
pub mod parsers;
pub mod progress;
pub mod sniffer;
pub mod store;
pub mod types;
pub mod worker;

// Re-export the main types at the crate root for convenience
pub use error::{ChatlensError, Result};
pub use types::{ChatKind, MessageKind, Platform, RawMessage, TimeFilter};

/// Convenient re-exports for common usage.
///
/// ```rust
/// use chatlens::prelude::*;
/// ```
pub mod prelude {
    // Error types
    pub use crate::error::{ChatlensError, Result};

    // Core data model
    pub use crate::types::{
        ChatKind, ChatMeta, Corpus, Member, MessageKind, Platform, RawMessage, TimeFilter,
    };

    // Boundary facade
    pub use crate::engine::Engine;

    // Parse plumbing
    pub use crate::event::{CancelToken, ParseEvent, ParseOptions};
    pub use crate::parsers::{EventStream, FormatParser, create_parser};
    pub use crate::sniffer::sniff;

    // Import pipeline
    pub use crate::import::{ImportReport, run_import};
    pub use crate::progress::{ImportPhase, ImportProgress, ProgressCallback, no_progress};

    // Store
    pub use crate::store::Store;
    pub use crate::store::catalog::SessionCatalog;

    // Analytics
    pub use crate::analytics::{
        QueryOpts, activity_ranking, catchphrases, dragon_king, monologue_streaks,
        repeat_chains, sessions,
    };

    // Jobs
    pub use crate::worker::{JobData, JobEvent, JobId, JobKind, JobRouter};
}

//! Boundary facade consumed by the shell.
//!
//! [`Engine`] owns the job router and the session catalog and exposes the
//! operations the interactive layer calls: session management, import
//! jobs, the schema/SQL lab, and one entry per analysis. Long-running work
//! returns a [`JobId`] immediately; progress and results stream over
//! [`Engine::events`]. Catalog reads are answered synchronously from a
//! read-only connection so the interactive thread never waits on the pool.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::analytics::{
    CatchphraseParams, ChainParams, QueryOpts, SessionParams, StreakParams,
};
use crate::error::Result;
use crate::event::ParseOptions;
use crate::store::catalog::SessionCatalog;
use crate::store::migrations::MigrationInfo;
use crate::store::sql::DEFAULT_MAX_ROWS;
use crate::store::{Store, migrations};
use crate::types::{Corpus, TimeFilter};
use crate::worker::{AnalyticsRequest, CatalogOp, JobEvent, JobId, JobKind, JobRouter};

/// The application core behind the boundary API.
pub struct Engine {
    db_path: PathBuf,
    router: JobRouter,
    reader: Store,
    catalog: SessionCatalog,
}

impl Engine {
    /// Opens the store (running migrations) and starts the worker pool.
    pub fn open(db_path: &Path) -> Result<Self> {
        let router = JobRouter::new(db_path)?;
        let reader = Store::open_read_only(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            router,
            reader,
            catalog: SessionCatalog::new(),
        })
    }

    /// The database file this engine serves.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ========================================================================
    // sessions.*
    // ========================================================================

    pub fn sessions_list(&self) -> Result<Vec<Corpus>> {
        self.catalog.list(&self.reader)
    }

    pub fn sessions_select(&mut self, corpus_id: &str) -> Result<()> {
        self.catalog.select(&self.reader, corpus_id)
    }

    pub fn selected_corpus(&self) -> Option<&str> {
        self.catalog.selected()
    }

    /// Schedules a transactional delete; clears the selection immediately.
    pub fn sessions_delete(&mut self, corpus_id: &str) -> JobId {
        if self.catalog.selected() == Some(corpus_id) {
            // Selection is interactive state; drop it now rather than when
            // the write completes.
            self.catalog.deselect();
        }
        self.router.submit(JobKind::Catalog(CatalogOp::Delete {
            corpus_id: corpus_id.to_string(),
        }))
    }

    pub fn sessions_set_owner(&self, corpus_id: &str, platform_id: Option<String>) -> JobId {
        self.router.submit(JobKind::Catalog(CatalogOp::SetOwner {
            corpus_id: corpus_id.to_string(),
            platform_id,
        }))
    }

    pub fn sessions_set_last_filter(&self, corpus_id: &str, filter: TimeFilter) -> JobId {
        self.router
            .submit(JobKind::Catalog(CatalogOp::SetLastFilter {
                corpus_id: corpus_id.to_string(),
                filter,
            }))
    }

    // ========================================================================
    // import.*
    // ========================================================================

    /// Starts an import job; `progress`, `done` and `error` arrive on the
    /// event channel under the returned id.
    pub fn import_start(&self, path: &Path, options: ParseOptions) -> JobId {
        self.router.submit(JobKind::Import {
            path: path.to_path_buf(),
            options,
        })
    }

    // ========================================================================
    // schema.get / query.sql
    // ========================================================================

    pub fn schema(&self) -> JobId {
        self.router.submit(JobKind::Schema)
    }

    /// Read-only SQL scoped to one corpus, with the default 1000-row cap.
    ///
    /// The worker shadows the per-corpus tables with views filtered to
    /// `corpus_id` before running the statement, so the query only sees
    /// that corpus's rows.
    pub fn sql(&self, corpus_id: &str, sql: &str) -> JobId {
        self.router.submit(JobKind::Sql {
            corpus_id: corpus_id.to_string(),
            sql: sql.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
        })
    }

    // ========================================================================
    // analytics.*
    // ========================================================================

    fn analytics(&self, corpus_id: &str, request: AnalyticsRequest, opts: QueryOpts) -> JobId {
        self.router.submit(JobKind::Analytics {
            corpus_id: corpus_id.to_string(),
            request,
            opts,
        })
    }

    fn opts(filter: Option<TimeFilter>, deadline: Option<Instant>) -> QueryOpts {
        let mut opts = QueryOpts::new().with_filter(filter.unwrap_or_default());
        if let Some(deadline) = deadline {
            opts = opts.with_deadline(deadline);
        }
        opts
    }

    pub fn analytics_activity(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::Activity,
            Self::opts(filter, deadline),
        )
    }

    pub fn analytics_name_history(
        &self,
        corpus_id: &str,
        member_id: i64,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::NameHistory { member_id },
            Self::opts(None, deadline),
        )
    }

    pub fn analytics_dragon_king(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::DragonKing,
            Self::opts(filter, deadline),
        )
    }

    pub fn analytics_streaks(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        params: Option<StreakParams>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::Streaks(params.unwrap_or_default()),
            Self::opts(filter, deadline),
        )
    }

    pub fn analytics_repeat_chains(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        params: Option<ChainParams>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::RepeatChains(params.unwrap_or_default()),
            Self::opts(filter, deadline),
        )
    }

    pub fn analytics_catchphrases(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        params: Option<CatchphraseParams>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::Catchphrases(params.unwrap_or_default()),
            Self::opts(filter, deadline),
        )
    }

    pub fn analytics_sessions(
        &self,
        corpus_id: &str,
        filter: Option<TimeFilter>,
        params: Option<SessionParams>,
        deadline: Option<Instant>,
    ) -> JobId {
        self.analytics(
            corpus_id,
            AnalyticsRequest::Sessions(params.unwrap_or_default()),
            Self::opts(filter, deadline),
        )
    }

    // ========================================================================
    // migrations.pending
    // ========================================================================

    /// Pending migrations as human-readable reasons. Empty once the engine
    /// is open, since open applies them; non-empty only for stores
    /// inspected before upgrading.
    pub fn migrations_pending(&self) -> Result<Vec<MigrationInfo>> {
        migrations::pending(self.reader.conn())
    }

    // ========================================================================
    // events / cancellation / shutdown
    // ========================================================================

    /// The shared event channel: progress plus `{ id, result }` outcomes.
    pub fn events(&self) -> &Receiver<JobEvent> {
        self.router.events()
    }

    /// Requests cooperative cancellation of a job.
    pub fn cancel(&self, id: JobId) {
        self.router.cancel(id);
    }

    /// Stops the pool and joins its threads.
    pub fn shutdown(self) {
        self.router.shutdown();
    }
}

//! Worker pool and job router.
//!
//! A fixed pool of threads (`min(4, hardware parallelism)`) keeps parsing,
//! normalization, bulk writes and analytics off the interactive thread.
//! The single import worker owns the sole read-write connection; the
//! remaining workers serve analytics and SQL-lab jobs over their own
//! read-only connections, each job inside a reader transaction so it sees
//! a stable snapshot.
//!
//! Jobs are `{ id, kind }`; results come back on one shared event channel
//! as `{ id, result }`. Cancellation is by id: the router flips the job's
//! token, which workers poll at batch and row checkpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::analytics::{
    self, CatchphraseParams, ChainParams, QueryOpts, SessionParams, StreakParams,
};
use crate::error::{ChatlensError, Result};
use crate::event::{CancelToken, ParseOptions};
use crate::import::{ImportReport, run_import};
use crate::progress::{ImportProgress, ProgressCallback};
use crate::store::sql::{SqlResult, TableSchema, run_readonly_sql, table_schemas};
use crate::store::{Store, migrations};
use crate::types::{NameInterval, SessionBounds};

/// Correlates a request with its result.
pub type JobId = u64;

/// What a job should do.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Parse + normalize + write one export file (read-write path).
    Import {
        path: PathBuf,
        options: ParseOptions,
    },
    /// One of the read-only analyses.
    Analytics {
        corpus_id: String,
        request: AnalyticsRequest,
        opts: QueryOpts,
    },
    /// Guarded read-only SQL-lab query.
    Sql {
        corpus_id: String,
        sql: String,
        max_rows: usize,
    },
    /// Table reflection for the schema browser.
    Schema,
    /// Pending migration reasons for the boundary.
    MigrationsPending,
    /// Catalog mutation; routed through the write path with imports.
    Catalog(CatalogOp),
}

/// Catalog mutations that must serialize with imports.
#[derive(Debug, Clone)]
pub enum CatalogOp {
    Delete {
        corpus_id: String,
    },
    SetOwner {
        corpus_id: String,
        platform_id: Option<String>,
    },
    SetLastFilter {
        corpus_id: String,
        filter: crate::types::TimeFilter,
    },
}

/// Which analysis an analytics job runs.
#[derive(Debug, Clone)]
pub enum AnalyticsRequest {
    Activity,
    NameHistory { member_id: i64 },
    DragonKing,
    Streaks(StreakParams),
    RepeatChains(ChainParams),
    Catchphrases(CatchphraseParams),
    Sessions(SessionParams),
}

/// Successful payloads, one per job kind.
#[derive(Debug)]
pub enum JobData {
    Import(ImportReport),
    Activity(analytics::ActivityReport),
    NameHistory(Vec<NameInterval>),
    DragonKing(analytics::DragonKingReport),
    Streaks(analytics::StreakReport),
    Chains(analytics::ChainReport),
    Catchphrases(analytics::CatchphraseReport),
    Sessions(Vec<SessionBounds>),
    Sql(SqlResult),
    Schema(Vec<TableSchema>),
    MigrationsPending(Vec<migrations::MigrationInfo>),
    /// Catalog mutations succeed with no payload.
    Unit,
}

/// Terminal result of one job.
#[derive(Debug)]
pub struct JobOutcome {
    pub id: JobId,
    pub result: Result<JobData>,
}

/// Everything the router reports back.
#[derive(Debug)]
pub enum JobEvent {
    /// Import progress snapshots, tagged with the job id.
    Progress { id: JobId, progress: ImportProgress },
    Finished(JobOutcome),
}

struct Job {
    id: JobId,
    kind: JobKind,
    cancel: CancelToken,
}

type CancelRegistry = Arc<Mutex<HashMap<JobId, CancelToken>>>;

/// Routes jobs to the pool and correlates results.
pub struct JobRouter {
    import_tx: Option<Sender<Job>>,
    query_tx: Option<Sender<Job>>,
    events_rx: Receiver<JobEvent>,
    next_id: AtomicU64,
    cancels: CancelRegistry,
    handles: Vec<JoinHandle<()>>,
}

impl JobRouter {
    /// Opens the store (applying migrations; integrity failures surface
    /// here) and spawns the pool.
    pub fn new(db_path: &Path) -> Result<Self> {
        // Opening read-write first creates the file and runs migrations, so
        // the read-only workers always see a current schema.
        let rw_store = Store::open(db_path)?;

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let pool = parallelism.min(4).max(2);
        let query_workers = pool - 1;

        let (import_tx, import_rx) = unbounded::<Job>();
        let (query_tx, query_rx) = unbounded::<Job>();
        let (events_tx, events_rx) = unbounded::<JobEvent>();
        let cancels: CancelRegistry = Arc::new(Mutex::new(HashMap::new()));

        let mut handles = Vec::with_capacity(pool);
        {
            let events = events_tx.clone();
            let cancels = cancels.clone();
            handles.push(
                std::thread::Builder::new()
                    .name("chatlens-import".into())
                    .spawn(move || import_worker(rw_store, import_rx, events, cancels))?,
            );
        }
        for i in 0..query_workers {
            let events = events_tx.clone();
            let cancels = cancels.clone();
            let rx = query_rx.clone();
            let path = db_path.to_path_buf();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("chatlens-query-{i}"))
                    .spawn(move || query_worker(&path, rx, events, cancels))?,
            );
        }

        Ok(Self {
            import_tx: Some(import_tx),
            query_tx: Some(query_tx),
            events_rx,
            next_id: AtomicU64::new(1),
            cancels,
            handles,
        })
    }

    /// Submits a job, returning its id immediately.
    pub fn submit(&self, kind: JobKind) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        self.cancels.lock().unwrap().insert(id, cancel.clone());

        let job = Job { id, kind, cancel };
        let tx = match job.kind {
            JobKind::Import { .. } | JobKind::Catalog(_) => self.import_tx.as_ref(),
            _ => self.query_tx.as_ref(),
        };
        if let Some(tx) = tx {
            // Unbounded send never blocks the boundary thread.
            let _ = tx.send(job);
        }
        id
    }

    /// Requests cooperative cancellation of a pending or running job.
    pub fn cancel(&self, id: JobId) {
        if let Some(token) = self.cancels.lock().unwrap().get(&id) {
            token.cancel();
        }
    }

    /// The shared event channel: progress and terminal results.
    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events_rx
    }

    /// Drops the queues and joins the pool.
    pub fn shutdown(mut self) {
        self.import_tx.take();
        self.query_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn finish(
    events: &Sender<JobEvent>,
    cancels: &CancelRegistry,
    id: JobId,
    result: Result<JobData>,
) {
    cancels.lock().unwrap().remove(&id);
    let _ = events.send(JobEvent::Finished(JobOutcome { id, result }));
}

fn import_worker(
    mut store: Store,
    rx: Receiver<Job>,
    events: Sender<JobEvent>,
    cancels: CancelRegistry,
) {
    while let Ok(job) = rx.recv() {
        let (path, options) = match job.kind {
            JobKind::Import { path, options } => (path, options),
            JobKind::Catalog(op) => {
                let result = run_catalog_op(&mut store, &op).map(|()| JobData::Unit);
                finish(&events, &cancels, job.id, result);
                continue;
            }
            _ => {
                finish(
                    &events,
                    &cancels,
                    job.id,
                    Err(ChatlensError::internal("non-write job on import worker")),
                );
                continue;
            }
        };

        let options = options.with_cancel(job.cancel.clone());
        let progress: ProgressCallback = {
            let events = events.clone();
            let id = job.id;
            Arc::new(move |p| {
                let _ = events.send(JobEvent::Progress { id, progress: p });
            })
        };

        let result = run_import(&mut store, &path, &options, &progress).map(JobData::Import);
        let fatal = result.as_ref().err().is_some_and(|e| e.is_worker_fatal());
        finish(&events, &cancels, job.id, result);
        if fatal {
            tracing::error!("import worker terminating after fatal error");
            break;
        }
    }
}

fn run_catalog_op(store: &mut Store, op: &CatalogOp) -> Result<()> {
    match op {
        CatalogOp::Delete { corpus_id } => store.delete_corpus(corpus_id),
        CatalogOp::SetOwner {
            corpus_id,
            platform_id,
        } => store.set_owner(corpus_id, platform_id.as_deref()),
        CatalogOp::SetLastFilter { corpus_id, filter } => {
            store.set_last_filter(corpus_id, filter)
        }
    }
}

fn query_worker(
    db_path: &Path,
    rx: Receiver<Job>,
    events: Sender<JobEvent>,
    cancels: CancelRegistry,
) {
    let store = match Store::open_read_only(db_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "query worker could not open store");
            return;
        }
    };

    while let Ok(job) = rx.recv() {
        let result = run_query_job(&store, &job);
        let fatal = result.as_ref().err().is_some_and(|e| e.is_worker_fatal());
        finish(&events, &cancels, job.id, result);
        if fatal {
            tracing::error!("query worker terminating after fatal error");
            break;
        }
    }
}

/// Runs one read-only job inside a reader transaction so it observes a
/// snapshot taken at its start.
fn run_query_job(store: &Store, job: &Job) -> Result<JobData> {
    if job.cancel.is_canceled() {
        return Err(ChatlensError::Canceled);
    }

    store.conn().execute_batch("BEGIN")?;
    let result = dispatch_query(store, job);
    let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
    if let Err(e) = store.conn().execute_batch(end) {
        tracing::warn!(error = %e, "failed to close reader transaction");
    }
    result
}

fn dispatch_query(store: &Store, job: &Job) -> Result<JobData> {
    match &job.kind {
        JobKind::Import { .. } | JobKind::Catalog(_) => {
            Err(ChatlensError::internal("write job on query worker"))
        }
        JobKind::Analytics {
            corpus_id,
            request,
            opts,
        } => {
            let opts = opts.clone().with_cancel(job.cancel.clone());
            match request {
                AnalyticsRequest::Activity => {
                    analytics::activity_ranking(store, corpus_id, &opts).map(JobData::Activity)
                }
                AnalyticsRequest::NameHistory { member_id } => {
                    analytics::member_name_history(store, corpus_id, *member_id, &opts)
                        .map(JobData::NameHistory)
                }
                AnalyticsRequest::DragonKing => {
                    analytics::dragon_king(store, corpus_id, &opts).map(JobData::DragonKing)
                }
                AnalyticsRequest::Streaks(params) => {
                    analytics::monologue_streaks(store, corpus_id, &opts, *params)
                        .map(JobData::Streaks)
                }
                AnalyticsRequest::RepeatChains(params) => {
                    analytics::repeat_chains(store, corpus_id, &opts, *params).map(JobData::Chains)
                }
                AnalyticsRequest::Catchphrases(params) => {
                    analytics::catchphrases(store, corpus_id, &opts, *params)
                        .map(JobData::Catchphrases)
                }
                AnalyticsRequest::Sessions(params) => {
                    analytics::sessions(store, corpus_id, &opts, *params).map(JobData::Sessions)
                }
            }
        }
        JobKind::Sql {
            corpus_id,
            sql,
            max_rows,
        } => run_readonly_sql(store, Some(corpus_id), sql, *max_rows).map(JobData::Sql),
        JobKind::Schema => table_schemas(store).map(JobData::Schema),
        JobKind::MigrationsPending => {
            migrations::pending(store.conn()).map(JobData::MigrationsPending)
        }
    }
}

//! Read-only analytics over a corpus.
//!
//! Every analysis takes a corpus id and [`QueryOpts`] carrying the time
//! window, an optional deadline and a cancellation token. Time filters are
//! pushed into the SQL, never applied in post-processing; scans checkpoint
//! between rows so cancellation and deadlines take effect promptly. Each
//! job sees the snapshot its reader connection opened.

mod activity;
mod catchphrase;
mod chains;
mod dragon;
mod session;
mod streaks;

pub use activity::{ActivityEntry, ActivityReport, activity_ranking, member_name_history};
pub use catchphrase::{
    Catchphrase, CatchphraseParams, CatchphraseReport, MemberCatchphrases, catchphrases,
};
pub use chains::{
    ChainMemberStats, ChainParams, ChainReport, HotContent, repeat_chains,
};
pub use dragon::{DragonKingEntry, DragonKingReport, dragon_king};
pub use session::{SessionParams, sessions};
pub use streaks::{
    MaxComboRecord, MemberStreaks, StreakParams, StreakReport, monologue_streaks,
};

use std::collections::HashMap;
use std::time::Instant;

use rusqlite::params;

use crate::error::{ChatlensError, Result};
use crate::event::CancelToken;
use crate::store::Store;
use crate::types::TimeFilter;

/// Options shared by every analytics query.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    /// Half-open `[start, end)` window pushed into the SQL
    pub filter: TimeFilter,
    /// Absolute deadline; expiry surfaces as [`ChatlensError::Timeout`]
    pub deadline: Option<Instant>,
    /// Cooperative cancellation, polled between rows
    pub cancel: CancelToken,
}

impl QueryOpts {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(mut self, filter: TimeFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Row-level suspension point: checks cancellation and the deadline.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(ChatlensError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ChatlensError::Timeout);
            }
        }
        Ok(())
    }
}

/// Display names for all members of a corpus, keyed by internal id.
pub(crate) fn member_names(store: &Store, corpus_id: &str) -> Result<HashMap<i64, String>> {
    let mut stmt = store.conn().prepare_cached(
        "SELECT id, COALESCE(NULLIF(group_nickname, ''), NULLIF(account_name, ''), platform_id)
         FROM member WHERE corpus_id = ?1",
    )?;
    let rows = stmt.query_map(params![corpus_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut names = HashMap::new();
    for row in rows {
        let (id, name) = row?;
        names.insert(id, name);
    }
    Ok(names)
}

/// Per-member total message counts inside the window (rate denominators).
pub(crate) fn member_totals(
    store: &Store,
    corpus_id: &str,
    filter: &TimeFilter,
) -> Result<HashMap<i64, u64>> {
    let mut sql = String::from(
        "SELECT sender_id, COUNT(*) FROM message WHERE corpus_id = ?1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(corpus_id.to_string())];
    crate::store::push_time_filter(&mut sql, &mut params_vec, "ts", filter);
    sql.push_str(" GROUP BY sender_id");

    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64)),
    )?;
    let mut totals = HashMap::new();
    for row in rows {
        let (id, count) = row?;
        totals.insert(id, count);
    }
    Ok(totals)
}

/// A message projection shared by the sequential scans.
#[derive(Debug, Clone)]
pub(crate) struct ScanRow {
    pub id: i64,
    pub sender_id: i64,
    pub ts: i64,
    pub kind: String,
    pub content: Option<String>,
}

/// Streams messages in id order (parse order) through `visit`, with a
/// checkpoint before each row. The time filter is part of the SQL.
pub(crate) fn scan_messages(
    store: &Store,
    corpus_id: &str,
    opts: &QueryOpts,
    mut visit: impl FnMut(ScanRow) -> Result<()>,
) -> Result<()> {
    let mut sql = String::from(
        "SELECT id, sender_id, ts, type, content FROM message WHERE corpus_id = ?1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(corpus_id.to_string())];
    crate::store::push_time_filter(&mut sql, &mut params_vec, "ts", &opts.filter);
    sql.push_str(" ORDER BY id");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(
        params_vec.iter().map(|p| p.as_ref()),
    ))?;
    while let Some(row) = rows.next()? {
        opts.checkpoint()?;
        visit(ScanRow {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            ts: row.get(2)?,
            kind: row.get(3)?,
            content: row.get(4)?,
        })?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::normalize::Normalizer;
    use crate::store::Store;
    use crate::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

    /// Builds an in-memory corpus `c1` from `(sender, ts, kind, content)`
    /// tuples.
    pub(crate) fn corpus(messages: &[(&str, i64, MessageKind, &str)]) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store
            .begin_corpus(
                "c1",
                &ChatMeta::new("Test", Platform::Line, ChatKind::Group),
                0,
            )
            .unwrap();
        let mut norm = Normalizer::new();
        let raw: Vec<RawMessage> = messages
            .iter()
            .map(|(sender, ts, kind, content)| {
                let mut m = RawMessage::new(*sender, *ts, *kind);
                if !content.is_empty() {
                    m = m.with_content(*content);
                }
                m
            })
            .collect();
        let batch = norm.ingest_batch(raw);
        store.write_batch("c1", &batch).unwrap();
        store
            .finalize_import("c1", ChatKind::Group, &norm.finish(None))
            .unwrap();
        store
    }

    pub(crate) fn text<'a>(sender: &'a str, ts: i64, content: &'a str) -> (&'a str, i64, MessageKind, &'a str) {
        (sender, ts, MessageKind::Text, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use std::time::Duration;

    #[test]
    fn test_checkpoint_cancellation() {
        let cancel = CancelToken::new();
        let opts = QueryOpts::new().with_cancel(cancel.clone());
        assert!(opts.checkpoint().is_ok());
        cancel.cancel();
        assert!(opts.checkpoint().unwrap_err().is_canceled());
    }

    #[test]
    fn test_checkpoint_deadline() {
        let opts = QueryOpts::new().with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(opts.checkpoint().unwrap_err().is_timeout());
    }

    #[test]
    fn test_scan_respects_filter_and_order() {
        let store = testutil::corpus(&[
            testutil::text("A", 100, "one"),
            testutil::text("B", 200, "two"),
            testutil::text("A", 300, "three"),
        ]);
        let opts = QueryOpts::new().with_filter(TimeFilter::all().since(150).until(300));
        let mut seen = Vec::new();
        scan_messages(&store, "c1", &opts, |row| {
            seen.push((row.ts, row.content.unwrap()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(200, "two".to_string())]);
    }

    #[test]
    fn test_member_totals() {
        let store = testutil::corpus(&[
            testutil::text("A", 100, "x"),
            ("A", 150, MessageKind::Image, ""),
            testutil::text("B", 200, "y"),
        ]);
        let totals = member_totals(&store, "c1", &TimeFilter::all()).unwrap();
        assert_eq!(totals.get(&1), Some(&2));
        assert_eq!(totals.get(&2), Some(&1));
    }

    #[test]
    fn test_member_names_prefer_nickname() {
        let store = testutil::corpus(&[testutil::text("Alice", 100, "x")]);
        let names = member_names(&store, "c1").unwrap();
        assert_eq!(names.get(&1).map(String::as_str), Some("Alice"));
    }
}

//! Session catalog: which corpora exist and which one is active.
//!
//! The active selection is in-memory state; lightweight per-corpus UI
//! state (owner member, last time filter) persists on the corpus row.
//! Delete is transactional with corpus removal.

use rusqlite::params;

use crate::error::{ChatlensError, Result};
use crate::types::{Corpus, TimeFilter};

use super::Store;

/// Tracks the corpora list and the current selection.
#[derive(Debug, Default)]
pub struct SessionCatalog {
    selected: Option<String>,
}

impl SessionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All imported corpora.
    pub fn list(&self, store: &Store) -> Result<Vec<Corpus>> {
        store.list_corpora()
    }

    /// The currently selected corpus id, if any.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Selects a corpus; it must exist.
    pub fn select(&mut self, store: &Store, corpus_id: &str) -> Result<()> {
        if store.corpus(corpus_id)?.is_none() {
            return Err(ChatlensError::internal(format!(
                "cannot select unknown corpus '{corpus_id}'"
            )));
        }
        self.selected = Some(corpus_id.to_string());
        Ok(())
    }

    /// Clears the active selection.
    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Deletes a corpus and everything beneath it, clearing the selection
    /// when it pointed there.
    pub fn delete(&mut self, store: &mut Store, corpus_id: &str) -> Result<()> {
        store.delete_corpus(corpus_id)?;
        if self.selected.as_deref() == Some(corpus_id) {
            self.selected = None;
        }
        Ok(())
    }

    /// Sets (or clears) the owner identity by platform id.
    pub fn set_owner(
        &self,
        store: &Store,
        corpus_id: &str,
        platform_id: Option<&str>,
    ) -> Result<()> {
        store.set_owner(corpus_id, platform_id)
    }

    /// Persists the last time filter the user applied to this corpus.
    pub fn set_last_filter(
        &self,
        store: &Store,
        corpus_id: &str,
        filter: &TimeFilter,
    ) -> Result<()> {
        store.set_last_filter(corpus_id, filter)
    }

    /// Reads back the persisted filter (unbounded when never set).
    pub fn last_filter(&self, store: &Store, corpus_id: &str) -> Result<TimeFilter> {
        let filter = store.conn().query_row(
            "SELECT last_filter_start, last_filter_end FROM meta WHERE corpus_id = ?1",
            params![corpus_id],
            |row| {
                Ok(TimeFilter {
                    start_ts: row.get(0)?,
                    end_ts: row.get(1)?,
                })
            },
        )?;
        Ok(filter)
    }
}

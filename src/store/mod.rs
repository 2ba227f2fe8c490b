//! Embedded corpus store: one SQLite file per installation.
//!
//! The store owns the schema (see [`migrations`]) and all write paths.
//! Import batches commit one transaction each, with the corpus row's
//! counters updated inside the same transaction; a corpus is created with
//! `partial = 1` and flipped only when the terminal event commits, so a
//! crash leaves a complete prefix of batches plus an explicit partial
//! flag — never silently truncated indexes.
//!
//! Analytics workers open additional read-only connections to the same
//! file; writes are serialized through the single import worker.

pub mod catalog;
pub mod migrations;
pub mod sql;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::error::Result;
use crate::normalize::{FinishReport, NameEvent, NormalizedBatch, Normalizer};
use crate::types::{ChatKind, ChatMeta, Corpus, Member, NameInterval, Platform, TimeFilter};

/// Handle over the corpus database.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) the store and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatlensError::StoreIntegrity`] when the file
    /// reports a schema version from the future or a migration fails.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::apply_pending(&mut conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a read-only connection for analytics workers.
    ///
    /// The schema must already be current; this never migrates.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::apply_pending(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw connection for the query layers built on top.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // Corpus lifecycle
    // ========================================================================

    /// Creates the corpus row (or re-arms an existing one for re-import),
    /// marked partial until the import finalizes.
    pub fn begin_corpus(&self, id: &str, meta: &ChatMeta, tz_offset_secs: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO meta (corpus_id, name, platform, chat_kind, tz_offset_secs,
                               partial, schema_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
             ON CONFLICT(corpus_id) DO UPDATE SET
                 name = excluded.name,
                 platform = excluded.platform,
                 tz_offset_secs = excluded.tz_offset_secs,
                 partial = 1,
                 schema_version = excluded.schema_version",
            params![
                id,
                meta.name,
                meta.platform.as_str(),
                meta.kind.as_str(),
                tz_offset_secs,
                migrations::latest_version(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Writes one normalized batch in a single transaction, keeping the
    /// corpus counters consistent with the committed prefix.
    pub fn write_batch(&mut self, corpus_id: &str, batch: &NormalizedBatch) -> Result<()> {
        let tx = self.conn.transaction()?;

        {
            let mut insert_member = tx.prepare_cached(
                "INSERT INTO member (corpus_id, id, platform_id, account_name,
                                     group_nickname, aliases, roles, avatar)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (id, record) in &batch.new_members {
                insert_member.execute(params![
                    corpus_id,
                    id,
                    record.platform_id,
                    record.account_name,
                    record.group_nickname,
                    serde_json::to_string(&record.aliases)?,
                    serde_json::to_string(&record.roles)?,
                    record.avatar,
                ])?;
            }

            apply_name_events(&tx, corpus_id, &batch.name_events)?;

            let mut insert_message = tx.prepare_cached(
                "INSERT INTO message (corpus_id, id, sender_id, ts, type, content,
                                      reply_to_message_id, reply_to_platform_id,
                                      platform_message_id, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for msg in &batch.messages {
                insert_message.execute(params![
                    corpus_id,
                    msg.id,
                    msg.sender_id,
                    msg.ts,
                    msg.kind.as_str(),
                    msg.content,
                    msg.reply_to_message_id,
                    msg.reply_to_platform_id,
                    msg.platform_message_id,
                    msg.extra,
                ])?;
            }

            if let (Some(first), Some(last)) = (batch.messages.first(), batch.messages.last()) {
                tx.execute(
                    "UPDATE meta SET
                         message_count = message_count + ?2,
                         member_count = member_count + ?3,
                         min_ts = CASE WHEN min_ts IS NULL OR ?4 < min_ts THEN ?4 ELSE min_ts END,
                         max_ts = CASE WHEN max_ts IS NULL OR ?5 > max_ts THEN ?5 ELSE max_ts END
                     WHERE corpus_id = ?1",
                    params![
                        corpus_id,
                        batch.messages.len() as i64,
                        batch.new_members.len() as i64,
                        first.ts,
                        last.ts,
                    ],
                )?;
            } else if !batch.new_members.is_empty() {
                tx.execute(
                    "UPDATE meta SET member_count = member_count + ?2 WHERE corpus_id = ?1",
                    params![corpus_id, batch.new_members.len() as i64],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Applies the end-of-import second pass and clears the partial flag.
    pub fn finalize_import(
        &mut self,
        corpus_id: &str,
        kind: ChatKind,
        report: &FinishReport,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut bind = tx.prepare_cached(
                "UPDATE message SET reply_to_message_id = ?3
                 WHERE corpus_id = ?1 AND id = ?2",
            )?;
            for (message_id, target_id) in &report.resolved_replies {
                bind.execute(params![corpus_id, message_id, target_id])?;
            }

            apply_name_events(&tx, corpus_id, &report.name_events)?;

            tx.execute(
                "UPDATE meta SET chat_kind = ?2, partial = 0 WHERE corpus_id = ?1",
                params![corpus_id, kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Seeds a normalizer with the corpus's persisted members, reply index
    /// and dedup keys for the re-import path.
    pub fn seed_normalizer(&self, corpus_id: &str, normalizer: &mut Normalizer) -> Result<()> {
        {
            let mut stmt = self.conn.prepare(
                "SELECT m.id, m.platform_id,
                        COALESCE(h.name, COALESCE(NULLIF(m.group_nickname, ''),
                                                  NULLIF(m.account_name, ''), m.platform_id))
                 FROM member m
                 LEFT JOIN name_history h
                     ON h.corpus_id = m.corpus_id AND h.member_id = m.id AND h.end_ts IS NULL
                 WHERE m.corpus_id = ?1",
            )?;
            let rows = stmt.query_map(params![corpus_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (id, platform_id, name) = row?;
                normalizer.seed_member(&platform_id, id, &name);
            }
        }

        {
            let mut stmt = self.conn.prepare(
                "SELECT msg.ts, mem.platform_id, msg.content, msg.platform_message_id, msg.id
                 FROM message msg
                 JOIN member mem ON mem.corpus_id = msg.corpus_id AND mem.id = msg.sender_id
                 WHERE msg.corpus_id = ?1",
            )?;
            let rows = stmt.query_map(params![corpus_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            for row in rows {
                let (ts, platform_id, content, pmid, id) = row?;
                normalizer.seed_existing_message(ts, &platform_id, content.as_deref());
                if let Some(pmid) = pmid {
                    normalizer.seed_reply_target(&pmid, id);
                }
            }
        }

        let next_id: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM message WHERE corpus_id = ?1",
            params![corpus_id],
            |row| row.get(0),
        )?;
        normalizer.start_message_ids_at(next_id);
        Ok(())
    }

    /// Sets (or clears) the owner identity, resolving the platform id to
    /// the internal member id.
    pub fn set_owner(&self, corpus_id: &str, platform_id: Option<&str>) -> Result<()> {
        let member_id: Option<i64> = match platform_id {
            None => None,
            Some(pid) => {
                let id = self
                    .conn
                    .query_row(
                        "SELECT id FROM member WHERE corpus_id = ?1 AND platform_id = ?2",
                        params![corpus_id, pid],
                        |row| row.get(0),
                    )
                    .map_err(|_| {
                        crate::error::ChatlensError::internal(format!(
                            "no member with platform id '{pid}' in corpus '{corpus_id}'"
                        ))
                    })?;
                Some(id)
            }
        };
        self.conn.execute(
            "UPDATE meta SET owner_member_id = ?2 WHERE corpus_id = ?1",
            params![corpus_id, member_id],
        )?;
        Ok(())
    }

    /// Persists the last time filter applied to a corpus.
    pub fn set_last_filter(&self, corpus_id: &str, filter: &TimeFilter) -> Result<()> {
        self.conn.execute(
            "UPDATE meta SET last_filter_start = ?2, last_filter_end = ?3
             WHERE corpus_id = ?1",
            params![corpus_id, filter.start_ts, filter.end_ts],
        )?;
        Ok(())
    }

    /// Deletes a corpus and everything beneath it.
    pub fn delete_corpus(&mut self, corpus_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM meta WHERE corpus_id = ?1", params![corpus_id])?;
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Fetch APIs
    // ========================================================================

    pub fn corpus(&self, corpus_id: &str) -> Result<Option<Corpus>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CORPUS_COLUMNS} FROM meta WHERE corpus_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![corpus_id], corpus_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_corpora(&self) -> Result<Vec<Corpus>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CORPUS_COLUMNS} FROM meta ORDER BY created_at, corpus_id"
        ))?;
        let rows = stmt.query_map([], corpus_from_row)?;
        rows.map(|r| Ok(r?)).collect()
    }

    pub fn members(&self, corpus_id: &str) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, platform_id, account_name, group_nickname, aliases, roles, avatar
             FROM member WHERE corpus_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![corpus_id], |row| {
            Ok(Member {
                id: row.get(0)?,
                platform_id: row.get(1)?,
                account_name: row.get(2)?,
                group_nickname: row.get(3)?,
                aliases: json_list(row.get::<_, String>(4)?),
                roles: json_list(row.get::<_, String>(5)?),
                avatar: row.get(6)?,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }

    pub fn name_history(&self, corpus_id: &str, member_id: i64) -> Result<Vec<NameInterval>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, start_ts, end_ts FROM name_history
             WHERE corpus_id = ?1 AND member_id = ?2
             ORDER BY start_ts, rowid",
        )?;
        let rows = stmt.query_map(params![corpus_id, member_id], |row| {
            Ok(NameInterval {
                name: row.get(0)?,
                start_ts: row.get(1)?,
                end_ts: row.get(2)?,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }
}

const CORPUS_COLUMNS: &str = "corpus_id, name, platform, chat_kind, min_ts, max_ts,
    message_count, member_count, owner_member_id, tz_offset_secs, partial,
    schema_version, created_at";

fn corpus_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Corpus> {
    let platform: String = row.get(2)?;
    let kind: String = row.get(3)?;
    Ok(Corpus {
        id: row.get(0)?,
        name: row.get(1)?,
        platform: platform.parse().unwrap_or(Platform::ChatLab),
        kind: kind.parse().unwrap_or(ChatKind::Group),
        min_ts: row.get(4)?,
        max_ts: row.get(5)?,
        message_count: row.get::<_, i64>(6)? as u64,
        member_count: row.get::<_, i64>(7)? as u64,
        owner_member_id: row.get(8)?,
        tz_offset_secs: row.get(9)?,
        partial: row.get::<_, i64>(10)? != 0,
        schema_version: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn apply_name_events(
    tx: &rusqlite::Transaction<'_>,
    corpus_id: &str,
    events: &[NameEvent],
) -> rusqlite::Result<()> {
    let mut open = tx.prepare_cached(
        "INSERT INTO name_history (corpus_id, member_id, name, start_ts, end_ts)
         VALUES (?1, ?2, ?3, ?4, NULL)",
    )?;
    let mut close = tx.prepare_cached(
        "UPDATE name_history SET end_ts = ?3
         WHERE corpus_id = ?1 AND member_id = ?2 AND end_ts IS NULL",
    )?;
    for event in events {
        match event {
            NameEvent::Open {
                member_id,
                name,
                start_ts,
            } => {
                open.execute(params![corpus_id, member_id, name, start_ts])?;
            }
            NameEvent::Change {
                member_id,
                close_at,
                name,
                start_ts,
            } => {
                close.execute(params![corpus_id, member_id, close_at])?;
                open.execute(params![corpus_id, member_id, name, start_ts])?;
            }
        }
    }
    Ok(())
}

/// Appends `AND ts >= / <` clauses for a pushed-down time filter.
///
/// The column reference is caller-supplied so joined queries can qualify
/// it. Parameters are appended to `params` in order.
pub(crate) fn push_time_filter(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    column: &str,
    filter: &TimeFilter,
) {
    if let Some(start) = filter.start_ts {
        sql.push_str(&format!(" AND {column} >= ?{}", params.len() + 1));
        params.push(Box::new(start));
    }
    if let Some(end) = filter.end_ts {
        sql.push_str(&format!(" AND {column} < ?{}", params.len() + 1));
        params.push(Box::new(end));
    }
}

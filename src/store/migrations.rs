//! Versioned schema migrations for the corpus store.
//!
//! The list is append-only and ordered by version. On open the store reads
//! `PRAGMA user_version`, refuses databases from the future, and applies
//! every later step inside a single transaction, bumping the version after
//! each. Steps are idempotent (they check table/column existence first) so
//! a partially re-run list is safe, and no step ever destroys data —
//! column additions carry `DEFAULT` values.

use rusqlite::{Connection, Transaction};

use crate::error::{ChatlensError, Result};

/// One schema upgrade step.
pub struct Migration {
    /// Monotonically increasing version this step upgrades to
    pub version: i64,
    /// Developer-facing description
    pub description: &'static str,
    /// Human-readable reason shown at the boundary before upgrading
    pub user_message: &'static str,
    apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

/// Reflection of a pending migration for the boundary API.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub user_message: String,
}

/// The append-only migration list.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: meta, member, message, name_history",
        user_message: "Create the corpus database layout",
        apply: migrate_v1_initial,
    },
    Migration {
        version: 2,
        description: "add member.roles with default []",
        user_message: "Record member roles (admin, owner) per corpus",
        apply: migrate_v2_member_roles,
    },
    Migration {
        version: 3,
        description: "add message.reply_to_platform_id and platform id index",
        user_message: "Keep unresolved reply references instead of dropping them",
        apply: migrate_v3_reply_platform_ids,
    },
    Migration {
        version: 4,
        description: "add catalog UI state columns to meta",
        user_message: "Remember the selected owner and last time filter per corpus",
        apply: migrate_v4_catalog_state,
    },
];

/// The version a fully migrated database reports.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Migrations that would run on open, as human-readable reasons.
pub fn pending(conn: &Connection) -> Result<Vec<MigrationInfo>> {
    let current = current_version(conn)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .map(|m| MigrationInfo {
            version: m.version,
            description: m.description.to_string(),
            user_message: m.user_message.to_string(),
        })
        .collect())
}

/// Applies all pending migrations inside one transaction.
///
/// # Errors
///
/// Returns [`ChatlensError::StoreIntegrity`] when the database reports a
/// version newer than this binary knows, or when a step fails.
pub fn apply_pending(conn: &mut Connection) -> Result<()> {
    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(ChatlensError::integrity(format!(
            "database schema version {current} is newer than supported version {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        (migration.apply)(&tx).map_err(|e| {
            ChatlensError::integrity(format!(
                "migration to version {} failed: {e}",
                migration.version
            ))
        })?;
        tx.pragma_update(None, "user_version", migration.version)?;
    }
    tx.commit()?;
    Ok(())
}

fn column_exists(tx: &Transaction<'_>, table: &str, column: &str) -> rusqlite::Result<bool> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn migrate_v1_initial(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            corpus_id      TEXT PRIMARY KEY,
            name           TEXT NOT NULL,
            platform       TEXT NOT NULL,
            chat_kind      TEXT NOT NULL,
            min_ts         INTEGER,
            max_ts         INTEGER,
            message_count  INTEGER NOT NULL DEFAULT 0,
            member_count   INTEGER NOT NULL DEFAULT 0,
            tz_offset_secs INTEGER NOT NULL DEFAULT 0,
            partial        INTEGER NOT NULL DEFAULT 0,
            schema_version INTEGER NOT NULL DEFAULT 0,
            created_at     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS member (
            corpus_id      TEXT NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            id             INTEGER NOT NULL,
            platform_id    TEXT NOT NULL,
            account_name   TEXT,
            group_nickname TEXT,
            aliases        TEXT NOT NULL DEFAULT '[]',
            avatar         TEXT,
            PRIMARY KEY (corpus_id, id),
            UNIQUE (corpus_id, platform_id)
        );

        CREATE TABLE IF NOT EXISTS message (
            corpus_id           TEXT NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            id                  INTEGER NOT NULL,
            sender_id           INTEGER NOT NULL,
            ts                  INTEGER NOT NULL,
            type                TEXT NOT NULL,
            content             TEXT,
            reply_to_message_id INTEGER,
            platform_message_id TEXT,
            extra               TEXT,
            PRIMARY KEY (corpus_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_message_ts ON message(corpus_id, ts);
        CREATE INDEX IF NOT EXISTS idx_message_sender ON message(corpus_id, sender_id);

        CREATE TABLE IF NOT EXISTS name_history (
            corpus_id TEXT NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            member_id INTEGER NOT NULL,
            name      TEXT NOT NULL,
            start_ts  INTEGER NOT NULL,
            end_ts    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_name_history_member
            ON name_history(corpus_id, member_id);",
    )
}

fn migrate_v2_member_roles(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !column_exists(tx, "member", "roles")? {
        tx.execute_batch("ALTER TABLE member ADD COLUMN roles TEXT NOT NULL DEFAULT '[]';")?;
    }
    Ok(())
}

fn migrate_v3_reply_platform_ids(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !column_exists(tx, "message", "reply_to_platform_id")? {
        tx.execute_batch("ALTER TABLE message ADD COLUMN reply_to_platform_id TEXT;")?;
    }
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_message_platform_id
            ON message(corpus_id, platform_message_id);",
    )
}

fn migrate_v4_catalog_state(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    for (column, ddl) in [
        ("owner_member_id", "ALTER TABLE meta ADD COLUMN owner_member_id INTEGER;"),
        ("last_filter_start", "ALTER TABLE meta ADD COLUMN last_filter_start INTEGER;"),
        ("last_filter_end", "ALTER TABLE meta ADD COLUMN last_filter_end INTEGER;"),
    ] {
        if !column_exists(tx, "meta", column)? {
            tx.execute_batch(ddl)?;
        }
    }
    Ok(())
}

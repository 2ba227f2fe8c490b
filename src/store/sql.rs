//! Read-only SQL lab surface and schema reflection.
//!
//! This is not a general SQL engine: incoming statements are parsed just
//! enough to reject anything other than a single SELECT, then executed on
//! the store connection with `sqlite3_stmt_readonly` as a second line of
//! defense and a hard row cap.

use std::time::Instant;

use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ChatlensError, Result};

use super::Store;

/// Default row cap for lab queries.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Result of a lab query.
#[derive(Debug, Clone, Serialize)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub duration_ms: u64,
    /// `true` when the row cap truncated the result
    pub limited: bool,
}

/// One column of a reflected table.
#[derive(Debug, Clone, Serialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
    pub pk: bool,
}

/// One reflected table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<TableColumn>,
}

/// Strips leading whitespace and SQL comments.
fn skip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            match after.split_once("*/") {
                Some((_, tail)) => rest = tail,
                None => return "",
            }
        } else {
            return trimmed;
        }
    }
}

/// Returns the statement body when `sql` is a single SELECT (optionally
/// CTE-prefixed); rejects everything else.
fn validate_select(sql: &str) -> Result<()> {
    let body = skip_leading_trivia(sql);
    let head: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    if head != "SELECT" && head != "WITH" {
        return Err(ChatlensError::rejected_sql(
            "only a single SELECT statement is allowed",
        ));
    }

    // A second statement after a top-level ';' is rejected. The scan is
    // string-aware so literals containing ';' pass.
    let mut in_string: Option<char> = None;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    // Doubled quotes escape inside SQL literals.
                    if chars.peek() == Some(&quote) {
                        chars.next();
                    } else {
                        in_string = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' => in_string = Some(c),
                ';' => {
                    let tail: String = chars.collect();
                    if !skip_leading_trivia(&tail).is_empty() {
                        return Err(ChatlensError::rejected_sql(
                            "multiple statements are not allowed",
                        ));
                    }
                    return Ok(());
                }
                _ => {}
            },
        }
    }
    Ok(())
}

/// Tables keyed by `corpus_id` that get shadowed by scoped views.
const CORPUS_TABLES: &[&str] = &["meta", "member", "message", "name_history"];

/// Shadows the per-corpus tables with temporary views filtered to one
/// corpus, so unqualified table references in lab queries only see its
/// rows. The temp schema wins name resolution over `main`.
fn install_corpus_views(conn: &rusqlite::Connection, corpus_id: &str) -> Result<()> {
    let quoted = corpus_id.replace('\'', "''");
    for table in CORPUS_TABLES {
        conn.execute_batch(&format!(
            "DROP VIEW IF EXISTS temp.{table};
             CREATE TEMP VIEW {table} AS
                 SELECT * FROM main.{table} WHERE corpus_id = '{quoted}';"
        ))?;
    }
    Ok(())
}

/// Removes the scoped views so later unscoped access sees the base tables.
fn drop_corpus_views(conn: &rusqlite::Connection) {
    for table in CORPUS_TABLES {
        if let Err(e) = conn.execute_batch(&format!("DROP VIEW IF EXISTS temp.{table};")) {
            tracing::warn!(table, error = %e, "failed to drop scoped view");
        }
    }
}

/// Runs a read-only lab query with a row cap.
///
/// With a corpus id the query is scoped: the corpus must exist, and the
/// per-corpus tables (`meta`, `member`, `message`, `name_history`) are
/// shadowed for the duration of the query by views filtered to that
/// corpus. The scoping covers unqualified table references; this is a
/// guardrail, not a sandbox.
///
/// # Errors
///
/// Returns [`ChatlensError::RejectedSql`] for non-SELECT input and
/// [`ChatlensError::Store`] for SQL errors from the engine.
pub fn run_readonly_sql(
    store: &Store,
    corpus_id: Option<&str>,
    sql: &str,
    max_rows: usize,
) -> Result<SqlResult> {
    validate_select(sql)?;

    if let Some(corpus) = corpus_id {
        let count: i64 = store.conn().query_row(
            "SELECT COUNT(*) FROM main.meta WHERE corpus_id = ?1",
            rusqlite::params![corpus],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(ChatlensError::internal(format!(
                "unknown corpus '{corpus}'"
            )));
        }
        if let Err(e) = install_corpus_views(store.conn(), corpus) {
            drop_corpus_views(store.conn());
            return Err(e);
        }
    }

    let result = execute_capped(store, sql, max_rows);
    if corpus_id.is_some() {
        drop_corpus_views(store.conn());
    }
    result
}

fn execute_capped(store: &Store, sql: &str, max_rows: usize) -> Result<SqlResult> {
    let started = Instant::now();
    let mut stmt = store.conn().prepare(sql)?;
    if !stmt.readonly() {
        return Err(ChatlensError::rejected_sql(
            "statement is not read-only",
        ));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut limited = false;
    let mut raw = stmt.query([])?;
    while let Some(row) = raw.next()? {
        if rows.len() >= max_rows {
            limited = true;
            break;
        }
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            record.push(json_value(row.get_ref(i)?));
        }
        rows.push(record);
    }

    Ok(SqlResult {
        row_count: rows.len(),
        columns,
        rows,
        duration_ms: started.elapsed().as_millis() as u64,
        limited,
    })
}

/// Reflects the user-visible tables for the schema browser.
pub fn table_schemas(store: &Store) -> Result<Vec<TableSchema>> {
    let mut names_stmt = store.conn().prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names: Vec<String> = names_stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let mut stmt = store
            .conn()
            .prepare("SELECT name, type, pk FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([&name], |row| {
                Ok(TableColumn {
                    name: row.get(0)?,
                    col_type: row.get(1)?,
                    pk: row.get::<_, i64>(2)? > 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables.push(TableSchema { name, columns });
    }
    Ok(tables)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            Value::from(format!("0x{hex}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

    fn seed_corpus(store: &mut Store, corpus_id: &str, messages: Vec<RawMessage>) {
        store
            .begin_corpus(
                corpus_id,
                &ChatMeta::new("Test", Platform::Line, ChatKind::Group),
                0,
            )
            .unwrap();
        let mut norm = Normalizer::new();
        let batch = norm.ingest_batch(messages);
        store.write_batch(corpus_id, &batch).unwrap();
        store
            .finalize_import(corpus_id, ChatKind::Group, &norm.finish(None))
            .unwrap();
    }

    fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        seed_corpus(
            &mut store,
            "c1",
            vec![
                RawMessage::new("Alice", 100, MessageKind::Text).with_content("hi"),
                RawMessage::new("Bob", 160, MessageKind::Text).with_content("yo"),
            ],
        );
        store
    }

    fn two_corpus_store() -> Store {
        let mut store = seeded_store();
        seed_corpus(
            &mut store,
            "c2",
            vec![
                RawMessage::new("Carol", 200, MessageKind::Text).with_content("other"),
                RawMessage::new("Carol", 210, MessageKind::Text).with_content("corpus"),
                RawMessage::new("Dave", 220, MessageKind::Text).with_content("here"),
            ],
        );
        store
    }

    #[test]
    fn test_select_returns_rows_and_columns() {
        let store = seeded_store();
        let result = run_readonly_sql(
            &store,
            Some("c1"),
            "SELECT id, content FROM message ORDER BY id",
            DEFAULT_MAX_ROWS,
        )
        .unwrap();
        assert_eq!(result.columns, vec!["id", "content"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0][1], Value::from("hi"));
        assert!(!result.limited);
    }

    #[test]
    fn test_scoped_to_one_corpus() {
        let store = two_corpus_store();

        let c1 = run_readonly_sql(&store, Some("c1"), "SELECT COUNT(*) FROM message", 10).unwrap();
        assert_eq!(c1.rows[0][0], Value::from(2));

        let c2 = run_readonly_sql(&store, Some("c2"), "SELECT COUNT(*) FROM message", 10).unwrap();
        assert_eq!(c2.rows[0][0], Value::from(3));

        // meta is scoped to the single corpus row too.
        let meta = run_readonly_sql(&store, Some("c2"), "SELECT corpus_id FROM meta", 10).unwrap();
        assert_eq!(meta.row_count, 1);
        assert_eq!(meta.rows[0][0], Value::from("c2"));

        // Unscoped access still sees the whole file.
        let all = run_readonly_sql(&store, None, "SELECT COUNT(*) FROM message", 10).unwrap();
        assert_eq!(all.rows[0][0], Value::from(5));
    }

    #[test]
    fn test_scoped_views_are_cleaned_up() {
        let store = two_corpus_store();
        run_readonly_sql(&store, Some("c1"), "SELECT COUNT(*) FROM message", 10).unwrap();

        // The base tables are visible again once the scoped query is done.
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_unknown_corpus_is_an_error() {
        let store = seeded_store();
        let err =
            run_readonly_sql(&store, Some("missing"), "SELECT 1", DEFAULT_MAX_ROWS).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_delete_rejected_and_store_unchanged() {
        let store = seeded_store();
        let err = run_readonly_sql(&store, Some("c1"), "DELETE FROM message", DEFAULT_MAX_ROWS)
            .unwrap_err();
        assert!(matches!(err, ChatlensError::RejectedSql { .. }));

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let store = seeded_store();
        let err = run_readonly_sql(
            &store,
            Some("c1"),
            "SELECT 1; DROP TABLE message",
            DEFAULT_MAX_ROWS,
        )
        .unwrap_err();
        assert!(matches!(err, ChatlensError::RejectedSql { .. }));
    }

    #[test]
    fn test_trailing_semicolon_allowed() {
        let store = seeded_store();
        let result = run_readonly_sql(&store, Some("c1"), "SELECT 1;", DEFAULT_MAX_ROWS).unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[test]
    fn test_semicolon_in_literal_allowed() {
        let store = seeded_store();
        let result =
            run_readonly_sql(&store, None, "SELECT 'a; b' AS v", DEFAULT_MAX_ROWS).unwrap();
        assert_eq!(result.rows[0][0], Value::from("a; b"));
    }

    #[test]
    fn test_leading_comment_then_select() {
        let store = seeded_store();
        let result = run_readonly_sql(
            &store,
            Some("c1"),
            "-- count them\nSELECT COUNT(*) FROM message",
            DEFAULT_MAX_ROWS,
        )
        .unwrap();
        assert_eq!(result.rows[0][0], Value::from(2));
    }

    #[test]
    fn test_comment_hidden_update_rejected() {
        let store = seeded_store();
        let err = run_readonly_sql(
            &store,
            Some("c1"),
            "/* sneaky */ UPDATE meta SET name = 'x'",
            DEFAULT_MAX_ROWS,
        )
        .unwrap_err();
        assert!(matches!(err, ChatlensError::RejectedSql { .. }));
    }

    #[test]
    fn test_cte_select_allowed() {
        let store = seeded_store();
        let result = run_readonly_sql(
            &store,
            Some("c1"),
            "WITH counts AS (SELECT sender_id, COUNT(*) AS n FROM message GROUP BY sender_id)
             SELECT * FROM counts ORDER BY n DESC",
            DEFAULT_MAX_ROWS,
        )
        .unwrap();
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn test_row_cap_sets_limited() {
        let store = seeded_store();
        let result = run_readonly_sql(&store, Some("c1"), "SELECT * FROM message", 1).unwrap();
        assert_eq!(result.row_count, 1);
        assert!(result.limited);
    }

    #[test]
    fn test_table_schemas_reflection() {
        let store = seeded_store();
        let tables = table_schemas(&store).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"meta"));
        assert!(names.contains(&"member"));
        assert!(names.contains(&"message"));
        assert!(names.contains(&"name_history"));

        let message = tables.iter().find(|t| t.name == "message").unwrap();
        let id = message.columns.iter().find(|c| c.name == "id").unwrap();
        assert!(id.pk);
        let ts = message.columns.iter().find(|c| c.name == "ts").unwrap();
        assert_eq!(ts.col_type, "INTEGER");
        assert!(!ts.pk);
    }
}

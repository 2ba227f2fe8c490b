//! Activity ranking and member name history.

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;
use crate::types::NameInterval;

use super::{QueryOpts, member_names};

/// One member's share of the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub member_id: i64,
    pub name: String,
    pub message_count: u64,
    /// `message_count / total_messages`, 0.0 for an empty window
    pub percentage: f64,
}

/// Activity ranking over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub total_messages: u64,
    pub entries: Vec<ActivityEntry>,
}

/// Per-member message counts, descending, ties by member id ascending.
pub fn activity_ranking(store: &Store, corpus_id: &str, opts: &QueryOpts) -> Result<ActivityReport> {
    opts.checkpoint()?;

    let mut sql = String::from(
        "SELECT sender_id, COUNT(*) AS n FROM message WHERE corpus_id = ?1",
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(corpus_id.to_string())];
    crate::store::push_time_filter(&mut sql, &mut params, "ts", &opts.filter);
    sql.push_str(" GROUP BY sender_id ORDER BY n DESC, sender_id ASC");

    let names = member_names(store, corpus_id)?;
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64)),
    )?;

    let mut counts = Vec::new();
    let mut total: u64 = 0;
    for row in rows {
        opts.checkpoint()?;
        let (member_id, count) = row?;
        total += count;
        counts.push((member_id, count));
    }

    let entries = counts
        .into_iter()
        .map(|(member_id, message_count)| ActivityEntry {
            member_id,
            name: names.get(&member_id).cloned().unwrap_or_default(),
            message_count,
            percentage: if total == 0 {
                0.0
            } else {
                message_count as f64 / total as f64
            },
        })
        .collect();

    Ok(ActivityReport {
        total_messages: total,
        entries,
    })
}

/// Ordered name intervals for one member; `end_ts = None` marks the
/// current name.
pub fn member_name_history(
    store: &Store,
    corpus_id: &str,
    member_id: i64,
    opts: &QueryOpts,
) -> Result<Vec<NameInterval>> {
    opts.checkpoint()?;
    store.name_history(corpus_id, member_id)
}

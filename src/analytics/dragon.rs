//! Dragon-king analysis: the per-day top talker.
//!
//! Calendar days are bucketed in the corpus timezone (the fixed offset
//! recorded at import), so a chat imported as UTC+9 counts its days on
//! JST boundaries regardless of where the analysis runs.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

use super::{QueryOpts, member_names};

/// One member's crown count.
#[derive(Debug, Clone, Serialize)]
pub struct DragonKingEntry {
    pub member_id: i64,
    pub name: String,
    pub days_won: u64,
}

/// Dragon-king results for the window.
#[derive(Debug, Clone, Serialize)]
pub struct DragonKingReport {
    /// Distinct calendar days inspected
    pub total_days: u64,
    /// Days won per member, descending, ties by member id ascending
    pub entries: Vec<DragonKingEntry>,
}

/// For every calendar day in the window, crowns the member with the most
/// messages (ties go to the earliest message that day) and counts crowns
/// per member.
pub fn dragon_king(store: &Store, corpus_id: &str, opts: &QueryOpts) -> Result<DragonKingReport> {
    opts.checkpoint()?;

    let tz_offset: i64 = store.conn().query_row(
        "SELECT tz_offset_secs FROM meta WHERE corpus_id = ?1",
        rusqlite::params![corpus_id],
        |row| row.get(0),
    )?;

    // One row per (day, sender); the winner per day is decided while
    // streaming in day order.
    let mut sql = format!(
        "SELECT (ts + {tz_offset}) / 86400 AS day, sender_id, COUNT(*) AS n, MIN(ts) AS first_ts
         FROM message WHERE corpus_id = ?1"
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(corpus_id.to_string())];
    crate::store::push_time_filter(&mut sql, &mut params, "ts", &opts.filter);
    sql.push_str(" GROUP BY day, sender_id ORDER BY day");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(
        params.iter().map(|p| p.as_ref()),
    ))?;

    struct DayBest {
        day: i64,
        member_id: i64,
        count: i64,
        first_ts: i64,
    }

    let mut wins: HashMap<i64, u64> = HashMap::new();
    let mut total_days: u64 = 0;
    let mut best: Option<DayBest> = None;

    let crown = |best: &Option<DayBest>, wins: &mut HashMap<i64, u64>| {
        if let Some(b) = best {
            *wins.entry(b.member_id).or_insert(0) += 1;
        }
    };

    while let Some(row) = rows.next()? {
        opts.checkpoint()?;
        let day: i64 = row.get(0)?;
        let member_id: i64 = row.get(1)?;
        let count: i64 = row.get(2)?;
        let first_ts: i64 = row.get(3)?;

        match &mut best {
            Some(b) if b.day == day => {
                if count > b.count || (count == b.count && first_ts < b.first_ts) {
                    *b = DayBest {
                        day,
                        member_id,
                        count,
                        first_ts,
                    };
                }
            }
            Some(_) => {
                crown(&best, &mut wins);
                total_days += 1;
                best = Some(DayBest {
                    day,
                    member_id,
                    count,
                    first_ts,
                });
            }
            None => {
                best = Some(DayBest {
                    day,
                    member_id,
                    count,
                    first_ts,
                });
            }
        }
    }
    if best.is_some() {
        crown(&best, &mut wins);
        total_days += 1;
    }

    let names = member_names(store, corpus_id)?;
    let mut entries: Vec<DragonKingEntry> = wins
        .into_iter()
        .map(|(member_id, days_won)| DragonKingEntry {
            member_id,
            name: names.get(&member_id).cloned().unwrap_or_default(),
            days_won,
        })
        .collect();
    entries.sort_by(|a, b| b.days_won.cmp(&a.days_won).then(a.member_id.cmp(&b.member_id)));

    Ok(DragonKingReport {
        total_days,
        entries,
    })
}

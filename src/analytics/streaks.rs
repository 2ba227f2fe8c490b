//! Monologue streak analysis.
//!
//! A streak is a maximal run of at least `min_len` consecutive messages
//! from one sender where each consecutive pair is within `idle_gap`
//! seconds.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

use super::{QueryOpts, member_names, scan_messages};

/// Streak detection parameters.
#[derive(Debug, Clone, Copy)]
pub struct StreakParams {
    /// Minimum run length that counts as a streak (default: 3)
    pub min_len: usize,
    /// Maximum seconds between consecutive messages in a run (default: 300)
    pub idle_gap: i64,
}

impl Default for StreakParams {
    fn default() -> Self {
        Self {
            min_len: 3,
            idle_gap: 300,
        }
    }
}

/// One member's streak statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberStreaks {
    pub member_id: i64,
    pub name: String,
    pub total_streaks: u64,
    pub max_combo: u64,
    /// Streaks of length 3-4
    pub low_streak: u64,
    /// Streaks of length 5-9
    pub mid_streak: u64,
    /// Streaks of length >= 10
    pub high_streak: u64,
}

/// The single all-time longest combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaxComboRecord {
    pub member_id: i64,
    pub combo_length: u64,
    pub start_ts: i64,
}

/// Streak analysis results.
#[derive(Debug, Clone, Serialize)]
pub struct StreakReport {
    pub members: Vec<MemberStreaks>,
    /// Ties broken by later start timestamp (most recent wins)
    pub max_combo_record: Option<MaxComboRecord>,
}

/// Finds monologue streaks over the filtered window.
pub fn monologue_streaks(
    store: &Store,
    corpus_id: &str,
    opts: &QueryOpts,
    params: StreakParams,
) -> Result<StreakReport> {
    struct Run {
        member_id: i64,
        len: u64,
        start_ts: i64,
        last_ts: i64,
    }

    let mut stats: HashMap<i64, MemberStreaks> = HashMap::new();
    let mut best: Option<MaxComboRecord> = None;
    let mut run: Option<Run> = None;

    let close_run = |run: &Option<Run>,
                         stats: &mut HashMap<i64, MemberStreaks>,
                         best: &mut Option<MaxComboRecord>| {
        let Some(r) = run else { return };
        if (r.len as usize) < params.min_len {
            return;
        }
        let entry = stats.entry(r.member_id).or_default();
        entry.member_id = r.member_id;
        entry.total_streaks += 1;
        entry.max_combo = entry.max_combo.max(r.len);
        match r.len {
            3..=4 => entry.low_streak += 1,
            5..=9 => entry.mid_streak += 1,
            _ => entry.high_streak += 1,
        }
        // Most recent combo wins ties; the scan is chronological, so a
        // later equal-length run replaces the record.
        if best.map(|b| r.len >= b.combo_length).unwrap_or(true) {
            *best = Some(MaxComboRecord {
                member_id: r.member_id,
                combo_length: r.len,
                start_ts: r.start_ts,
            });
        }
    };

    scan_messages(store, corpus_id, opts, |row| {
        match &mut run {
            Some(r) if r.member_id == row.sender_id && row.ts - r.last_ts <= params.idle_gap => {
                r.len += 1;
                r.last_ts = row.ts;
            }
            _ => {
                close_run(&run, &mut stats, &mut best);
                run = Some(Run {
                    member_id: row.sender_id,
                    len: 1,
                    start_ts: row.ts,
                    last_ts: row.ts,
                });
            }
        }
        Ok(())
    })?;
    close_run(&run, &mut stats, &mut best);

    let names = member_names(store, corpus_id)?;
    let mut members: Vec<MemberStreaks> = stats
        .into_values()
        .map(|mut m| {
            m.name = names.get(&m.member_id).cloned().unwrap_or_default();
            m
        })
        .collect();
    members.sort_by(|a, b| {
        b.total_streaks
            .cmp(&a.total_streaks)
            .then(a.member_id.cmp(&b.member_id))
    });

    Ok(StreakReport {
        members,
        max_combo_record: best,
    })
}

//! Repeat-chain analysis: who starts, who picks up, who kills the echo.
//!
//! A repeat chain is a maximal sequence of *distinct* senders each sending
//! identical normalized text (trimmed, case-sensitive) with consecutive
//! echoes at most `chain_idle_gap` seconds apart, length >= 2. The first
//! sender is the *originator*, the second the *initiator*, and the sender
//! of the first following message with different content the *breaker*.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

use super::{QueryOpts, member_names, member_totals, scan_messages};

/// Chain detection parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    /// Maximum seconds between consecutive echoes (default: 600)
    pub chain_idle_gap: i64,
    /// How many hot contents to report (default: 10)
    pub hot_limit: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_idle_gap: 600,
            hot_limit: 10,
        }
    }
}

/// One member's chain roles and rates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainMemberStats {
    pub member_id: i64,
    pub name: String,
    pub originated: u64,
    pub origin_rate: f64,
    pub initiated: u64,
    pub initiate_rate: f64,
    pub broken: u64,
    pub break_rate: f64,
}

/// A frequently echoed content.
#[derive(Debug, Clone, Serialize)]
pub struct HotContent {
    pub content: String,
    /// Display name of the originator of the longest chain for this content
    pub originator_name: String,
    /// How many chains this exact content triggered
    pub count: u64,
    pub max_chain_length: u64,
    pub last_ts: i64,
}

/// Repeat-chain analysis results.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub total_chains: u64,
    pub members: Vec<ChainMemberStats>,
    /// Histogram keyed by chain length
    pub chain_length_distribution: BTreeMap<u64, u64>,
    /// Top chains by length
    pub hot_contents: Vec<HotContent>,
}

struct ActiveChain {
    text: String,
    senders: Vec<i64>,
    last_ts: i64,
}

#[derive(Default)]
struct HotAgg {
    count: u64,
    max_len: u64,
    last_ts: i64,
    originator_of_max: i64,
}

/// Finds repeat chains over the filtered window.
pub fn repeat_chains(
    store: &Store,
    corpus_id: &str,
    opts: &QueryOpts,
    params: ChainParams,
) -> Result<ChainReport> {
    let mut originators: HashMap<i64, u64> = HashMap::new();
    let mut initiators: HashMap<i64, u64> = HashMap::new();
    let mut breakers: HashMap<i64, u64> = HashMap::new();
    let mut length_dist: BTreeMap<u64, u64> = BTreeMap::new();
    let mut hot: HashMap<String, HotAgg> = HashMap::new();
    let mut total_chains: u64 = 0;

    let mut chain: Option<ActiveChain> = None;
    let mut awaiting_breaker: Option<String> = None;

    let record_chain = |c: &ActiveChain,
                            originators: &mut HashMap<i64, u64>,
                            initiators: &mut HashMap<i64, u64>,
                            length_dist: &mut BTreeMap<u64, u64>,
                            hot: &mut HashMap<String, HotAgg>,
                            total_chains: &mut u64| {
        let len = c.senders.len() as u64;
        if len < 2 {
            return false;
        }
        *total_chains += 1;
        *originators.entry(c.senders[0]).or_insert(0) += 1;
        *initiators.entry(c.senders[1]).or_insert(0) += 1;
        *length_dist.entry(len).or_insert(0) += 1;
        let agg = hot.entry(c.text.clone()).or_default();
        agg.count += 1;
        agg.last_ts = agg.last_ts.max(c.last_ts);
        if len > agg.max_len {
            agg.max_len = len;
            agg.originator_of_max = c.senders[0];
        }
        true
    };

    scan_messages(store, corpus_id, opts, |row| {
        let text = if row.kind == "text" {
            row.content.as_deref().map(str::trim).filter(|t| !t.is_empty())
        } else {
            None
        };

        // Settle the breaker of the previously ended chain first: the first
        // message with *different* content after it ends the echo.
        if let Some(ended_text) = &awaiting_breaker {
            if text != Some(ended_text.as_str()) {
                *breakers.entry(row.sender_id).or_insert(0) += 1;
                awaiting_breaker = None;
            }
        }

        match (&mut chain, text) {
            (Some(c), Some(t))
                if c.text == t
                    && row.ts - c.last_ts <= params.chain_idle_gap
                    && !c.senders.contains(&row.sender_id) =>
            {
                c.senders.push(row.sender_id);
                c.last_ts = row.ts;
            }
            (current, text) => {
                if let Some(c) = current.take() {
                    let recorded = record_chain(
                        &c,
                        &mut originators,
                        &mut initiators,
                        &mut length_dist,
                        &mut hot,
                        &mut total_chains,
                    );
                    if recorded {
                        match text {
                            // This very message killed the echo.
                            Some(t) if t != c.text => {
                                *breakers.entry(row.sender_id).or_insert(0) += 1;
                            }
                            None => {
                                *breakers.entry(row.sender_id).or_insert(0) += 1;
                            }
                            // Same text (same sender again, or out of gap):
                            // the echo hasn't been broken yet.
                            Some(_) => awaiting_breaker = Some(c.text.clone()),
                        }
                    }
                }
                *current = text.map(|t| ActiveChain {
                    text: t.to_string(),
                    senders: vec![row.sender_id],
                    last_ts: row.ts,
                });
            }
        }
        Ok(())
    })?;

    if let Some(c) = chain.take() {
        record_chain(
            &c,
            &mut originators,
            &mut initiators,
            &mut length_dist,
            &mut hot,
            &mut total_chains,
        );
    }

    let names = member_names(store, corpus_id)?;
    let totals = member_totals(store, corpus_id, &opts.filter)?;

    let mut member_ids: Vec<i64> = originators
        .keys()
        .chain(initiators.keys())
        .chain(breakers.keys())
        .copied()
        .collect();
    member_ids.sort_unstable();
    member_ids.dedup();

    let rate = |count: u64, member_id: i64| -> f64 {
        match totals.get(&member_id) {
            Some(&total) if total > 0 => count as f64 / total as f64,
            _ => 0.0,
        }
    };

    let members = member_ids
        .into_iter()
        .map(|id| {
            let originated = originators.get(&id).copied().unwrap_or(0);
            let initiated = initiators.get(&id).copied().unwrap_or(0);
            let broken = breakers.get(&id).copied().unwrap_or(0);
            ChainMemberStats {
                member_id: id,
                name: names.get(&id).cloned().unwrap_or_default(),
                originated,
                origin_rate: rate(originated, id),
                initiated,
                initiate_rate: rate(initiated, id),
                broken,
                break_rate: rate(broken, id),
            }
        })
        .collect();

    let mut hot_contents: Vec<HotContent> = hot
        .into_iter()
        .map(|(content, agg)| HotContent {
            content,
            originator_name: names.get(&agg.originator_of_max).cloned().unwrap_or_default(),
            count: agg.count,
            max_chain_length: agg.max_len,
            last_ts: agg.last_ts,
        })
        .collect();
    hot_contents.sort_by(|a, b| {
        b.max_chain_length
            .cmp(&a.max_chain_length)
            .then(b.count.cmp(&a.count))
            .then(b.last_ts.cmp(&a.last_ts))
    });
    hot_contents.truncate(params.hot_limit);

    Ok(ChainReport {
        total_chains,
        members,
        chain_length_distribution: length_dist,
        hot_contents,
    })
}

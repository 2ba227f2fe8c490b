//! Catchphrase analysis: each member's most repeated text messages.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

use super::{QueryOpts, member_names, scan_messages};

/// Catchphrase parameters.
#[derive(Debug, Clone, Copy)]
pub struct CatchphraseParams {
    /// Catchphrases reported per member (default: 5)
    pub top_k: usize,
    /// Minimum content length in characters (default: 2)
    pub min_len: usize,
    /// Maximum content length in characters (default: 30)
    pub max_len: usize,
}

impl Default for CatchphraseParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_len: 2,
            max_len: 30,
        }
    }
}

/// One repeated phrase.
#[derive(Debug, Clone, Serialize)]
pub struct Catchphrase {
    pub content: String,
    pub count: u64,
}

/// One member's catchphrases, highest frequency first.
#[derive(Debug, Clone, Serialize)]
pub struct MemberCatchphrases {
    pub member_id: i64,
    pub name: String,
    pub catchphrases: Vec<Catchphrase>,
}

/// Catchphrase results.
#[derive(Debug, Clone, Serialize)]
pub struct CatchphraseReport {
    pub members: Vec<MemberCatchphrases>,
}

/// Normalizes whitespace: trim plus inner runs collapsed to single spaces.
fn normalize_text(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Computes per-member top-K repeated text contents.
pub fn catchphrases(
    store: &Store,
    corpus_id: &str,
    opts: &QueryOpts,
    params: CatchphraseParams,
) -> Result<CatchphraseReport> {
    // member -> phrase -> (count, last use)
    let mut counts: HashMap<i64, HashMap<String, (u64, i64)>> = HashMap::new();

    scan_messages(store, corpus_id, opts, |row| {
        if row.kind != "text" {
            return Ok(());
        }
        let Some(content) = row.content.as_deref() else {
            return Ok(());
        };
        let normalized = normalize_text(content);
        let chars = normalized.chars().count();
        if chars < params.min_len || chars > params.max_len {
            return Ok(());
        }
        let entry = counts
            .entry(row.sender_id)
            .or_default()
            .entry(normalized)
            .or_insert((0, row.ts));
        entry.0 += 1;
        entry.1 = entry.1.max(row.ts);
        Ok(())
    })?;

    let names = member_names(store, corpus_id)?;
    let mut member_ids: Vec<i64> = counts.keys().copied().collect();
    member_ids.sort_unstable();

    let members = member_ids
        .into_iter()
        .map(|member_id| {
            let mut phrases: Vec<(String, u64, i64)> = counts
                .remove(&member_id)
                .unwrap_or_default()
                .into_iter()
                .map(|(content, (count, last_ts))| (content, count, last_ts))
                .collect();
            // Highest count first; ties by most recent use.
            phrases.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
            phrases.truncate(params.top_k);

            MemberCatchphrases {
                member_id,
                name: names.get(&member_id).cloned().unwrap_or_default(),
                catchphrases: phrases
                    .into_iter()
                    .map(|(content, count, _)| Catchphrase { content, count })
                    .collect(),
            }
        })
        .collect();

    Ok(CatchphraseReport { members })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{corpus, text};
    use crate::types::{MessageKind, TimeFilter};

    #[test]
    fn test_top_phrases_by_count() {
        let store = corpus(&[
            text("A", 0, "hello"),
            text("A", 10, "hello"),
            text("A", 20, "hello"),
            text("A", 30, "bye"),
            text("A", 40, "bye"),
            text("A", 50, "once"),
        ]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();

        let a = &report.members[0];
        assert_eq!(a.name, "A");
        assert_eq!(a.catchphrases[0].content, "hello");
        assert_eq!(a.catchphrases[0].count, 3);
        assert_eq!(a.catchphrases[1].content, "bye");
        assert_eq!(a.catchphrases[1].count, 2);
    }

    #[test]
    fn test_whitespace_normalization_merges_variants() {
        let store = corpus(&[
            text("A", 0, "good  morning"),
            text("A", 10, " good morning "),
            text("A", 20, "good\tmorning"),
        ]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        assert_eq!(report.members[0].catchphrases[0].content, "good morning");
        assert_eq!(report.members[0].catchphrases[0].count, 3);
    }

    #[test]
    fn test_length_bounds_exclude() {
        let long = "x".repeat(31);
        let store = corpus(&[
            text("A", 0, "y"),
            text("A", 10, "y"),
            text("A", 20, &long),
            text("A", 30, &long),
            text("A", 40, "ok"),
            text("A", 50, "ok"),
        ]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        // "y" is below min_len, the 31-char phrase above max_len.
        let contents: Vec<&str> = report.members[0]
            .catchphrases
            .iter()
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(contents, vec!["ok"]);
    }

    #[test]
    fn test_cjk_length_counts_chars_not_bytes() {
        let store = corpus(&[text("A", 0, "哈哈"), text("A", 10, "哈哈")]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        // Two CJK chars pass min_len = 2 even though they are 6 bytes.
        assert_eq!(report.members[0].catchphrases[0].content, "哈哈");
    }

    #[test]
    fn test_tie_broken_by_most_recent() {
        let store = corpus(&[
            text("A", 0, "old"),
            text("A", 10, "new"),
            text("A", 20, "old"),
            text("A", 30, "new"),
        ]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        // Both counted twice; "new" used more recently.
        assert_eq!(report.members[0].catchphrases[0].content, "new");
    }

    #[test]
    fn test_only_text_kind_counts() {
        let store = corpus(&[
            ("A", 0, MessageKind::Image, "[Photo]"),
            ("A", 10, MessageKind::Image, "[Photo]"),
            text("A", 20, "real"),
            text("A", 30, "real"),
        ]);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        let contents: Vec<&str> = report.members[0]
            .catchphrases
            .iter()
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(contents, vec!["real"]);
    }

    #[test]
    fn test_top_k_truncation_and_filter() {
        let mut messages = Vec::new();
        let phrases = ["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
        let mut ts = 0;
        for (i, phrase) in phrases.iter().enumerate() {
            // p1 seven times, p2 six times, ...
            for _ in 0..(phrases.len() - i) {
                messages.push(("A", ts, MessageKind::Text, *phrase));
                ts += 10;
            }
        }
        let store = corpus(&messages);
        let report =
            catchphrases(&store, "c1", &QueryOpts::new(), CatchphraseParams::default()).unwrap();
        assert_eq!(report.members[0].catchphrases.len(), 5);
        assert_eq!(report.members[0].catchphrases[0].content, "p1");

        let windowed = QueryOpts::new().with_filter(TimeFilter::all().until(0));
        let report =
            catchphrases(&store, "c1", &windowed, CatchphraseParams::default()).unwrap();
        assert!(report.members.is_empty());
    }
}

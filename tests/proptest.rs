//! Property-based tests using proptest.
//!
//! Random message sequences verify the algebraic invariants of the
//! normalizer and the analytics scans.

use proptest::prelude::*;

use chatlens::analytics::{self, ChainParams, QueryOpts, StreakParams};
use chatlens::normalize::Normalizer;
use chatlens::store::Store;
use chatlens::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

// =============================================================================
// STRATEGY DEFINITIONS
// =============================================================================

/// A sender drawn from a small pool, so collisions (streaks, chains,
/// renames) actually happen.
fn arb_sender() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["A", "B", "C", "D"])
}

/// A short text drawn from a small pool, so repeats happen.
fn arb_text() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["gg", "lol", "ok", "nice", "??"])
}

/// A message sequence with non-decreasing timestamps and varied gaps.
fn arb_sequence(max_len: usize) -> impl Strategy<Value = Vec<(String, i64, String)>> {
    prop::collection::vec((arb_sender(), 0i64..900, arb_text()), 1..max_len).prop_map(|raw| {
        let mut ts = 0i64;
        raw.into_iter()
            .map(|(sender, gap, text)| {
                ts += gap;
                (sender.to_string(), ts, text.to_string())
            })
            .collect()
    })
}

fn build_store(messages: &[(String, i64, String)]) -> Store {
    let mut store = Store::open_in_memory().unwrap();
    store
        .begin_corpus(
            "c1",
            &ChatMeta::new("Prop", Platform::ChatLab, ChatKind::Group),
            0,
        )
        .unwrap();
    let mut norm = Normalizer::new();
    let raw: Vec<RawMessage> = messages
        .iter()
        .enumerate()
        .map(|(i, (sender, ts, text))| {
            RawMessage::new(sender.clone(), *ts, MessageKind::Text)
                .with_content(text.clone())
                .with_platform_message_id(format!("m{i}"))
        })
        .collect();
    let batch = norm.ingest_batch(raw);
    store.write_batch("c1", &batch).unwrap();
    store
        .finalize_import("c1", ChatKind::Group, &norm.finish(None))
        .unwrap();
    store
}

// =============================================================================
// STREAK INVARIANTS
// =============================================================================

proptest! {
    #[test]
    fn streak_buckets_sum_to_totals(messages in arb_sequence(60)) {
        let store = build_store(&messages);
        let report = analytics::monologue_streaks(
            &store,
            "c1",
            &QueryOpts::new(),
            StreakParams::default(),
        )
        .unwrap();

        for member in &report.members {
            prop_assert_eq!(
                member.low_streak + member.mid_streak + member.high_streak,
                member.total_streaks
            );
            prop_assert!(member.max_combo >= 3);
            prop_assert!(member.total_streaks >= 1);
        }

        // The global record is at least as long as any member's best.
        if let Some(record) = report.max_combo_record {
            for member in &report.members {
                prop_assert!(record.combo_length >= member.max_combo);
            }
        } else {
            prop_assert!(report.members.is_empty());
        }
    }
}

// =============================================================================
// CHAIN INVARIANTS
// =============================================================================

proptest! {
    #[test]
    fn chain_algebra_holds(messages in arb_sequence(60)) {
        let store = build_store(&messages);
        let report = analytics::repeat_chains(
            &store,
            "c1",
            &QueryOpts::new(),
            ChainParams::default(),
        )
        .unwrap();

        // Every chain has exactly one originator and one initiator.
        let originated: u64 = report.members.iter().map(|m| m.originated).sum();
        let initiated: u64 = report.members.iter().map(|m| m.initiated).sum();
        prop_assert_eq!(originated, report.total_chains);
        prop_assert_eq!(initiated, report.total_chains);

        // The histogram covers every chain, each of length >= 2.
        let histogram_total: u64 = report.chain_length_distribution.values().sum();
        prop_assert_eq!(histogram_total, report.total_chains);
        for (len, count) in &report.chain_length_distribution {
            prop_assert!(*len >= 2);
            prop_assert!(*count >= 1);
        }

        // Chain participants never exceed the message count.
        let participants: u64 = report
            .chain_length_distribution
            .iter()
            .map(|(len, n)| len * n)
            .sum();
        prop_assert!(participants <= messages.len() as u64);

        // Rates are well-formed.
        for member in &report.members {
            prop_assert!(member.origin_rate >= 0.0 && member.origin_rate <= 1.0);
            prop_assert!(member.break_rate >= 0.0 && member.break_rate <= 1.0);
        }
    }
}

// =============================================================================
// NAME HISTORY INVARIANTS
// =============================================================================

proptest! {
    #[test]
    fn name_history_partitions_lifetime(
        renames in prop::collection::vec((arb_sender(), 0i64..500), 1..40)
    ) {
        // One platform identity ("u1") cycling through display names.
        let mut store = Store::open_in_memory().unwrap();
        store
            .begin_corpus(
                "c1",
                &ChatMeta::new("Renames", Platform::ChatLab, ChatKind::Group),
                0,
            )
            .unwrap();
        let mut norm = Normalizer::new();
        let mut ts = 0i64;
        let raw: Vec<RawMessage> = renames
            .iter()
            .map(|(name, gap)| {
                ts += gap;
                RawMessage::new(name.to_string(), ts, MessageKind::Text)
                    .with_sender_id("u1")
                    .with_content("x")
            })
            .collect();
        let batch = norm.ingest_batch(raw);
        store.write_batch("c1", &batch).unwrap();
        store
            .finalize_import("c1", ChatKind::Group, &norm.finish(None))
            .unwrap();

        let history = store.name_history("c1", 1).unwrap();

        // Exactly one open interval.
        let open = history.iter().filter(|i| i.end_ts.is_none()).count();
        prop_assert_eq!(open, 1);
        prop_assert!(history.last().unwrap().end_ts.is_none());

        // Intervals are ordered and non-overlapping: each closed interval
        // ends no later than the next one starts.
        for pair in history.windows(2) {
            let end = pair[0].end_ts.unwrap();
            prop_assert!(pair[0].start_ts <= end);
            prop_assert!(end <= pair[1].start_ts);
        }
    }
}

// =============================================================================
// DEDUP INVARIANTS
// =============================================================================

proptest! {
    #[test]
    fn reimport_is_idempotent(messages in arb_sequence(40)) {
        let mut store = Store::open_in_memory().unwrap();
        store
            .begin_corpus(
                "c1",
                &ChatMeta::new("Dedup", Platform::ChatLab, ChatKind::Group),
                0,
            )
            .unwrap();

        let to_raw = |messages: &[(String, i64, String)]| -> Vec<RawMessage> {
            messages
                .iter()
                .map(|(sender, ts, text)| {
                    RawMessage::new(sender.clone(), *ts, MessageKind::Text)
                        .with_content(text.clone())
                })
                .collect()
        };

        let mut norm = Normalizer::new();
        let batch = norm.ingest_batch(to_raw(&messages));
        let first_count = batch.messages.len() as u64;
        store.write_batch("c1", &batch).unwrap();
        store
            .finalize_import("c1", ChatKind::Group, &norm.finish(None))
            .unwrap();

        // Second pass over the same data: everything deduplicates.
        let mut norm = Normalizer::new();
        store.seed_normalizer("c1", &mut norm).unwrap();
        let batch = norm.ingest_batch(to_raw(&messages));
        prop_assert!(batch.messages.is_empty());
        prop_assert_eq!(batch.duplicates_skipped, messages.len() as u64);
        prop_assert!(first_count <= messages.len() as u64);
    }
}

//! End-to-end scenarios: import real fixture files through the full
//! pipeline and check the derived statistics.

use chatlens::analytics::{self, CatchphraseParams, ChainParams, QueryOpts, StreakParams};
use chatlens::event::{CancelToken, ParseOptions};
use chatlens::import::run_import;
use chatlens::progress::no_progress;
use chatlens::store::sql::{DEFAULT_MAX_ROWS, run_readonly_sql};
use chatlens::store::{Store, migrations};
use chatlens::types::{ChatKind, Platform};

use chrono::NaiveDate;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_fixture(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn import(store: &mut Store, path: &PathBuf, tz_offset: i32) -> chatlens::import::ImportReport {
    let options = ParseOptions::new().with_tz_offset_secs(tz_offset);
    run_import(store, path, &options, &no_progress()).unwrap()
}

// ============================================================================
// Scenario A: LINE English group
// ============================================================================

#[test]
fn scenario_a_line_english_group() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "line.txt",
        "[LINE] Chat history in MyGroup\nSaved on: 2025/01/02 10:00\n\n2025/01/02 Friday\n10:15\tAlice\thi\n",
    );
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let corpus = store.corpus(&report.corpus_id).unwrap().unwrap();
    assert_eq!(corpus.platform, Platform::Line);
    assert_eq!(corpus.kind, ChatKind::Group);
    assert_eq!(corpus.name, "MyGroup");
    assert_eq!(corpus.message_count, 1);

    let members = store.members(&report.corpus_id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].display_name(), "Alice");

    // 2025-01-02 10:15 local, imported at offset 0.
    let expected_ts = NaiveDate::from_ymd_opt(2025, 1, 2)
        .unwrap()
        .and_hms_opt(10, 15, 0)
        .unwrap()
        .and_utc()
        .timestamp();
    let (ts, content): (i64, String) = store
        .conn()
        .query_row("SELECT ts, content FROM message", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(ts, expected_ts);
    assert_eq!(content, "hi");
}

// ============================================================================
// Scenario B: monologue streaks
// ============================================================================

fn jsonl_fixture(messages: &[(&str, i64, &str)]) -> String {
    let mut out = String::from(
        "{\"type\": \"meta\", \"name\": \"Fixture\", \"platform\": \"chatlab\", \"chatType\": \"group\"}\n",
    );
    for (i, (sender, ts, content)) in messages.iter().enumerate() {
        out.push_str(&format!(
            "{{\"type\": \"message\", \"id\": \"m{i}\", \"senderId\": \"{sender}\", \"senderName\": \"{sender}\", \"ts\": {ts}, \"kind\": \"text\", \"content\": \"{content}\"}}\n",
        ));
    }
    out
}

#[test]
fn scenario_b_monologue_streaks() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "streaks.jsonl",
        &jsonl_fixture(&[
            ("A", 0, "m"),
            ("A", 60, "m2"),
            ("A", 120, "m3"),
            ("B", 130, "x"),
            ("A", 200, "m4"),
            ("A", 260, "m5"),
            ("A", 320, "m6"),
            ("A", 380, "m7"),
        ]),
    );
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let streaks = analytics::monologue_streaks(
        &store,
        &report.corpus_id,
        &QueryOpts::new(),
        StreakParams::default(),
    )
    .unwrap();

    let a = streaks.members.iter().find(|m| m.name == "A").unwrap();
    assert_eq!(a.total_streaks, 2);
    assert_eq!(a.max_combo, 4);
    assert_eq!(a.low_streak, 2);
    assert_eq!(a.mid_streak, 0);
    assert_eq!(a.high_streak, 0);

    let record = streaks.max_combo_record.unwrap();
    assert_eq!(record.combo_length, 4);
    assert_eq!(record.start_ts, 200);
}

// ============================================================================
// Scenario C: repeat chain
// ============================================================================

#[test]
fn scenario_c_repeat_chain() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "chain.jsonl",
        &jsonl_fixture(&[
            ("A", 0, "gg"),
            ("B", 10, "gg"),
            ("C", 20, "gg"),
            ("D", 25, "stop"),
        ]),
    );
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let chains = analytics::repeat_chains(
        &store,
        &report.corpus_id,
        &QueryOpts::new(),
        ChainParams::default(),
    )
    .unwrap();

    assert_eq!(chains.total_chains, 1);
    assert_eq!(chains.chain_length_distribution.get(&3), Some(&1));

    let by_name = |name: &str| chains.members.iter().find(|m| m.name == name).unwrap();
    assert_eq!(by_name("A").originated, 1);
    assert_eq!(by_name("B").initiated, 1);
    assert_eq!(by_name("D").broken, 1);

    assert_eq!(chains.hot_contents[0].content, "gg");
    assert_eq!(chains.hot_contents[0].max_chain_length, 3);
}

// ============================================================================
// Scenario D: dragon king across a timezone boundary
// ============================================================================

#[test]
fn scenario_d_dragon_king_uses_corpus_timezone() {
    const DAY: i64 = 86400;
    let dir = TempDir::new().unwrap();
    // Messages at 23:00 UTC of day 0 and 01:00/01:01 UTC of day 1.
    let path = write_fixture(
        &dir,
        "dragon.jsonl",
        &jsonl_fixture(&[
            ("A", DAY - 3600, "late"),
            ("B", DAY + 3600, "b1"),
            ("B", DAY + 3700, "b2"),
        ]),
    );

    // Imported as UTC: two separate days, A wins day 0, B day 1.
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);
    let dragon = analytics::dragon_king(&store, &report.corpus_id, &QueryOpts::new()).unwrap();
    assert_eq!(dragon.total_days, 2);

    // The same instants bucketed at UTC+9 share one local day; B wins it
    // (2 messages to 1) and A gets nothing.
    store
        .conn()
        .execute("UPDATE meta SET tz_offset_secs = 32400", [])
        .unwrap();
    let dragon = analytics::dragon_king(&store, &report.corpus_id, &QueryOpts::new()).unwrap();
    assert_eq!(dragon.total_days, 1);
    assert_eq!(dragon.entries.len(), 1);
    assert_eq!(dragon.entries[0].name, "B");
    assert_eq!(dragon.entries[0].days_won, 1);
}

// ============================================================================
// Scenario E: migration from an old on-disk schema
// ============================================================================

#[test]
fn scenario_e_migration_adds_roles_with_default() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("old.db");

    // Hand-build a version-1-era database: member has no roles column yet.
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (
                corpus_id TEXT PRIMARY KEY, name TEXT NOT NULL, platform TEXT NOT NULL,
                chat_kind TEXT NOT NULL, min_ts INTEGER, max_ts INTEGER,
                message_count INTEGER NOT NULL DEFAULT 0,
                member_count INTEGER NOT NULL DEFAULT 0,
                tz_offset_secs INTEGER NOT NULL DEFAULT 0,
                partial INTEGER NOT NULL DEFAULT 0,
                schema_version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE member (
                corpus_id TEXT NOT NULL, id INTEGER NOT NULL, platform_id TEXT NOT NULL,
                account_name TEXT, group_nickname TEXT,
                aliases TEXT NOT NULL DEFAULT '[]', avatar TEXT,
                PRIMARY KEY (corpus_id, id), UNIQUE (corpus_id, platform_id)
            );
            CREATE TABLE message (
                corpus_id TEXT NOT NULL, id INTEGER NOT NULL, sender_id INTEGER NOT NULL,
                ts INTEGER NOT NULL, type TEXT NOT NULL, content TEXT,
                reply_to_message_id INTEGER, platform_message_id TEXT, extra TEXT,
                PRIMARY KEY (corpus_id, id)
            );
            CREATE TABLE name_history (
                corpus_id TEXT NOT NULL, member_id INTEGER NOT NULL, name TEXT NOT NULL,
                start_ts INTEGER NOT NULL, end_ts INTEGER
            );
            INSERT INTO meta (corpus_id, name, platform, chat_kind)
                VALUES ('c1', 'Old', 'line', 'group');
            INSERT INTO member (corpus_id, id, platform_id, account_name)
                VALUES ('c1', 1, 'u1', 'Alice');
            PRAGMA user_version = 1;",
        )
        .unwrap();
    }

    let store = Store::open(&db_path).unwrap();

    let version: i64 = store
        .conn()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, migrations::latest_version());

    // The migrated member table has roles defaulting to [] and the old
    // row survived.
    let members = store.members("c1").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].account_name.as_deref(), Some("Alice"));
    assert!(members[0].roles.is_empty());

    let roles_raw: String = store
        .conn()
        .query_row(
            "SELECT roles FROM member WHERE corpus_id = 'c1'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(roles_raw, "[]");
}

// ============================================================================
// Scenario F: SQL guardrail
// ============================================================================

#[test]
fn scenario_f_sql_guardrail_rejects_writes() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "chat.jsonl",
        &jsonl_fixture(&[("A", 0, "hello"), ("B", 10, "world")]),
    );
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let err = run_readonly_sql(
        &store,
        Some(&report.corpus_id),
        "DELETE FROM message",
        DEFAULT_MAX_ROWS,
    )
    .unwrap_err();
    assert!(matches!(err, chatlens::ChatlensError::RejectedSql { .. }));

    let count: i64 = store
        .conn()
        .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);

    // A scoped SELECT against the same corpus works and sees only its rows.
    let result = run_readonly_sql(
        &store,
        Some(&report.corpus_id),
        "SELECT COUNT(*) FROM message",
        DEFAULT_MAX_ROWS,
    )
    .unwrap();
    assert_eq!(result.rows[0][0], serde_json::Value::from(2));
}

// ============================================================================
// Round-trip and structural invariants
// ============================================================================

#[test]
fn roundtrip_native_jsonl_preserves_counts_and_members() {
    let dir = TempDir::new().unwrap();
    let fixture = jsonl_fixture(&[
        ("u1", 100, "one"),
        ("u2", 200, "two"),
        ("u1", 300, "three"),
        ("u3", 400, "four"),
    ]);
    let path = write_fixture(&dir, "native.jsonl", &fixture);

    let mut store = Store::open_in_memory().unwrap();
    let first = import(&mut store, &path, 0);
    assert_eq!(first.message_count, 4);

    let members_before: Vec<String> = store
        .members(&first.corpus_id)
        .unwrap()
        .into_iter()
        .map(|m| m.platform_id)
        .collect();

    // Re-import: same corpus, same counts, same member set.
    let second = import(&mut store, &path, 0);
    assert_eq!(second.corpus_id, first.corpus_id);
    assert_eq!(second.duplicates_skipped, 4);

    let corpus = store.corpus(&first.corpus_id).unwrap().unwrap();
    assert_eq!(corpus.message_count, 4);

    let members_after: Vec<String> = store
        .members(&first.corpus_id)
        .unwrap()
        .into_iter()
        .map(|m| m.platform_id)
        .collect();
    assert_eq!(members_before, members_after);
}

#[test]
fn message_ids_are_monotone_in_timestamp() {
    let dir = TempDir::new().unwrap();
    // An export with interleaved threads: timestamps arrive shuffled.
    let path = write_fixture(
        &dir,
        "shuffled.jsonl",
        &jsonl_fixture(&[
            ("A", 300, "c"),
            ("B", 100, "a"),
            ("A", 200, "b"),
            ("B", 400, "d"),
        ]),
    );
    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let mut stmt = store
        .conn()
        .prepare("SELECT ts FROM message WHERE corpus_id = ?1 ORDER BY id")
        .unwrap();
    let ts: Vec<i64> = stmt
        .query_map([&report.corpus_id], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ts, vec![100, 200, 300, 400]);
}

#[test]
fn name_history_partitions_member_lifetime() {
    let dir = TempDir::new().unwrap();
    let mut fixture = String::from(
        "{\"type\": \"meta\", \"name\": \"Renames\", \"platform\": \"chatlab\", \"chatType\": \"group\"}\n",
    );
    // One platform identity under three successive display names.
    for (i, (name, ts)) in [("Ann", 100), ("Ann", 200), ("Annie", 300), ("An", 400)]
        .iter()
        .enumerate()
    {
        fixture.push_str(&format!(
            "{{\"type\": \"message\", \"id\": \"m{i}\", \"senderId\": \"u1\", \"senderName\": \"{name}\", \"ts\": {ts}, \"kind\": \"text\", \"content\": \"x\"}}\n",
        ));
    }
    let path = write_fixture(&dir, "renames.jsonl", &fixture);

    let mut store = Store::open_in_memory().unwrap();
    let report = import(&mut store, &path, 0);

    let history = store.name_history(&report.corpus_id, 1).unwrap();
    assert_eq!(history.len(), 3);

    // Exactly one open interval, and closed intervals chain together.
    let open: Vec<_> = history.iter().filter(|i| i.end_ts.is_none()).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].name, "An");

    assert_eq!(history[0].name, "Ann");
    assert_eq!(history[0].start_ts, 100);
    assert_eq!(history[0].end_ts, Some(200));
    assert_eq!(history[1].name, "Annie");
    assert_eq!(history[1].start_ts, 300);
    assert_eq!(history[1].end_ts, Some(300));
    assert_eq!(history[2].start_ts, 400);
}

#[test]
fn canceled_import_is_partial_with_consistent_counters() {
    let dir = TempDir::new().unwrap();
    // Enough messages for several batches.
    let contents: Vec<String> = (0..50).map(|i| format!("msg {i}")).collect();
    let messages: Vec<(&str, i64, &str)> = contents
        .iter()
        .enumerate()
        .map(|(i, content)| ("A", i as i64 * 10, content.as_str()))
        .collect();
    let path = write_fixture(&dir, "big.jsonl", &jsonl_fixture(&messages));

    let token = CancelToken::new();
    token.cancel();
    let options = ParseOptions::new()
        .with_tz_offset_secs(0)
        .with_batch_size(10)
        .with_cancel(token);

    let mut store = Store::open_in_memory().unwrap();
    let err = run_import(&mut store, &path, &options, &no_progress()).unwrap_err();
    assert!(err.is_canceled());

    // Whatever prefix committed is exactly what the counters describe.
    for corpus in store.list_corpora().unwrap() {
        assert!(corpus.partial);
        let rows: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM message WHERE corpus_id = ?1",
                [&corpus.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows as u64, corpus.message_count);
    }
}

// ============================================================================
// Cross-format smoke checks
// ============================================================================

#[test]
fn qq_and_wechat_imports_coexist() {
    let dir = TempDir::new().unwrap();
    let qq = write_fixture(
        &dir,
        "qq.txt",
        "消息分组:我的QQ群\n================\n消息对象:群聊\n================\n\n2023-05-01 12:00:00 Alice(1001)\n你好\n\n2023-05-01 12:01:00 Bob(1002)\n[图片]\n",
    );
    let wechat = write_fixture(
        &dir,
        "wechat.json",
        r#"[
  {"talker": "wxid_a", "nickName": "甲", "createTime": 1690000000, "content": "哈哈", "type": 1},
  {"talker": "wxid_b", "nickName": "乙", "createTime": 1690000050, "content": "哈哈", "type": 1}
]"#,
    );

    let mut store = Store::open_in_memory().unwrap();
    let qq_report = import(&mut store, &qq, 8 * 3600);
    let wechat_report = import(&mut store, &wechat, 8 * 3600);

    assert_ne!(qq_report.corpus_id, wechat_report.corpus_id);
    assert_eq!(store.list_corpora().unwrap().len(), 2);

    let qq_corpus = store.corpus(&qq_report.corpus_id).unwrap().unwrap();
    assert_eq!(qq_corpus.platform, Platform::Qq);
    assert_eq!(qq_corpus.message_count, 2);

    let activity =
        analytics::activity_ranking(&store, &wechat_report.corpus_id, &QueryOpts::new()).unwrap();
    assert_eq!(activity.total_messages, 2);

    let phrases = analytics::catchphrases(
        &store,
        &wechat_report.corpus_id,
        &QueryOpts::new(),
        CatchphraseParams::default(),
    )
    .unwrap();
    assert_eq!(phrases.members[0].catchphrases[0].content, "哈哈");
}

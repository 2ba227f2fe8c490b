//! Streaming normalization between parsers and the store.
//!
//! The normalizer canonicalizes sender identity, tracks name history,
//! resolves reply references, repairs batch ordering and deduplicates
//! re-imported messages — all with per-corpus maps that live only for the
//! duration of one import transaction.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::types::{ChatKind, MemberRecord, RawMessage, StoredMessage};

/// Cross-batch timestamp regressions smaller than this are tolerated
/// silently; larger ones produce a warning.
pub const INVERSION_TOLERANCE_SECS: i64 = 2;

/// A non-fatal observation made during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportWarning {
    /// A batch started earlier than the previous batch ended.
    TimestampInversion { prev_ts: i64, ts: i64 },
    /// Replies whose targets never arrived; preserved as platform ids.
    DanglingReplies { count: u64 },
}

impl std::fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportWarning::TimestampInversion { prev_ts, ts } => write!(
                f,
                "timestamp inversion across batches: {ts} after {prev_ts}"
            ),
            ImportWarning::DanglingReplies { count } => {
                write!(f, "{count} replies reference messages that never arrived")
            }
        }
    }
}

/// A name-history mutation to persist alongside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameEvent {
    /// First sighting of a member: open their first interval.
    Open {
        member_id: i64,
        name: String,
        start_ts: i64,
    },
    /// A member reappeared under a new display name: close the current
    /// interval at their previous message's timestamp, open a new one.
    Change {
        member_id: i64,
        close_at: i64,
        name: String,
        start_ts: i64,
    },
}

/// One batch after normalization, ready for bulk insert.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub messages: Vec<StoredMessage>,
    /// Members created while processing this batch, `(internal id, record)`
    pub new_members: Vec<(i64, MemberRecord)>,
    pub name_events: Vec<NameEvent>,
    pub duplicates_skipped: u64,
}

/// Late reply bindings discovered by the end-of-import second pass.
#[derive(Debug, Default)]
pub struct FinishReport {
    /// `(message internal id, target internal id)` pairs to update
    pub resolved_replies: Vec<(i64, i64)>,
    /// Members that never spoke: open their interval at corpus start
    pub name_events: Vec<NameEvent>,
    pub warnings: Vec<ImportWarning>,
}

#[derive(Debug)]
struct MemberState {
    id: i64,
    current_name: String,
    /// Timestamp of this member's latest message, if any
    last_ts: Option<i64>,
    /// Whether an open name interval exists yet
    interval_open: bool,
}

/// Per-import normalization state.
///
/// Owned by the import worker; never shared. Seed methods exist so a
/// re-import can start from the corpus's persisted members, reply index
/// and dedup keys.
pub struct Normalizer {
    members: HashMap<String, MemberState>,
    next_member_id: i64,
    next_message_id: i64,
    reply_index: HashMap<String, i64>,
    /// `(message id, target platform id)` awaiting the second pass
    pending_replies: Vec<(i64, String)>,
    dedup: HashSet<[u8; 32]>,
    last_batch_max_ts: Option<i64>,
    warnings: Vec<ImportWarning>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            next_member_id: 1,
            next_message_id: 1,
            reply_index: HashMap::new(),
            pending_replies: Vec::new(),
            dedup: HashSet::new(),
            last_batch_max_ts: None,
            warnings: Vec::new(),
        }
    }

    /// Seeds an existing member (re-import path).
    pub fn seed_member(&mut self, platform_id: &str, id: i64, current_name: &str) {
        self.members.insert(
            platform_id.to_string(),
            MemberState {
                id,
                current_name: current_name.to_string(),
                last_ts: None,
                interval_open: true,
            },
        );
        self.next_member_id = self.next_member_id.max(id + 1);
    }

    /// Seeds the reply index with a persisted platform message id.
    pub fn seed_reply_target(&mut self, platform_message_id: &str, message_id: i64) {
        self.reply_index
            .insert(platform_message_id.to_string(), message_id);
    }

    /// Seeds a dedup key from a persisted message.
    pub fn seed_existing_message(&mut self, ts: i64, sender_key: &str, content: Option<&str>) {
        self.dedup.insert(dedup_key(ts, sender_key, content));
    }

    /// Continues id assignment after the corpus's current maximum.
    pub fn start_message_ids_at(&mut self, next_id: i64) {
        self.next_message_id = next_id;
    }

    /// Number of distinct members seen so far.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Fallback chat-kind determination from the distinct sender count,
    /// applied only when the parser marked its own kind as inferred.
    pub fn inferred_kind(&self) -> ChatKind {
        if self.members.len() <= 2 {
            ChatKind::Private
        } else {
            ChatKind::Group
        }
    }

    /// Registers roster members ahead of any messages.
    pub fn ingest_roster(&mut self, records: Vec<MemberRecord>) -> Vec<(i64, MemberRecord)> {
        let mut created = Vec::new();
        for record in records {
            if record.platform_id.is_empty() || self.members.contains_key(&record.platform_id) {
                continue;
            }
            let id = self.next_member_id;
            self.next_member_id += 1;
            self.members.insert(
                record.platform_id.clone(),
                MemberState {
                    id,
                    current_name: record.display_name().to_string(),
                    last_ts: None,
                    interval_open: false,
                },
            );
            created.push((id, record));
        }
        created
    }

    /// Normalizes one parser batch.
    pub fn ingest_batch(&mut self, mut batch: Vec<RawMessage>) -> NormalizedBatch {
        // Reorder within the batch when the export interleaved threads.
        let monotonic = batch.windows(2).all(|w| w[0].ts <= w[1].ts);
        if !monotonic {
            batch.sort_by(|a, b| {
                a.ts.cmp(&b.ts)
                    .then_with(|| a.platform_message_id.cmp(&b.platform_message_id))
            });
        }

        // Cross-batch inversions beyond the tolerance are warnings.
        if let (Some(prev), Some(first)) = (self.last_batch_max_ts, batch.first()) {
            if first.ts + INVERSION_TOLERANCE_SECS < prev {
                self.warnings.push(ImportWarning::TimestampInversion {
                    prev_ts: prev,
                    ts: first.ts,
                });
            }
        }
        if let Some(last) = batch.last() {
            let max = self.last_batch_max_ts.unwrap_or(i64::MIN);
            self.last_batch_max_ts = Some(max.max(last.ts));
        }

        let mut out = NormalizedBatch::default();
        for msg in batch {
            let key = dedup_key(msg.ts, msg.sender_key(), msg.content.as_deref());
            if !self.dedup.insert(key) {
                out.duplicates_skipped += 1;
                continue;
            }

            let sender_id = self.resolve_member(&msg, &mut out);
            let id = self.next_message_id;
            self.next_message_id += 1;

            if let Some(pmid) = msg.platform_message_id.as_deref() {
                self.reply_index.insert(pmid.to_string(), id);
            }

            let (reply_to_message_id, reply_to_platform_id) = match msg.reply_to.as_deref() {
                None => (None, None),
                Some(target) => match self.reply_index.get(target) {
                    Some(&resolved) => (Some(resolved), Some(target.to_string())),
                    None => {
                        self.pending_replies.push((id, target.to_string()));
                        (None, Some(target.to_string()))
                    }
                },
            };

            out.messages.push(StoredMessage {
                id,
                sender_id,
                ts: msg.ts,
                kind: msg.kind,
                content: msg.content,
                reply_to_message_id,
                reply_to_platform_id,
                platform_message_id: msg.platform_message_id,
                extra: msg.extra.map(|v| v.to_string()),
            });
        }
        out
    }

    /// Maps a message's sender onto an internal member id, creating the
    /// member and maintaining name history.
    fn resolve_member(&mut self, msg: &RawMessage, out: &mut NormalizedBatch) -> i64 {
        let key = msg.sender_key().to_string();
        if let Some(state) = self.members.get_mut(&key) {
            if !state.interval_open {
                out.name_events.push(NameEvent::Open {
                    member_id: state.id,
                    name: state.current_name.clone(),
                    start_ts: msg.ts,
                });
                state.interval_open = true;
            }
            if state.current_name != msg.sender_name && !msg.sender_name.is_empty() {
                let close_at = state.last_ts.unwrap_or(msg.ts);
                out.name_events.push(NameEvent::Change {
                    member_id: state.id,
                    close_at,
                    name: msg.sender_name.clone(),
                    start_ts: msg.ts,
                });
                state.current_name = msg.sender_name.clone();
            }
            state.last_ts = Some(msg.ts);
            return state.id;
        }

        let id = self.next_member_id;
        self.next_member_id += 1;
        let record = MemberRecord {
            platform_id: key.clone(),
            account_name: Some(msg.sender_name.clone()),
            group_nickname: None,
            aliases: Vec::new(),
            roles: Vec::new(),
            avatar: None,
        };
        out.new_members.push((id, record));
        out.name_events.push(NameEvent::Open {
            member_id: id,
            name: msg.sender_name.clone(),
            start_ts: msg.ts,
        });
        self.members.insert(
            key,
            MemberState {
                id,
                current_name: msg.sender_name.clone(),
                last_ts: Some(msg.ts),
                interval_open: true,
            },
        );
        id
    }

    /// End-of-import second pass: bind late-arriving reply targets and open
    /// intervals for roster members that never spoke. Unbound replies stay
    /// dangling (the platform id is already persisted).
    pub fn finish(&mut self, corpus_start_ts: Option<i64>) -> FinishReport {
        let mut report = FinishReport {
            warnings: std::mem::take(&mut self.warnings),
            ..FinishReport::default()
        };

        let mut dangling = 0u64;
        for (message_id, target) in &self.pending_replies {
            match self.reply_index.get(target) {
                Some(&resolved) => report.resolved_replies.push((*message_id, resolved)),
                None => dangling += 1,
            }
        }
        if dangling > 0 {
            report
                .warnings
                .push(ImportWarning::DanglingReplies { count: dangling });
        }

        let start = corpus_start_ts.unwrap_or(0);
        let mut silent: Vec<&MemberState> = self
            .members
            .values()
            .filter(|s| !s.interval_open)
            .collect();
        silent.sort_by_key(|s| s.id);
        for state in silent {
            report.name_events.push(NameEvent::Open {
                member_id: state.id,
                name: state.current_name.clone(),
                start_ts: start,
            });
        }

        report
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedup key over `(timestamp, sender platform id, content)`.
fn dedup_key(ts: i64, sender_key: &str, content: Option<&str>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ts.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(sender_key.as_bytes());
    hasher.update([0u8]);
    if let Some(content) = content {
        hasher.update(content.as_bytes());
    }
    hasher.finalize().into()
}

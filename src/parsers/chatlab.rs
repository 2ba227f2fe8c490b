//! Parser for the native ChatLab JSON and JSONL exports.
//!
//! The JSON form is one document:
//!
//! ```json
//! {
//!   "name": "MyGroup",
//!   "platform": "line",
//!   "chatType": "group",
//!   "members": [{"platformId": "u1", "accountName": "Alice"}],
//!   "messages": [{"id": "m1", "senderId": "u1", "ts": 1735814100,
//!                 "kind": "text", "content": "hi"}]
//! }
//! ```
//!
//! The JSONL form carries the same records one per line, tagged with
//! `"type": "meta" | "member" | "message"`. Both already store UTC seconds,
//! so no timezone conversion happens here. This is the round-trip format:
//! re-importing a native export reproduces the member set and message
//! count.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatlensError, Result};
use crate::event::{CancelToken, ParseEvent, ParseOptions, StreamProgress};
use crate::sniffer;
use crate::types::{ChatKind, ChatMeta, MemberRecord, MessageKind, Platform, RawMessage};

use super::json::JsonScanner;
use super::{EventStream, FormatParser};

/// Parser for ChatLab native JSON / JSONL exports.
pub struct ChatLabParser;

impl ChatLabParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChatLabParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for ChatLabParser {
    fn id(&self) -> &'static str {
        "chatlab-json"
    }

    fn parse(&self, path: &Path, options: &ParseOptions) -> Result<Box<dyn EventStream>> {
        let jsonl = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));
        if jsonl {
            Ok(Box::new(JsonlStream::new(path, options)?))
        } else {
            Ok(Box::new(JsonStream::new(path, options)?))
        }
    }
}

// ============================================================================
// Native record shapes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeMember {
    platform_id: String,
    #[serde(default)]
    account_name: Option<String>,
    #[serde(default)]
    group_nickname: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    avatar: Option<String>,
}

impl From<NativeMember> for MemberRecord {
    fn from(m: NativeMember) -> Self {
        MemberRecord {
            platform_id: m.platform_id,
            account_name: m.account_name,
            group_nickname: m.group_nickname,
            aliases: m.aliases,
            roles: m.roles,
            avatar: m.avatar,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    sender_name: Option<String>,
    ts: i64,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    extra: Option<Value>,
}

impl NativeMessage {
    fn into_raw(self) -> Option<RawMessage> {
        let sender_name = self
            .sender_name
            .or_else(|| self.sender_id.clone())
            .filter(|s| !s.is_empty())?;
        let kind = self
            .kind
            .as_deref()
            .map(MessageKind::from_code)
            .unwrap_or(MessageKind::Text);

        let mut msg = RawMessage::new(sender_name, self.ts, kind);
        msg.sender_id = self.sender_id;
        msg.content = self.content;
        msg.reply_to = self.reply_to;
        msg.platform_message_id = self.id;
        msg.extra = self.extra;
        Some(msg)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonlRecord {
    #[serde(rename_all = "camelCase")]
    Meta {
        name: String,
        #[serde(default)]
        platform: Option<Platform>,
        #[serde(default)]
        chat_type: Option<ChatKind>,
    },
    Member {
        #[serde(flatten)]
        member: NativeMember,
    },
    Message {
        #[serde(flatten)]
        message: NativeMessage,
    },
}

/// Extracts the meta fields from the (already normalized) file head.
fn meta_from_head(head: &str, fallback_name: &str) -> ChatMeta {
    let field = |key: &str| -> Option<String> {
        let re = Regex::new(&format!(r#""{key}"\s*:\s*("(?:[^"\\]|\\.)*")"#)).ok()?;
        let caps = re.captures(head)?;
        serde_json::from_str::<String>(caps.get(1)?.as_str()).ok()
    };

    let name = field("name").unwrap_or_else(|| fallback_name.to_string());
    let platform = field("platform")
        .and_then(|p| p.parse::<Platform>().ok())
        .unwrap_or(Platform::ChatLab);
    match field("chatType").and_then(|k| k.parse::<ChatKind>().ok()) {
        Some(kind) => ChatMeta::new(name, platform, kind),
        None => ChatMeta::new(name, platform, ChatKind::Group).with_inferred_kind(),
    }
}

// ============================================================================
// JSON document stream
// ============================================================================

enum Stage {
    Meta,
    Members,
    Messages,
    Finished,
}

struct JsonStream {
    scanner: JsonScanner<BufReader<File>>,
    total_bytes: u64,
    path: PathBuf,
    batch_size: usize,
    progress_interval: usize,
    max_record_size: usize,
    cancel: CancelToken,

    stage: Stage,
    meta: ChatMeta,
    members: Vec<MemberRecord>,
    queued: VecDeque<ParseEvent>,
    senders: HashSet<String>,
    roster_len: u64,
    message_count: u64,
    since_progress: usize,
    skipped_records: u64,
}

impl JsonStream {
    fn new(path: &Path, options: &ParseOptions) -> Result<Self> {
        let head = sniffer::read_head(path)?;
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chat".to_string());
        let meta = meta_from_head(&head, &fallback_name);

        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let mut scanner = JsonScanner::new(BufReader::with_capacity(64 * 1024, file));

        // The native layout writes members before messages; collect the
        // roster up front (it is small), then continue to the messages
        // array in the same pass.
        let mut members = Vec::new();
        let mut skipped_records = 0u64;
        let mut in_messages = false;
        if scanner.find_key_array("members")? {
            while let Some(raw) = scanner.next_array_object(options.max_record_size)? {
                match serde_json::from_str::<NativeMember>(&raw) {
                    Ok(member) => members.push(MemberRecord::from(member)),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed member record");
                        skipped_records += 1;
                    }
                }
            }
            // Still inside the top-level object, so its keys are now at
            // relative depth 0.
            in_messages = scanner.find_key_array_at("messages", 0)?;
        }
        if !in_messages {
            // No roster, or messages precede members: restart the scan.
            let file = File::open(path)?;
            scanner = JsonScanner::new(BufReader::with_capacity(64 * 1024, file));
            in_messages = scanner.find_key_array("messages")?;
        }
        if !in_messages {
            return Err(ChatlensError::parse_header(
                "ChatLab JSON",
                "missing \"messages\" array",
                Some(path.to_path_buf()),
            ));
        }

        let roster_len = members.len() as u64;
        Ok(Self {
            scanner,
            total_bytes,
            path: path.to_path_buf(),
            batch_size: options.batch_size,
            progress_interval: options.progress_interval,
            max_record_size: options.max_record_size,
            cancel: options.cancel.clone(),
            stage: Stage::Meta,
            meta,
            members,
            queued: VecDeque::new(),
            senders: HashSet::new(),
            roster_len,
            message_count: 0,
            since_progress: 0,
            skipped_records,
        })
    }

    fn pump(&mut self) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(ChatlensError::Canceled);
        }

        let mut batch: Vec<RawMessage> = Vec::with_capacity(self.batch_size);
        let mut done = false;
        while batch.len() < self.batch_size {
            match self.scanner.next_array_object(self.max_record_size) {
                Ok(Some(raw)) => match serde_json::from_str::<NativeMessage>(&raw) {
                    Ok(native) => match native.into_raw() {
                        Some(msg) => {
                            self.senders.insert(msg.sender_key().to_string());
                            batch.push(msg);
                        }
                        None => self.skipped_records += 1,
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed message record");
                        self.skipped_records += 1;
                    }
                },
                Ok(None) => {
                    done = true;
                    break;
                }
                Err(ChatlensError::UnexpectedEof { .. }) => {
                    // Truncated top-level JSON is structural.
                    return Err(ChatlensError::parse_other(
                        "ChatLab JSON",
                        "truncated messages array",
                        Some(self.path.clone()),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        self.message_count += batch.len() as u64;
        self.since_progress += batch.len();
        if !batch.is_empty() {
            self.queued.push_back(ParseEvent::Messages(batch));
        }
        if self.since_progress >= self.progress_interval {
            self.since_progress = 0;
            self.queued.push_back(ParseEvent::Progress(StreamProgress::new(
                self.scanner.bytes_read(),
                Some(self.total_bytes),
                self.message_count,
            )));
        }
        if done {
            let member_count = if self.roster_len > 0 {
                self.roster_len
            } else {
                self.senders.len() as u64
            };
            self.queued.push_back(ParseEvent::Done {
                message_count: self.message_count,
                member_count,
            });
        }
        Ok(())
    }
}

impl Iterator for JsonStream {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                if matches!(event, ParseEvent::Done { .. }) {
                    self.stage = Stage::Finished;
                }
                return Some(Ok(event));
            }
            match self.stage {
                Stage::Meta => {
                    self.stage = Stage::Members;
                    return Some(Ok(ParseEvent::Meta(self.meta.clone())));
                }
                Stage::Members => {
                    self.stage = Stage::Messages;
                    return Some(Ok(ParseEvent::Members(std::mem::take(&mut self.members))));
                }
                Stage::Messages => match self.pump() {
                    Ok(()) => {}
                    Err(e) => {
                        self.stage = Stage::Finished;
                        return Some(Err(e));
                    }
                },
                Stage::Finished => return None,
            }
        }
    }
}

impl EventStream for JsonStream {
    fn bytes_processed(&self) -> u64 {
        self.scanner.bytes_read()
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(self.total_bytes)
    }

    fn records_skipped(&self) -> u64 {
        self.skipped_records
    }
}

// ============================================================================
// JSONL stream
// ============================================================================

struct JsonlStream {
    reader: BufReader<File>,
    total_bytes: u64,
    bytes_read: u64,
    batch_size: usize,
    progress_interval: usize,
    max_record_size: usize,
    cancel: CancelToken,

    stage: Stage,
    meta: ChatMeta,
    members: Vec<MemberRecord>,
    roster_total: u64,
    lookahead_message: Option<RawMessage>,
    queued: VecDeque<ParseEvent>,
    senders: HashSet<String>,
    message_count: u64,
    since_progress: usize,
    skipped_records: u64,
    eof: bool,
}

impl JsonlStream {
    fn new(path: &Path, options: &ParseOptions) -> Result<Self> {
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(64 * 1024, file);
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chat".to_string());

        // The first record must be the meta line.
        let mut bytes_read = 0u64;
        let mut first = String::new();
        let n = reader.read_line(&mut first)?;
        bytes_read += n as u64;
        let first = first.trim_start_matches('\u{feff}').trim();
        let meta = match serde_json::from_str::<JsonlRecord>(first) {
            Ok(JsonlRecord::Meta {
                name,
                platform,
                chat_type,
            }) => {
                let platform = platform.unwrap_or(Platform::ChatLab);
                match chat_type {
                    Some(kind) => ChatMeta::new(name, platform, kind),
                    None => ChatMeta::new(name, platform, ChatKind::Group).with_inferred_kind(),
                }
            }
            _ => {
                return Err(ChatlensError::parse_header(
                    "ChatLab JSONL",
                    "first record is not a meta line",
                    Some(path.to_path_buf()),
                ));
            }
        };

        Ok(Self {
            reader,
            total_bytes,
            bytes_read,
            batch_size: options.batch_size,
            progress_interval: options.progress_interval,
            max_record_size: options.max_record_size,
            cancel: options.cancel.clone(),
            stage: Stage::Meta,
            meta,
            members: Vec::new(),
            roster_total: 0,
            lookahead_message: None,
            queued: VecDeque::new(),
            senders: HashSet::new(),
            message_count: 0,
            since_progress: 0,
            skipped_records: 0,
            eof: false,
        })
    }

    /// Reads records until the next message (or EOF), collecting member
    /// lines along the way.
    fn next_message(&mut self) -> Result<Option<RawMessage>> {
        if let Some(msg) = self.lookahead_message.take() {
            return Ok(Some(msg));
        }
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            self.bytes_read += n as u64;
            if line.len() > self.max_record_size {
                self.skipped_records += 1;
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonlRecord>(trimmed) {
                Ok(JsonlRecord::Member { member }) => {
                    self.members.push(MemberRecord::from(member));
                }
                Ok(JsonlRecord::Message { message }) => match message.into_raw() {
                    Some(msg) => return Ok(Some(msg)),
                    None => self.skipped_records += 1,
                },
                Ok(JsonlRecord::Meta { .. }) => {
                    // Duplicate meta lines are malformed records, not fatal.
                    self.skipped_records += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed JSONL record");
                    self.skipped_records += 1;
                }
            }
        }
    }

    fn pump(&mut self) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(ChatlensError::Canceled);
        }

        let mut batch: Vec<RawMessage> = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_message()? {
                Some(msg) => {
                    self.senders.insert(msg.sender_key().to_string());
                    batch.push(msg);
                }
                None => break,
            }
        }

        self.message_count += batch.len() as u64;
        self.since_progress += batch.len();
        if !batch.is_empty() {
            self.queued.push_back(ParseEvent::Messages(batch));
        }
        if self.since_progress >= self.progress_interval {
            self.since_progress = 0;
            self.queued.push_back(ParseEvent::Progress(StreamProgress::new(
                self.bytes_read,
                Some(self.total_bytes),
                self.message_count,
            )));
        }
        if self.eof {
            let member_count = if self.members_roster_len() > 0 {
                self.members_roster_len()
            } else {
                self.senders.len() as u64
            };
            self.queued.push_back(ParseEvent::Done {
                message_count: self.message_count,
                member_count,
            });
        }
        Ok(())
    }

    fn members_roster_len(&self) -> u64 {
        self.roster_total
    }
}

impl Iterator for JsonlStream {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                if matches!(event, ParseEvent::Done { .. }) {
                    self.stage = Stage::Finished;
                }
                return Some(Ok(event));
            }
            match self.stage {
                Stage::Meta => {
                    self.stage = Stage::Members;
                    return Some(Ok(ParseEvent::Meta(self.meta.clone())));
                }
                Stage::Members => {
                    // Member lines precede messages in native JSONL; pull
                    // until the first message so the roster event is
                    // complete, keeping the message for the first batch.
                    match self.next_message() {
                        Ok(first) => {
                            self.lookahead_message = first;
                            self.stage = Stage::Messages;
                            let roster = std::mem::take(&mut self.members);
                            self.roster_total = roster.len() as u64;
                            return Some(Ok(ParseEvent::Members(roster)));
                        }
                        Err(e) => {
                            self.stage = Stage::Finished;
                            return Some(Err(e));
                        }
                    }
                }
                Stage::Messages => match self.pump() {
                    Ok(()) => {}
                    Err(e) => {
                        self.stage = Stage::Finished;
                        return Some(Err(e));
                    }
                },
                Stage::Finished => return None,
            }
        }
    }
}

impl EventStream for JsonlStream {
    fn bytes_processed(&self) -> u64 {
        self.bytes_read
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(self.total_bytes)
    }

    fn records_skipped(&self) -> u64 {
        self.skipped_records
    }
}

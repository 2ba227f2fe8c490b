//! Parser for QQ native TXT exports (and the common third-party dump
//! variant).
//!
//! QQ message-manager exports look like:
//!
//! ```text
//! 消息分组:我的QQ群
//! ================================================================
//! 消息对象:测试群
//! ================================================================
//!
//! 2023-05-01 12:00:00 Alice(12345678)
//! hello
//!
//! 2023-05-01 12:01:00 Bob<bob@qq.com>
//! [图片]
//! ```
//!
//! A record is a header line (timestamp + sender with uin or email) followed
//! by content lines up to the next header. The uin/email is the platform
//! id; the part before the bracket is the display name.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{ChatlensError, Result};
use crate::event::{ParseEvent, ParseOptions, StreamProgress};
use crate::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

use super::{EventStream, FormatParser, local_to_utc_secs};

/// Parser for QQ TXT exports.
pub struct QqParser;

impl QqParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for QqParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for QqParser {
    fn id(&self) -> &'static str {
        "qq-txt"
    }

    fn parse(&self, path: &Path, options: &ParseOptions) -> Result<Box<dyn EventStream>> {
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let reader = BufReader::with_capacity(64 * 1024, file);
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "QQ chat".to_string());

        Ok(Box::new(QqStream::new(
            reader,
            total_bytes,
            fallback_name,
            options,
        )?))
    }
}

/// Message-manager system account and notice fragments.
const SYSTEM_SENDERS: &[&str] = &["系统消息", "系統消息", "System Message"];
const SYSTEM_FRAGMENTS: &[&str] = &[
    "加入本群",
    "退出本群",
    "被移出本群",
    "撤回了一条消息",
    "撤回了一條消息",
    "修改了群名称",
    "邀请",
    "成为本群管理员",
    "群公告",
];

fn classify_content(content: &str) -> MessageKind {
    match content.trim() {
        "[图片]" | "[圖片]" | "[闪照]" => return MessageKind::Image,
        "[表情]" | "[动画表情]" => return MessageKind::Sticker,
        "[语音]" | "[语音消息]" | "[語音]" => return MessageKind::Voice,
        "[视频]" | "[视频文件]" | "[視頻]" => return MessageKind::Video,
        "[文件]" | "[檔案]" => return MessageKind::File,
        "[位置]" | "[定位]" => return MessageKind::Location,
        "[红包]" | "[转账]" => return MessageKind::Other,
        trimmed if trimmed.starts_with("http://") || trimmed.starts_with("https://") => {
            return MessageKind::Link;
        }
        _ => {}
    }
    MessageKind::Text
}

fn is_system(sender_name: &str, content: &str) -> bool {
    SYSTEM_SENDERS.iter().any(|s| sender_name == *s)
        || SYSTEM_FRAGMENTS.iter().any(|frag| content.contains(frag))
}

/// Splits `Alice(12345678)` / `Bob<bob@qq.com>` into name + platform id.
fn split_sender(raw: &str) -> (String, String) {
    let raw = raw.trim();
    for (open, close) in [('(', ')'), ('（', '）'), ('<', '>')] {
        if raw.ends_with(close) {
            if let Some(idx) = raw.rfind(open) {
                let name = raw[..idx].trim();
                let id = raw[idx + open.len_utf8()..raw.len() - close.len_utf8()].trim();
                if !id.is_empty() {
                    let name = if name.is_empty() { id } else { name };
                    return (name.to_string(), id.to_string());
                }
            }
        }
    }
    (raw.to_string(), raw.to_string())
}

#[derive(Debug, Default)]
struct PendingRecord {
    sender_name: String,
    platform_id: String,
    ts: i64,
    lines: Vec<String>,
}

impl PendingRecord {
    fn is_empty(&self) -> bool {
        self.platform_id.is_empty()
    }

    fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    fn into_message(self) -> Option<RawMessage> {
        if self.is_empty() {
            return None;
        }
        // Trim trailing blank separator lines but keep interior ones.
        let mut lines = self.lines;
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        let content = lines.join("\n");

        let kind = if is_system(&self.sender_name, &content) {
            MessageKind::System
        } else {
            classify_content(&content)
        };

        Some(
            RawMessage::new(self.sender_name, self.ts, kind)
                .with_sender_id(self.platform_id)
                .with_content(content),
        )
    }
}

enum Stage {
    Meta,
    Members,
    Messages,
    Finished,
}

/// Event stream over a QQ TXT export.
struct QqStream {
    reader: BufReader<File>,
    total_bytes: u64,
    bytes_read: u64,
    batch_size: usize,
    progress_interval: usize,
    max_record_size: usize,
    cancel: crate::event::CancelToken,
    tz_offset_secs: i32,

    stage: Stage,
    meta: ChatMeta,
    queued: VecDeque<ParseEvent>,
    lookahead: Option<String>,
    pending: PendingRecord,
    header_re: Regex,
    senders: HashSet<String>,
    message_count: u64,
    since_progress: usize,
    skipped_records: u64,
    eof: bool,
}

impl QqStream {
    fn new(
        mut reader: BufReader<File>,
        total_bytes: u64,
        fallback_name: String,
        options: &ParseOptions,
    ) -> Result<Self> {
        let header_re = Regex::new(
            r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})\s+(\d{1,2}):(\d{2}):(\d{2})\s+(.+)$",
        )
        .expect("static regex");

        let mut bytes_read = 0u64;
        let mut name: Option<String> = None;
        let mut kind: Option<ChatKind> = None;
        let mut lookahead = None;

        // Preamble: 消息分组 / 消息对象 lines separated by ==== rules.
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            let cleaned = clean_line(&line, bytes_read == n as u64);
            let trimmed = cleaned.trim();

            // Blank lines and ==== rule lines separate the preamble.
            if trimmed.is_empty() || trimmed.chars().all(|c| c == '=') {
                continue;
            }
            if let Some(value) = strip_label(trimmed, &["消息分组", "訊息分組"]) {
                kind = Some(if value.contains('群') {
                    ChatKind::Group
                } else if value.contains("好友") || value.contains("朋友") {
                    ChatKind::Private
                } else {
                    kind.unwrap_or(ChatKind::Group)
                });
                continue;
            }
            if let Some(value) = strip_label(trimmed, &["消息对象", "訊息對象", "消息記錄"]) {
                name = Some(value.to_string());
                continue;
            }
            lookahead = Some(cleaned);
            break;
        }

        let explicit = name.is_some() && kind.is_some();
        let meta = ChatMeta {
            name: name.unwrap_or(fallback_name),
            platform: Platform::Qq,
            kind: kind.unwrap_or(ChatKind::Group),
            kind_explicit: explicit,
        };

        Ok(Self {
            reader,
            total_bytes,
            bytes_read,
            batch_size: options.batch_size,
            progress_interval: options.progress_interval,
            max_record_size: options.max_record_size,
            cancel: options.cancel.clone(),
            tz_offset_secs: options.effective_tz_offset(),
            stage: Stage::Meta,
            meta,
            queued: VecDeque::new(),
            lookahead,
            pending: PendingRecord::default(),
            header_re,
            senders: HashSet::new(),
            message_count: 0,
            since_progress: 0,
            skipped_records: 0,
            eof: false,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.lookahead.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        self.bytes_read += n as u64;
        Ok(Some(clean_line(&line, false)))
    }

    fn flush_pending(&mut self, batch: &mut Vec<RawMessage>) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(msg) = self.pending.take().into_message() {
            self.senders.insert(msg.sender_key().to_string());
            batch.push(msg);
        } else {
            self.skipped_records += 1;
        }
    }

    fn process_line(&mut self, line: &str, batch: &mut Vec<RawMessage>) {
        if let Some(caps) = self.header_re.captures(line.trim_end()) {
            let date = (
                caps[1].parse::<i32>().ok(),
                caps[2].parse::<u32>().ok(),
                caps[3].parse::<u32>().ok(),
            );
            let clock = (
                caps[4].parse::<u32>().ok(),
                caps[5].parse::<u32>().ok(),
                caps[6].parse::<u32>().ok(),
            );
            if let ((Some(y), Some(mo), Some(d)), (Some(h), Some(mi), Some(s))) = (date, clock) {
                if let Some(naive) =
                    NaiveDate::from_ymd_opt(y, mo, d).and_then(|dt| dt.and_hms_opt(h, mi, s))
                {
                    self.flush_pending(batch);
                    let (sender_name, platform_id) = split_sender(&caps[7]);
                    self.pending = PendingRecord {
                        sender_name,
                        platform_id,
                        ts: local_to_utc_secs(naive, self.tz_offset_secs),
                        lines: Vec::new(),
                    };
                    return;
                }
            }
            // A header-shaped line that doesn't resolve to a real date is a
            // bad record; drop whatever was pending under it.
            self.flush_pending(batch);
            self.skipped_records += 1;
            return;
        }

        if self.pending.is_empty() {
            if !line.trim().is_empty() {
                self.skipped_records += 1;
            }
            return;
        }
        self.pending.lines.push(line.trim_end().to_string());
        let buffered: usize = self.pending.lines.iter().map(|l| l.len() + 1).sum();
        if buffered > self.max_record_size {
            self.pending = PendingRecord::default();
            self.skipped_records += 1;
        }
    }

    fn pump(&mut self) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(ChatlensError::Canceled);
        }

        let mut batch: Vec<RawMessage> = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_line()? {
                Some(line) => self.process_line(&line, &mut batch),
                None => {
                    self.flush_pending(&mut batch);
                    self.eof = true;
                    break;
                }
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
            self.queued.push_back(ParseEvent::Done {
                message_count: self.message_count,
                member_count: self.senders.len() as u64,
            });
        }
        Ok(())
    }
}

fn strip_label<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    for label in labels {
        if let Some(rest) = line.strip_prefix(label) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
                return Some(value.trim());
            }
        }
    }
    None
}

fn clean_line(line: &str, first: bool) -> String {
    let mut cleaned = line.trim_end_matches(['\n', '\r']).to_string();
    if first {
        if let Some(stripped) = cleaned.strip_prefix('\u{feff}') {
            cleaned = stripped.to_string();
        }
    }
    cleaned
}

impl Iterator for QqStream {
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
                    // QQ TXT exports carry no roster.
                    self.stage = Stage::Messages;
                    return Some(Ok(ParseEvent::Members(Vec::new())));
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

impl EventStream for QqStream {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIXTURE: &str = "消息分组:我的QQ群\n================================================================\n消息对象:测试群\n================================================================\n\n2023-05-01 12:00:00 Alice(12345678)\nhello\n\n2023-05-01 12:01:00 Bob<bob@qq.com>\n[图片]\n\n2023-05-01 12:02:00 系统消息(10000)\nCarol加入本群\n";

    fn parse_fixture(content: &str, options: &ParseOptions) -> Vec<ParseEvent> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qq.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        drop(file);

        QqParser::new()
            .parse(&path, options)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn messages_of(events: &[ParseEvent]) -> Vec<RawMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Messages(batch) => Some(batch.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_preamble_and_records() {
        let events = parse_fixture(FIXTURE, &ParseOptions::new().with_tz_offset_secs(0));

        let ParseEvent::Meta(meta) = &events[0] else {
            panic!("first event must be meta");
        };
        assert_eq!(meta.name, "测试群");
        assert_eq!(meta.platform, Platform::Qq);
        assert_eq!(meta.kind, ChatKind::Group);
        assert!(meta.kind_explicit);

        let messages = messages_of(&events);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sender_name, "Alice");
        assert_eq!(messages[0].sender_id.as_deref(), Some("12345678"));
        assert_eq!(messages[0].content.as_deref(), Some("hello"));
        assert_eq!(messages[1].sender_id.as_deref(), Some("bob@qq.com"));
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(messages[2].kind, MessageKind::System);

        assert!(matches!(
            events.last(),
            Some(ParseEvent::Done {
                message_count: 3,
                member_count: 3
            })
        ));
    }

    #[test]
    fn test_timestamps_are_one_minute_apart() {
        let events = parse_fixture(FIXTURE, &ParseOptions::new().with_tz_offset_secs(0));
        let messages = messages_of(&events);
        assert_eq!(messages[1].ts - messages[0].ts, 60);
        assert_eq!(messages[2].ts - messages[1].ts, 60);
    }

    #[test]
    fn test_tz_offset_shifts_to_utc() {
        let utc = messages_of(&parse_fixture(
            FIXTURE,
            &ParseOptions::new().with_tz_offset_secs(0),
        ))[0]
            .ts;
        let cst = messages_of(&parse_fixture(
            FIXTURE,
            &ParseOptions::new().with_tz_offset_secs(8 * 3600),
        ))[0]
            .ts;
        // Beijing wall clock is 8 hours ahead of the UTC instant.
        assert_eq!(utc - cst, 8 * 3600);
    }

    #[test]
    fn test_multiline_content() {
        let txt = "消息对象:测试群\n\n2023-05-01 12:00:00 Alice(1)\nline one\nline two\n\n2023-05-01 12:01:00 Bob(2)\nok\n";
        let events = parse_fixture(txt, &ParseOptions::new().with_tz_offset_secs(0));
        let messages = messages_of(&events);
        assert_eq!(messages[0].content.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_private_grouping_label() {
        let txt = "消息分组:我的好友\n消息对象:Alice\n\n2023-05-01 12:00:00 Alice(1)\nhi\n";
        let events = parse_fixture(txt, &ParseOptions::new().with_tz_offset_secs(0));
        let ParseEvent::Meta(meta) = &events[0] else {
            panic!()
        };
        assert_eq!(meta.kind, ChatKind::Private);
        assert!(meta.kind_explicit);
    }

    #[test]
    fn test_missing_preamble_is_inferred() {
        let txt = "2023-05-01 12:00:00 Alice(1)\nhi\n";
        let events = parse_fixture(txt, &ParseOptions::new().with_tz_offset_secs(0));
        let ParseEvent::Meta(meta) = &events[0] else {
            panic!()
        };
        assert!(!meta.kind_explicit);
        assert_eq!(messages_of(&events).len(), 1);
    }

    #[test]
    fn test_slash_date_variant() {
        let txt = "消息对象:群\n\n2023/05/01 12:00:00 Alice(1)\nhi\n";
        let events = parse_fixture(txt, &ParseOptions::new().with_tz_offset_secs(0));
        assert_eq!(messages_of(&events).len(), 1);
    }

    #[test]
    fn test_split_sender() {
        assert_eq!(
            split_sender("Alice(12345678)"),
            ("Alice".to_string(), "12345678".to_string())
        );
        assert_eq!(
            split_sender("Bob<bob@qq.com>"),
            ("Bob".to_string(), "bob@qq.com".to_string())
        );
        assert_eq!(
            split_sender("张三（10001）"),
            ("张三".to_string(), "10001".to_string())
        );
        // No bracket: the name is its own id.
        assert_eq!(
            split_sender("Plain"),
            ("Plain".to_string(), "Plain".to_string())
        );
    }

    #[test]
    fn test_orphan_lines_are_counted_not_fatal() {
        let txt = "消息对象:群\n\norphan line before any record\n2023-05-01 12:00:00 Alice(1)\nhi\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qq.txt");
        std::fs::write(&path, txt).unwrap();

        let mut stream = QqParser::new()
            .parse(&path, &ParseOptions::new().with_tz_offset_secs(0))
            .unwrap();
        let mut count = 0u64;
        for event in stream.by_ref() {
            if let ParseEvent::Messages(batch) = event.unwrap() {
                count += batch.len() as u64;
            }
        }
        assert_eq!(count, 1);
        assert_eq!(stream.records_skipped(), 1);
    }
}

//! Parser for LINE native TXT exports.
//!
//! LINE exports begin with a localized header, then alternate date-only
//! lines with tab-separated message lines:
//!
//! ```text
//! [LINE] Chat history in MyGroup
//! Saved on: 2025/01/02 10:00
//!
//! 2025/01/02 Friday
//! 10:15\tAlice\thi
//! 10:17\tAlice joined the group
//! ```
//!
//! Date-only lines set a rolling "current date" consumed by subsequent
//! time-only stamps; the parser carries this state explicitly and never
//! looks behind beyond the message being assembled. Two-field stamped
//! lines are system notices; continuation lines append to the pending
//! message until the next stamp.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{ChatlensError, Result};
use crate::event::{ParseEvent, ParseOptions, StreamProgress};
use crate::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

use super::{EventStream, FormatParser, local_to_utc_secs, parse_clock};

/// Parser for LINE native TXT exports (multi-language headers).
pub struct LineParser;

impl LineParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for LineParser {
    fn id(&self) -> &'static str {
        "line-txt"
    }

    fn parse(&self, path: &Path, options: &ParseOptions) -> Result<Box<dyn EventStream>> {
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let reader = BufReader::with_capacity(64 * 1024, file);
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "LINE chat".to_string());

        Ok(Box::new(LineStream::new(
            reader,
            total_bytes,
            fallback_name,
            options,
        )?))
    }
}

/// Detected header wording, carrying the chat name and kind certainty.
fn parse_header(line: &str) -> Option<ChatMeta> {
    let line = line.trim();
    let stripped = line.strip_prefix("[LINE]").map(str::trim).unwrap_or(line);

    // English
    if let Some(name) = stripped.strip_prefix("Chat history in ") {
        return Some(ChatMeta::new(name.trim(), Platform::Line, ChatKind::Group));
    }
    if let Some(name) = stripped.strip_prefix("Chat history with ") {
        return Some(ChatMeta::new(name.trim(), Platform::Line, ChatKind::Private));
    }

    // Japanese: 「Xとのトーク履歴」 is one-on-one, 「Xのトーク履歴」 a group.
    if let Some(name) = stripped.strip_suffix("とのトーク履歴") {
        return Some(ChatMeta::new(name.trim(), Platform::Line, ChatKind::Private));
    }
    if let Some(name) = stripped.strip_suffix("のトーク履歴") {
        return Some(ChatMeta::new(name.trim(), Platform::Line, ChatKind::Group));
    }

    // Chinese traditional / simplified: 與X的聊天記錄 / 与X的聊天记录 is
    // one-on-one, the bare form a group.
    for (prefix, suffix) in [("與", "的聊天記錄"), ("与", "的聊天记录")] {
        if let Some(rest) = stripped.strip_suffix(suffix) {
            if let Some(name) = rest.strip_prefix(prefix) {
                return Some(ChatMeta::new(name.trim(), Platform::Line, ChatKind::Private));
            }
            return Some(ChatMeta::new(rest.trim(), Platform::Line, ChatKind::Group));
        }
    }

    None
}

/// Returns `true` for the "Saved on:" metadata line in any supported locale.
fn is_saved_on_line(line: &str) -> bool {
    let trimmed = line.trim();
    ["Saved on", "保存日時", "儲存日期", "保存日期"]
        .iter()
        .any(|prefix| {
            trimmed
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('：'))
        })
}

/// System-notice fragments across the four header languages.
const SYSTEM_FRAGMENTS: &[&str] = &[
    "joined the group",
    "left the group",
    "invited",
    "unsent a message",
    "changed the group name",
    "changed the group's icon",
    "Missed call",
    "Call time",
    "グループに参加しました",
    "が参加しました",
    "が退出しました",
    "退会しました",
    "を招待しました",
    "送信を取り消しました",
    "不在着信",
    "通話時間",
    "加入聊天",
    "加入群組",
    "退出了群聊",
    "已退出",
    "邀請",
    "邀请",
    "收回了訊息",
    "撤回了一条消息",
    "未接來電",
    "未接来电",
    "通話時間",
    "通话时间",
];

/// Media/system token tables, exact content match.
fn classify_content(content: &str) -> MessageKind {
    let trimmed = content.trim();
    match trimmed {
        "[Photo]" | "[写真]" | "[照片]" | "[图片]" | "[Album]" | "[アルバム]" | "[相簿]" => {
            return MessageKind::Image;
        }
        "[Sticker]" | "[スタンプ]" | "[貼圖]" | "[表情贴纸]" => return MessageKind::Sticker,
        "[Video]" | "[動画]" | "[影片]" | "[视频]" => return MessageKind::Video,
        "[File]" | "[ファイル]" | "[檔案]" | "[文件]" => return MessageKind::File,
        "[Voice message]" | "[ボイスメッセージ]" | "[語音訊息]" | "[语音消息]" => {
            return MessageKind::Voice;
        }
        "[Location]" | "[位置情報]" | "[位置訊息]" | "[位置]" => return MessageKind::Location,
        "[Contact]" | "[連絡先]" | "[聯絡人]" => return MessageKind::Other,
        _ => {}
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return MessageKind::Link;
    }
    MessageKind::Text
}

fn is_system_text(content: &str) -> bool {
    SYSTEM_FRAGMENTS.iter().any(|frag| content.contains(frag))
}

/// A message being assembled across continuation lines.
#[derive(Debug, Default)]
struct PendingMessage {
    sender: String,
    content: String,
    ts: i64,
    system: bool,
}

impl PendingMessage {
    fn is_empty(&self) -> bool {
        self.sender.is_empty() && self.content.is_empty()
    }

    fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    fn into_message(self) -> Option<RawMessage> {
        if self.is_empty() {
            return None;
        }
        let mut content = self.content;
        // LINE wraps multi-line messages in double quotes.
        if content.contains('\n') && content.starts_with('"') && content.ends_with('"') {
            content = content[1..content.len() - 1].to_string();
        }

        let kind = if self.system || is_system_text(&content) {
            MessageKind::System
        } else {
            classify_content(&content)
        };

        let sender = if self.sender.is_empty() {
            "LINE".to_string()
        } else {
            self.sender
        };

        Some(RawMessage::new(sender, self.ts, kind).with_content(content))
    }
}

enum Stage {
    Meta,
    Members,
    Messages,
    Finished,
}

/// Event stream over a LINE TXT export.
struct LineStream {
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
    current_date: Option<NaiveDate>,
    pending: PendingMessage,
    date_re: Regex,
    senders: HashSet<String>,
    message_count: u64,
    since_progress: usize,
    skipped_records: u64,
    eof: bool,
}

impl LineStream {
    fn new(
        mut reader: BufReader<File>,
        total_bytes: u64,
        fallback_name: String,
        options: &ParseOptions,
    ) -> Result<Self> {
        let mut bytes_read = 0u64;
        let mut meta: Option<ChatMeta> = None;
        let mut lookahead = None;

        // Consume header lines until the first date or message line.
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            let cleaned = clean_line(&line, bytes_read == n as u64);

            if cleaned.trim().is_empty() {
                continue;
            }
            if meta.is_none() {
                if let Some(parsed) = parse_header(&cleaned) {
                    meta = Some(parsed);
                    continue;
                }
            }
            if is_saved_on_line(&cleaned) {
                continue;
            }
            lookahead = Some(cleaned);
            break;
        }

        let meta = meta.unwrap_or_else(|| {
            ChatMeta::new(fallback_name, Platform::Line, ChatKind::Group).with_inferred_kind()
        });

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
            current_date: None,
            pending: PendingMessage::default(),
            date_re: Regex::new(
                r"^(\d{4})[/.](\d{1,2})[/.](\d{1,2})(?:\s*[(（][^)）]*[)）]|\s+\S+)?\s*$",
            )
            .expect("static regex"),
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
            self.senders.insert(msg.sender_name.clone());
            batch.push(msg);
        } else {
            self.skipped_records += 1;
        }
    }

    /// Handles one content line, flushing the pending message into `batch`
    /// when a new stamp starts.
    fn process_line(&mut self, line: &str, batch: &mut Vec<RawMessage>) {
        if line.trim().is_empty() {
            // Blank lines inside a quoted multi-line message are content.
            if !self.pending.is_empty() {
                self.pending.content.push('\n');
            }
            return;
        }

        // Date-only header: terminates the pending message and rolls the
        // current date forward.
        if let Some(caps) = self.date_re.captures(line.trim()) {
            let ymd = (
                caps[1].parse::<i32>().ok(),
                caps[2].parse::<u32>().ok(),
                caps[3].parse::<u32>().ok(),
            );
            if let (Some(y), Some(m), Some(d)) = ymd {
                if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                    self.flush_pending(batch);
                    self.current_date = Some(date);
                    return;
                }
            }
        }

        // Stamped line: `HH:MM\tsender\tcontent` or `HH:MM\tsystem notice`.
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() >= 2 {
            if let Some((hour, minute, second)) = parse_clock(fields[0]) {
                let Some(date) = self.current_date else {
                    // A stamp with no rolling date cannot be anchored.
                    self.skipped_records += 1;
                    return;
                };
                self.flush_pending(batch);
                let Some(naive) = date.and_hms_opt(hour, minute, second) else {
                    self.skipped_records += 1;
                    return;
                };
                let ts = local_to_utc_secs(naive, self.tz_offset_secs);
                if fields.len() == 2 {
                    self.pending = PendingMessage {
                        sender: String::new(),
                        content: fields[1].trim_end().to_string(),
                        ts,
                        system: true,
                    };
                } else {
                    self.pending = PendingMessage {
                        sender: fields[1].trim().to_string(),
                        content: fields[2..].join("\t").trim_end().to_string(),
                        ts,
                        system: false,
                    };
                }
                return;
            }
        }

        // Continuation of the pending message.
        if self.pending.is_empty() {
            self.skipped_records += 1;
            return;
        }
        self.pending.content.push('\n');
        self.pending.content.push_str(line.trim_end());
        if self.pending.content.len() > self.max_record_size {
            // Oversized record: drop it rather than buffering unboundedly.
            self.pending = PendingMessage::default();
            self.skipped_records += 1;
        }
    }

    /// Fills the queue with the next batch (plus progress/done events).
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

fn clean_line(line: &str, first: bool) -> String {
    let mut cleaned = line.trim_end_matches(['\n', '\r']).to_string();
    if first {
        if let Some(stripped) = cleaned.strip_prefix('\u{feff}') {
            cleaned = stripped.to_string();
        }
    }
    cleaned
}

impl Iterator for LineStream {
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
                    // LINE TXT carries no roster; members are inferred from
                    // messages downstream.
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

impl EventStream for LineStream {
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

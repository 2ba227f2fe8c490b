//! Parser for WeChat database JSON exports.
//!
//! Third-party WeChat dump tools export either a bare top-level array of
//! message records or an object wrapping one (`{"messages": [...]}`).
//! Field names vary by tool, so the record struct accepts the common
//! aliases; timestamps arrive as epoch seconds, epoch milliseconds, or
//! zone-less wall-clock strings (`2023-05-01 12:00:00`), the last of which
//! is interpreted in the corpus timezone.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ChatlensError, Result};
use crate::event::{CancelToken, ParseEvent, ParseOptions, StreamProgress};
use crate::types::{ChatKind, ChatMeta, MessageKind, Platform, RawMessage};

use super::json::JsonScanner;
use super::{EventStream, FormatParser, local_to_utc_secs};

/// Parser for WeChat JSON dumps.
pub struct WeChatParser;

impl WeChatParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WeChatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for WeChatParser {
    fn id(&self) -> &'static str {
        "wechat-json"
    }

    fn parse(&self, path: &Path, options: &ParseOptions) -> Result<Box<dyn EventStream>> {
        Ok(Box::new(WeChatStream::new(path, options)?))
    }
}

/// One exported record, tolerant of the field spellings the common dump
/// tools produce.
#[derive(Debug, Deserialize)]
struct WeChatRecord {
    #[serde(default, alias = "MsgSvrID", alias = "msgId", alias = "msg_svr_id")]
    id: Option<Value>,

    #[serde(default, alias = "sender", alias = "wxid")]
    talker: Option<String>,

    #[serde(default, alias = "nickName", alias = "nick_name", alias = "senderName")]
    nickname: Option<String>,

    #[serde(
        default,
        alias = "CreateTime",
        alias = "createTime",
        alias = "create_time",
        alias = "timestamp"
    )]
    time: Option<Value>,

    #[serde(
        default,
        alias = "msg",
        alias = "message",
        alias = "StrContent",
        alias = "str_content",
        alias = "content"
    )]
    text: Option<String>,

    #[serde(default, rename = "type", alias = "msg_type", alias = "local_type")]
    msg_type: Option<i64>,

    #[serde(default, alias = "type_name")]
    type_name: Option<String>,
}

impl WeChatRecord {
    fn kind(&self) -> MessageKind {
        if let Some(name) = self.type_name.as_deref() {
            match name {
                "文本" => return MessageKind::Text,
                "图片" => return MessageKind::Image,
                "语音" => return MessageKind::Voice,
                "视频" | "视频文件" => return MessageKind::Video,
                "动画表情" | "表情包" | "表情" => return MessageKind::Sticker,
                "位置" | "定位" => return MessageKind::Location,
                "链接" | "分享链接" | "卡片式链接" => return MessageKind::Link,
                "文件" => return MessageKind::File,
                "语音通话" | "视频通话" => return MessageKind::Other,
                "系统消息" | "系统通知" | "撤回消息" | "拍一拍" => {
                    return MessageKind::System;
                }
                _ => {}
            }
        }
        match self.msg_type {
            Some(1) => MessageKind::Text,
            Some(3) => MessageKind::Image,
            Some(34) => MessageKind::Voice,
            Some(43) => MessageKind::Video,
            Some(47) => MessageKind::Sticker,
            Some(48) => MessageKind::Location,
            Some(49) => MessageKind::Link,
            Some(10000) | Some(10002) => MessageKind::System,
            Some(_) => MessageKind::Other,
            None => MessageKind::Text,
        }
    }

    /// Resolves the timestamp: epoch seconds, epoch milliseconds, or a
    /// zone-less wall-clock string interpreted with the corpus offset.
    fn ts(&self, tz_offset_secs: i32) -> Option<i64> {
        match self.time.as_ref()? {
            Value::Number(n) => {
                let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
                if raw > 100_000_000_000 {
                    Some(raw / 1000)
                } else {
                    Some(raw)
                }
            }
            Value::String(s) => {
                let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y/%m/%d %H:%M:%S"))
                    .ok()?;
                Some(local_to_utc_secs(naive, tz_offset_secs))
            }
            _ => None,
        }
    }

    fn into_raw(self, tz_offset_secs: i32) -> Option<RawMessage> {
        let ts = self.ts(tz_offset_secs)?;
        let kind = self.kind();
        let platform_id = self.talker.clone().filter(|s| !s.is_empty());
        let sender_name = self
            .nickname
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| platform_id.clone())?;

        let mut msg = RawMessage::new(sender_name, ts, kind);
        msg.sender_id = platform_id;
        msg.content = self.text;
        msg.platform_message_id = match self.id {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Some(msg)
    }
}

enum Stage {
    Meta,
    Members,
    Messages,
    Finished,
}

struct WeChatStream {
    scanner: JsonScanner<BufReader<File>>,
    total_bytes: u64,
    path: PathBuf,
    batch_size: usize,
    progress_interval: usize,
    max_record_size: usize,
    cancel: CancelToken,
    tz_offset_secs: i32,

    stage: Stage,
    meta: ChatMeta,
    queued: VecDeque<ParseEvent>,
    senders: HashSet<String>,
    message_count: u64,
    since_progress: usize,
    skipped_records: u64,
}

impl WeChatStream {
    fn new(path: &Path, options: &ParseOptions) -> Result<Self> {
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let mut scanner = JsonScanner::new(BufReader::with_capacity(64 * 1024, file));

        // Bare array or an object wrapping one.
        if !scanner.enter_top_level_array()? {
            let found = scanner.find_key_array("messages")?;
            let found = if found {
                true
            } else {
                let file = File::open(path)?;
                scanner = JsonScanner::new(BufReader::with_capacity(64 * 1024, file));
                scanner.enter_top_level_array()?;
                scanner.find_key_array("data")?
            };
            if !found {
                return Err(ChatlensError::parse_header(
                    "WeChat JSON",
                    "no message array found",
                    Some(path.to_path_buf()),
                ));
            }
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "WeChat chat".to_string());
        // Dumps carry no chat-name or kind header; both are inferred.
        let meta = ChatMeta::new(name, Platform::WeChat, ChatKind::Group).with_inferred_kind();

        Ok(Self {
            scanner,
            total_bytes,
            path: path.to_path_buf(),
            batch_size: options.batch_size,
            progress_interval: options.progress_interval,
            max_record_size: options.max_record_size,
            cancel: options.cancel.clone(),
            tz_offset_secs: options.effective_tz_offset(),
            stage: Stage::Meta,
            meta,
            queued: VecDeque::new(),
            senders: HashSet::new(),
            message_count: 0,
            since_progress: 0,
            skipped_records: 0,
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
                Ok(Some(raw)) => match serde_json::from_str::<WeChatRecord>(&raw) {
                    Ok(record) => match record.into_raw(self.tz_offset_secs) {
                        Some(msg) => {
                            self.senders.insert(msg.sender_key().to_string());
                            batch.push(msg);
                        }
                        None => self.skipped_records += 1,
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed WeChat record");
                        self.skipped_records += 1;
                    }
                },
                Ok(None) => {
                    done = true;
                    break;
                }
                Err(ChatlensError::UnexpectedEof { .. }) => {
                    return Err(ChatlensError::parse_other(
                        "WeChat JSON",
                        "truncated message array",
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
            self.queued.push_back(ParseEvent::Done {
                message_count: self.message_count,
                member_count: self.senders.len() as u64,
            });
        }
        Ok(())
    }
}

impl Iterator for WeChatStream {
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
                    // Dumps carry no roster.
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

impl EventStream for WeChatStream {
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

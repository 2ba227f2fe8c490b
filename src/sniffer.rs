//! Format registry and content sniffer.
//!
//! A [`ParserDescriptor`] declares how a format is recognized: accepted
//! extensions plus regex **content signatures** matched against the file
//! head (first 64 KiB, decoded as UTF-8 with BOM stripped and CR
//! normalized). Sniffing filters by extension, reads the head once, keeps
//! descriptors with at least one matching signature, and picks the lowest
//! priority; ties break by lexicographic id so the result is
//! deterministic.
//!
//! The descriptor set is closed — one entry per supported format, known at
//! build time.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::Regex;

use crate::error::{ChatlensError, Result};
use crate::types::Platform;

/// How many bytes of the file head are sniffed.
pub const SNIFF_HEAD_BYTES: usize = 64 * 1024;

/// Metadata by which the sniffer identifies a file format.
#[derive(Debug)]
pub struct ParserDescriptor {
    /// Stable identifier, also the parser id
    pub id: &'static str,

    /// Human-readable format name
    pub display_name: &'static str,

    /// Platform the format belongs to
    pub platform: Platform,

    /// Lower is preferred when several descriptors match
    pub priority: u8,

    /// Accepted file extensions, lowercase, without dot
    pub extensions: &'static [&'static str],

    /// Regex sources matched against the normalized file head
    pub signatures: &'static [&'static str],
}

/// The closed registry of supported formats.
pub static DESCRIPTORS: &[ParserDescriptor] = &[
    ParserDescriptor {
        id: "chatlab-json",
        display_name: "ChatLab JSON",
        platform: Platform::ChatLab,
        priority: 10,
        extensions: &["json"],
        signatures: &[
            r#""chatType"\s*:"#,
            r#""platform"\s*:\s*"(chatlab|line|qq|wechat)""#,
        ],
    },
    ParserDescriptor {
        id: "chatlab-jsonl",
        display_name: "ChatLab JSONL",
        platform: Platform::ChatLab,
        priority: 10,
        extensions: &["jsonl"],
        signatures: &[r#"(?m)^\s*\{\s*"type"\s*:\s*"meta""#],
    },
    ParserDescriptor {
        id: "wechat-json",
        display_name: "WeChat JSON",
        platform: Platform::WeChat,
        priority: 20,
        extensions: &["json"],
        signatures: &[
            r#""talker"\s*:"#,
            r#""(createTime|CreateTime|create_time)"\s*:"#,
            r#""type_name"\s*:"#,
            r#""isSend"\s*:"#,
        ],
    },
    ParserDescriptor {
        id: "qq-txt",
        display_name: "QQ TXT",
        platform: Platform::Qq,
        priority: 20,
        extensions: &["txt"],
        signatures: &[
            r"(?m)^消息分组:",
            r"(?m)^消息对象:",
            r"(?m)^={20,}\s*$",
            r"(?m)^\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2} .+[(（<].+[)）>]\s*$",
        ],
    },
    ParserDescriptor {
        id: "line-txt",
        display_name: "LINE TXT",
        platform: Platform::Line,
        priority: 20,
        extensions: &["txt"],
        signatures: &[
            r"(?m)^\[LINE\]",
            r"(?m)^Chat history (in|with) ",
            r"のトーク履歴",
            r"的聊天記錄",
            r"的聊天记录",
            r"(?m)^(Saved on|保存日時|儲存日期|保存日期)[:：]",
        ],
    },
];

/// Looks up a descriptor by id.
pub fn descriptor_by_id(id: &str) -> Option<&'static ParserDescriptor> {
    DESCRIPTORS.iter().find(|d| d.id == id)
}

/// Reads and normalizes the sniffable head of a file: first 64 KiB,
/// lossy UTF-8, BOM stripped, CR normalized to LF.
pub fn read_head(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; SNIFF_HEAD_BYTES];
    let mut filled = 0;
    loop {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() {
            break;
        }
    }
    buf.truncate(filled);

    let text = String::from_utf8_lossy(&buf);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    Ok(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Identifies the parser for a file.
///
/// # Errors
///
/// Returns [`ChatlensError::UnknownFormat`] when no descriptor matches, and
/// [`ChatlensError::Io`] when the file cannot be read.
pub fn sniff(path: &Path) -> Result<&'static ParserDescriptor> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let by_extension: Vec<&'static ParserDescriptor> = DESCRIPTORS
        .iter()
        .filter(|d| d.extensions.contains(&ext.as_str()))
        .collect();

    if by_extension.is_empty() {
        return Err(ChatlensError::unknown_format(path));
    }

    let head = read_head(path)?;
    match_head(&by_extension, &head).ok_or_else(|| ChatlensError::unknown_format(path))
}

/// Ranks the candidates against a normalized head. Split out from
/// [`sniff`] so the ranking logic is testable without files.
fn match_head(
    candidates: &[&'static ParserDescriptor],
    head: &str,
) -> Option<&'static ParserDescriptor> {
    let mut matched: Vec<&'static ParserDescriptor> = candidates
        .iter()
        .copied()
        .filter(|d| {
            d.signatures
                .iter()
                .any(|sig| Regex::new(sig).map(|re| re.is_match(head)).unwrap_or(false))
        })
        .collect();

    matched.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(b.id)));
    matched.first().copied()
}

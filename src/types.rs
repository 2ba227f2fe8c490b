//! Core data model for chatlens.
//!
//! These are the universal types every parser produces and the store and
//! analytics layers consume: platforms, message kinds, raw parsed records,
//! and the persisted corpus/member/message shapes.
//!
//! # Example
//!
//! ```rust
//! use chatlens::types::{MessageKind, RawMessage};
//!
//! let msg = RawMessage::new("Alice", 1735814100, MessageKind::Text)
//!     .with_content("hi")
//!     .with_platform_message_id("m-1");
//!
//! assert_eq!(msg.sender_name, "Alice");
//! assert_eq!(msg.content.as_deref(), Some("hi"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported source platforms.
///
/// Identifies where an export file came from. The set is closed: chatlens
/// parses its own native exports plus the LINE, QQ and WeChat formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Platform {
    /// chatlens native JSON / JSONL exports
    #[serde(alias = "cl", alias = "chatlens")]
    ChatLab,

    /// LINE native TXT exports (multi-language headers)
    Line,

    /// QQ native TXT exports and third-party tool dumps
    Qq,

    /// WeChat database JSON exports
    #[serde(alias = "wx")]
    WeChat,
}

impl Platform {
    /// Stable lowercase tag used in the store's `platform` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ChatLab => "chatlab",
            Platform::Line => "line",
            Platform::Qq => "qq",
            Platform::WeChat => "wechat",
        }
    }

    /// Returns all supported platforms.
    pub fn all() -> &'static [Platform] {
        &[
            Platform::ChatLab,
            Platform::Line,
            Platform::Qq,
            Platform::WeChat,
        ]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::ChatLab => write!(f, "ChatLab"),
            Platform::Line => write!(f, "LINE"),
            Platform::Qq => write!(f, "QQ"),
            Platform::WeChat => write!(f, "WeChat"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chatlab" | "chatlens" | "cl" => Ok(Platform::ChatLab),
            "line" => Ok(Platform::Line),
            "qq" => Ok(Platform::Qq),
            "wechat" | "wx" => Ok(Platform::WeChat),
            _ => Err(format!(
                "Unknown platform: '{}'. Expected one of: chatlab, line, qq, wechat",
                s
            )),
        }
    }
}

/// Whether a corpus is a one-on-one conversation or a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            _ => Err(format!("Unknown chat kind: '{}'", s)),
        }
    }
}

/// Uniform message kind across all source formats.
///
/// Each parser maps its native tokens (`[Photo]`, `[图片]`, `[スタンプ]`, …)
/// to this enum; system notices (join/leave/recall/rename) are `System`,
/// never `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    /// Emoji / sticker messages
    Sticker,
    Location,
    Link,
    System,
    Other,
}

impl MessageKind {
    /// Stable lowercase code used in the store's `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::File => "file",
            MessageKind::Sticker => "sticker",
            MessageKind::Location => "location",
            MessageKind::Link => "link",
            MessageKind::System => "system",
            MessageKind::Other => "other",
        }
    }

    /// Parses a stored code back into a kind. Unknown codes map to `Other`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "voice" => MessageKind::Voice,
            "video" => MessageKind::Video,
            "file" => MessageKind::File,
            "sticker" => MessageKind::Sticker,
            "location" => MessageKind::Location,
            "link" => MessageKind::Link,
            "system" => MessageKind::System,
            _ => MessageKind::Other,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat-level metadata, emitted exactly once at the head of a parse stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMeta {
    /// Display name of the conversation
    pub name: String,

    /// Source platform
    pub platform: Platform,

    /// Private or group chat
    pub kind: ChatKind,

    /// `true` when the kind came from explicit header wording; `false` when
    /// it was inferred from the distinct-sender fallback, in which case the
    /// normalizer may override it.
    #[serde(default = "default_true")]
    pub kind_explicit: bool,
}

fn default_true() -> bool {
    true
}

impl ChatMeta {
    pub fn new(name: impl Into<String>, platform: Platform, kind: ChatKind) -> Self {
        Self {
            name: name.into(),
            platform,
            kind,
            kind_explicit: true,
        }
    }

    /// Marks the kind as inferred rather than declared.
    #[must_use]
    pub fn with_inferred_kind(mut self) -> Self {
        self.kind_explicit = false;
        self
    }
}

/// A roster record as produced by a parser, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Raw identifier from the source (uin, user id, or the name itself
    /// when the format carries no separate id)
    pub platform_id: String,

    /// Account-level name, if the format distinguishes it
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub account_name: Option<String>,

    /// Per-group nickname, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub group_nickname: Option<String>,

    /// Alternative names seen in the source
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Roles (admin, owner, …) as raw strings
    #[serde(default)]
    pub roles: Vec<String>,

    /// Avatar reference, kept opaque
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub avatar: Option<String>,
}

impl MemberRecord {
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            account_name: None,
            group_nickname: None,
            aliases: Vec::new(),
            roles: Vec::new(),
            avatar: None,
        }
    }

    #[must_use]
    pub fn with_account_name(mut self, name: impl Into<String>) -> Self {
        self.account_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_group_nickname(mut self, name: impl Into<String>) -> Self {
        self.group_nickname = Some(name.into());
        self
    }

    /// Display name: first available of group nickname, account name,
    /// platform id.
    pub fn display_name(&self) -> &str {
        self.group_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.account_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.platform_id)
    }
}

/// One parsed chat record, before normalization.
///
/// Timestamps are UTC seconds; the parser has already applied the corpus
/// timezone offset to wall-clock sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Raw sender identifier from the source, when the format has one
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sender_id: Option<String>,

    /// Sender display name as it appeared at this message
    pub sender_name: String,

    /// UTC seconds since epoch
    pub ts: i64,

    /// Uniform message kind
    pub kind: MessageKind,

    /// Text content; `None` for pure media/system records with no caption
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub content: Option<String>,

    /// Platform id of the message this replies to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Platform-native message id, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub platform_message_id: Option<String>,

    /// Auxiliary payload (media path, link URL, location), opaque to the core
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub extra: Option<Value>,
}

impl RawMessage {
    /// Creates a new message with sender, timestamp and kind.
    pub fn new(sender_name: impl Into<String>, ts: i64, kind: MessageKind) -> Self {
        Self {
            sender_id: None,
            sender_name: sender_name.into(),
            ts,
            kind,
            content: None,
            reply_to: None,
            platform_message_id: None,
            extra: None,
        }
    }

    #[must_use]
    pub fn with_sender_id(mut self, id: impl Into<String>) -> Self {
        self.sender_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, target: impl Into<String>) -> Self {
        self.reply_to = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_platform_message_id(mut self, id: impl Into<String>) -> Self {
        self.platform_message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Key used for member identity when the format has no separate sender
    /// id: falls back to the display name.
    pub fn sender_key(&self) -> &str {
        self.sender_id.as_deref().unwrap_or(&self.sender_name)
    }
}

/// A persisted corpus: one imported conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    /// Opaque stable identifier
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub kind: ChatKind,
    /// Minimum message timestamp, if any messages exist
    pub min_ts: Option<i64>,
    /// Maximum message timestamp, if any messages exist
    pub max_ts: Option<i64>,
    pub message_count: u64,
    pub member_count: u64,
    /// The member the user has marked as "me", if any
    pub owner_member_id: Option<i64>,
    /// Fixed UTC offset, in seconds, assumed for wall-clock sources and used
    /// for calendar-day bucketing
    pub tz_offset_secs: i32,
    /// `true` while an import is incomplete (in flight, crashed or canceled)
    pub partial: bool,
    /// Schema version this corpus was last written at
    pub schema_version: i64,
    /// Unix seconds at creation
    pub created_at: i64,
}

/// A persisted member within one corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Internal id, unique within the corpus
    pub id: i64,
    pub platform_id: String,
    pub account_name: Option<String>,
    pub group_nickname: Option<String>,
    pub aliases: Vec<String>,
    pub roles: Vec<String>,
    pub avatar: Option<String>,
}

impl Member {
    /// Display name: first available of group nickname, account name,
    /// platform id.
    pub fn display_name(&self) -> &str {
        self.group_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.account_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.platform_id)
    }
}

/// One interval in a member's append-only name history.
///
/// The currently-used name has `end_ts = None`; intervals for one member do
/// not overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameInterval {
    pub name: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

/// One persisted message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Internal id, monotonically assigned in parse order
    pub id: i64,
    pub sender_id: i64,
    pub ts: i64,
    pub kind: MessageKind,
    pub content: Option<String>,
    /// Internal id of the reply target, when resolved
    pub reply_to_message_id: Option<i64>,
    /// Platform id of the reply target, preserved when unresolved (dangling)
    pub reply_to_platform_id: Option<String>,
    pub platform_message_id: Option<String>,
    /// Opaque auxiliary payload, stored as JSON text
    pub extra: Option<String>,
}

/// A derived conversation burst: messages separated by less than the idle
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBounds {
    pub id: i64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub first_message_id: i64,
}

/// Optional `[start_ts, end_ts)` window pushed into analytics queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilter {
    /// Inclusive lower bound, UTC seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub start_ts: Option<i64>,

    /// Exclusive upper bound, UTC seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub end_ts: Option<i64>,
}

impl TimeFilter {
    /// The unbounded filter: matches every message.
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn since(mut self, start_ts: i64) -> Self {
        self.start_ts = Some(start_ts);
        self
    }

    #[must_use]
    pub fn until(mut self, end_ts: i64) -> Self {
        self.end_ts = Some(end_ts);
        self
    }

    /// Returns `true` if both bounds are absent.
    pub fn is_unbounded(&self) -> bool {
        self.start_ts.is_none() && self.end_ts.is_none()
    }

    /// Returns `true` if the timestamp falls inside the window.
    pub fn contains(&self, ts: i64) -> bool {
        self.start_ts.is_none_or(|s| ts >= s) && self.end_ts.is_none_or(|e| ts < e)
    }
}

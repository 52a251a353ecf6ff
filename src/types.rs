use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type MessageId = i64;
pub type UserId = i64;

// ── Origin ───────────────────────────────────────────────────────────────

/// Where a tool response's payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Live,
    Archive,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ConversationKind ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    User,
    Bot,
    Group,
    Supergroup,
    Channel,
    #[default]
    Unknown,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "bot" => Self::Bot,
            "group" => Self::Group,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Unknown,
        }
    }
}

// ── Volatility ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    #[default]
    Persistent,
    SelfDestructing,
    ViewOnce,
    /// Disappears from the host once the chat closes.
    Vanishing,
}

impl Volatility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::SelfDestructing => "self_destructing",
            Self::ViewOnce => "view_once",
            Self::Vanishing => "vanishing",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "self_destructing" => Self::SelfDestructing,
            "view_once" => Self::ViewOnce,
            "vanishing" => Self::Vanishing,
            _ => Self::Persistent,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "persistent" => Some(Self::Persistent),
            "self_destructing" | "self-destructing" | "self_destruct" => {
                Some(Self::SelfDestructing)
            }
            "view_once" | "view-once" => Some(Self::ViewOnce),
            "vanishing" => Some(Self::Vanishing),
            _ => None,
        }
    }

    pub fn is_volatile(&self) -> bool {
        !matches!(self, Self::Persistent)
    }
}

// ── Provenance ───────────────────────────────────────────────────────────

/// How an archive record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Written by the capture monitor before the host purged its copy.
    CapturedBeforeDestruction,
    /// Written from a snapshot of live state (archive_chat, import).
    Snapshot,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapturedBeforeDestruction => "captured_before_destruction",
            Self::Snapshot => "snapshot",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "captured_before_destruction" => Self::CapturedBeforeDestruction,
            _ => Self::Snapshot,
        }
    }
}

// ── Conversation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ChatId,
    pub name: String,
    #[serde(default)]
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<i64>,
    /// Unix seconds of the latest known activity. Never decreases in the archive.
    #[serde(default)]
    pub last_activity: i64,
}

// ── Sender / user ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

// ── Message ──────────────────────────────────────────────────────────────

/// Metadata describing non-text content. The bytes themselves stay with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// Unix seconds the message was sent.
    pub timestamp: i64,
    pub sender: Sender,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
    #[serde(default)]
    pub volatility: Volatility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub outgoing: bool,
}

impl Message {
    /// Text used for full-text indexing: body plus media file name, if any.
    pub fn search_text(&self) -> String {
        match self.media.as_ref().and_then(|m| m.file_name.as_deref()) {
            Some(name) if !self.text.is_empty() => format!("{} {name}", self.text),
            Some(name) => name.to_string(),
            None => self.text.clone(),
        }
    }
}

// ── ArchiveRecord ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordBody {
    Conversation(Conversation),
    Message(Message),
}

/// Persisted form of a conversation or message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Unix milliseconds the record was captured, distinct from the message time.
    pub captured_at_ms: i64,
    pub provenance: Provenance,
    pub body: RecordBody,
}

impl ArchiveRecord {
    pub fn message(message: Message, provenance: Provenance) -> Self {
        Self {
            captured_at_ms: crate::util::now_ms(),
            provenance,
            body: RecordBody::Message(message),
        }
    }

    pub fn conversation(conversation: Conversation, provenance: Provenance) -> Self {
        Self {
            captured_at_ms: crate::util::now_ms(),
            provenance,
            body: RecordBody::Conversation(conversation),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.body {
            RecordBody::Message(m) => Some(m),
            RecordBody::Conversation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatility_parse_accepts_aliases() {
        assert_eq!(Volatility::parse("view-once"), Some(Volatility::ViewOnce));
        assert_eq!(
            Volatility::parse("self_destruct"),
            Some(Volatility::SelfDestructing)
        );
        assert_eq!(Volatility::parse("vanishing"), None);
        assert!(!Volatility::Persistent.is_volatile());
        assert!(Volatility::ViewOnce.is_volatile());
    }

    #[test]
    fn record_body_is_tagged() {
        let record = ArchiveRecord {
            captured_at_ms: 5,
            provenance: Provenance::Snapshot,
            body: RecordBody::Conversation(Conversation {
                id: 1,
                name: "ops".into(),
                kind: ConversationKind::Group,
                username: None,
                member_count: None,
                last_activity: 10,
            }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["body"]["type"], "conversation");
        assert_eq!(json["provenance"], "snapshot");
        let back: ArchiveRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn search_text_includes_file_name() {
        let msg = Message {
            chat_id: 1,
            message_id: 2,
            timestamp: 3,
            sender: Sender { id: 4, name: "a".into(), username: None },
            text: "see attached".into(),
            media: Some(MediaInfo {
                kind: "document".into(),
                mime_type: None,
                file_name: Some("report.pdf".into()),
                size_bytes: None,
                duration_secs: None,
            }),
            volatility: Volatility::Persistent,
            ttl_seconds: None,
            reply_to: None,
            outgoing: false,
        };
        assert_eq!(msg.search_text(), "see attached report.pdf");
    }
}

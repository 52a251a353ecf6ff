use serde::Deserialize;
use serde_json::Value;

use crate::types::{ChatId, MessageId, UserId};

/// `before`/`after`/`since`/`until` accept unix seconds or a date string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum TimeArg {
    Unix(i64),
    Text(String),
}

impl TimeArg {
    pub(crate) fn to_ts(&self) -> Result<i64, String> {
        match self {
            Self::Unix(ts) => Ok(*ts),
            Self::Text(s) => crate::util::parse_date_to_ts(s)
                .ok_or_else(|| format!("unrecognized time {s:?} (use unix seconds or YYYY-MM-DD)")),
        }
    }
}

pub(crate) fn opt_ts(arg: &Option<TimeArg>) -> Result<Option<i64>, String> {
    arg.as_ref().map(TimeArg::to_ts).transpose()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolListConversationsArgs {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolGetConversationArgs {
    pub(crate) chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolReadMessagesArgs {
    pub(crate) chat_id: ChatId,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
    #[serde(default)]
    pub(crate) before: Option<TimeArg>,
    #[serde(default)]
    pub(crate) after: Option<TimeArg>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolSearchMessagesArgs {
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) chat_id: Option<ChatId>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolGetUserInfoArgs {
    pub(crate) user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolSendMessageArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) reply_to: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolEditMessageArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    pub(crate) text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolDeleteMessageArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
}

pub(crate) type ToolUnpinMessageArgs = ToolDeleteMessageArgs;

#[derive(Debug, Deserialize)]
pub(crate) struct ToolForwardMessageArgs {
    pub(crate) from_chat_id: ChatId,
    pub(crate) to_chat_id: ChatId,
    pub(crate) message_id: MessageId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolPinMessageArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    #[serde(default)]
    pub(crate) notify: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolReactionArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    pub(crate) emoji: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolEphemeralMessagesArgs {
    #[serde(default)]
    pub(crate) chat_id: Option<ChatId>,
    #[serde(default)]
    pub(crate) volatility: Option<String>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolSearchArchiveArgs {
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) chat_id: Option<ChatId>,
    #[serde(default)]
    pub(crate) since: Option<TimeArg>,
    #[serde(default)]
    pub(crate) until: Option<TimeArg>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolArchiveChatArgs {
    pub(crate) chat_id: ChatId,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolListArchivedChatsArgs {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ExportFormat {
    Json,
    Jsonl,
    Markdown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolExportChatArgs {
    pub(crate) chat_id: ChatId,
    pub(crate) format: ExportFormat,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolAuditLogArgs {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
    #[serde(default)]
    pub(crate) tool: Option<String>,
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, String> {
    // Optional fields sent as explicit null deserialize to None.
    serde_json::from_value(args).map_err(|e| format!("args: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_args_accept_numbers_and_dates() {
        let args: ToolReadMessagesArgs =
            parse_args(json!({"chat_id": 1, "before": 1_700_000_000, "after": "1970-01-02"})).unwrap();
        assert_eq!(opt_ts(&args.before).unwrap(), Some(1_700_000_000));
        assert_eq!(opt_ts(&args.after).unwrap(), Some(86_400));
        assert_eq!(opt_ts(&None).unwrap(), None);

        let bad: ToolReadMessagesArgs = parse_args(json!({"chat_id": 1, "before": "soon"})).unwrap();
        assert!(opt_ts(&bad.before).is_err());
    }

    #[test]
    fn export_format_names() {
        let args: ToolExportChatArgs = parse_args(json!({"chat_id": 1, "format": "markdown"})).unwrap();
        assert_eq!(args.format, ExportFormat::Markdown);
        assert!(parse_args::<ToolExportChatArgs>(json!({"chat_id": 1, "format": "csv"})).is_err());
        let pin: ToolPinMessageArgs = parse_args(json!({"chat_id": 1, "message_id": 2})).unwrap();
        assert!(!pin.notify);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = parse_args::<ToolSendMessageArgs>(json!({"chat_id": 1})).unwrap_err();
        assert!(err.starts_with("args:"));
        assert!(err.contains("text"));
    }
}

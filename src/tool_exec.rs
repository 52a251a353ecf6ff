//! Tool handlers.
//!
//! Every handler decodes its typed arguments, resolves through
//! [`crate::resolver`], and returns a [`ToolExecution`]. Data-returning tools
//! always set `origin`.

use std::fmt::Write as _;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_json::{json, Value};

use crate::archive::{
    put_snapshot, ArchiveStore, ArchivedChat, ArchivedMessage, MessageFilter, SearchFilter, SearchHit,
};
use crate::audit::{AuditKind, AuditLogger};
use crate::capture::{CaptureMonitor, CaptureUpdate};
use crate::dispatch::{PROTOCOL_VERSION, SERVER_NAME};
use crate::error::{LiveError, RegistryError, ToolError};
use crate::host::MessageQuery;
use crate::prompts::prompt_catalogue;
use crate::registry::{tool_handler, RegistryBuilder, ToolHandler};
use crate::resources::resource_catalogue;
use crate::resolver::{archive_blocking, from_archive, live_only, live_then_archive, Resolved};
use crate::session::SessionBinder;
use crate::tool_args::*;
use crate::tool_defs::{clamp_limit, tool_definitions_json};
use crate::types::{
    ArchiveRecord, Conversation, Message, Origin, Provenance, UserInfo, Volatility,
};
use crate::util::format_ts;

const DEFAULT_LIMIT: usize = 50;
const DEFAULT_SNAPSHOT_LIMIT: usize = 200;

// ── Shared handles ───────────────────────────────────────────────────────

/// Components every handler can reach.
pub struct Services {
    pub session: Arc<SessionBinder>,
    pub archive: Arc<ArchiveStore>,
    pub capture: Arc<CaptureMonitor>,
    pub audit: AuditLogger,
    /// Frozen tool catalogue, filled in once the dispatcher is built.
    pub(crate) tool_names: OnceLock<Vec<String>>,
}

impl Services {
    pub fn new(
        session: Arc<SessionBinder>,
        archive: Arc<ArchiveStore>,
        capture: Arc<CaptureMonitor>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            session,
            archive,
            capture,
            audit,
            tool_names: OnceLock::new(),
        }
    }
}

/// Per-call view handed to a handler.
#[derive(Clone)]
pub struct ToolContext {
    pub services: Arc<Services>,
    pub(crate) live_degraded: Arc<AtomicBool>,
}

impl ToolContext {
    pub fn new(services: Arc<Services>, live_degraded: Arc<AtomicBool>) -> Self {
        Self {
            services,
            live_degraded,
        }
    }
}

// ── Result shape ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub output: String,
    pub details: Value,
    pub origin: Option<Origin>,
    pub is_error: bool,
}

impl ToolExecution {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            details: Value::Null,
            origin: None,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// `tools/call` result body.
    pub fn to_result_json(&self) -> Value {
        let mut result = json!({
            "content": [{ "type": "text", "text": self.output }],
            "details": self.details,
            "isError": self.is_error,
        });
        if let Some(origin) = self.origin {
            result["origin"] = json!(origin);
        }
        result
    }
}

fn to_details<T: Serialize>(key: &str, value: &T) -> Result<Value, ToolError> {
    let value = serde_json::to_value(value).map_err(|e| ToolError::Internal(e.to_string()))?;
    Ok(json!({ key: value }))
}

/// Turn a resolution into a result. "No data" is a normal, non-error answer.
fn render<T: Serialize>(
    resolved: Resolved<T>,
    key: &str,
    summarize: impl FnOnce(&T) -> String,
) -> Result<ToolExecution, ToolError> {
    match resolved {
        Resolved::Found { value, origin } => Ok(ToolExecution::text(summarize(&value))
            .with_details(to_details(key, &value)?)
            .with_origin(origin)),
        Resolved::NoData { reason } => Ok(ToolExecution::text(format!("no data: {reason}"))
            .with_details(json!({ "status": "no_data", "reason": reason }))
            .with_origin(Origin::Archive)),
    }
}

// ── Text summaries ───────────────────────────────────────────────────────

fn summarize_conversations(convs: &[Conversation]) -> String {
    if convs.is_empty() {
        return "no conversations".into();
    }
    let mut out = String::new();
    for c in convs {
        let _ = writeln!(out, "{}\t{}\t{}", c.id, c.kind.as_str(), c.name);
    }
    out
}

fn summarize_conversation(c: &Conversation) -> String {
    let mut out = format!("{} ({}, id {})", c.name, c.kind.as_str(), c.id);
    if let Some(username) = &c.username {
        let _ = write!(out, " @{username}");
    }
    if let Some(members) = c.member_count {
        let _ = write!(out, ", {members} members");
    }
    if c.last_activity > 0 {
        let _ = write!(out, ", last activity {}", format_ts(c.last_activity));
    }
    out
}

fn message_line(m: &Message) -> String {
    let marker = match m.volatility {
        Volatility::Persistent => "",
        Volatility::SelfDestructing => " [self-destructing]",
        Volatility::ViewOnce => " [view-once]",
        Volatility::Vanishing => " [vanishing]",
    };
    let body = match (&m.media, m.text.is_empty()) {
        (Some(media), true) => format!("<{}>", media.kind),
        (Some(media), false) => format!("<{}> {}", media.kind, m.text),
        (None, _) => m.text.clone(),
    };
    format!(
        "[{}] #{} {}{}: {}",
        format_ts(m.timestamp),
        m.message_id,
        m.sender.name,
        marker,
        body
    )
}

fn summarize_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    let lines: Vec<String> = messages.into_iter().map(message_line).collect();
    if lines.is_empty() {
        "no messages".into()
    } else {
        lines.join("\n")
    }
}

fn hit_line(h: &SearchHit) -> String {
    format!(
        "[chat {} #{} {}] {}: {}",
        h.chat_id,
        h.message_id,
        format_ts(h.timestamp),
        h.sender.name,
        h.snippet
    )
}

fn summarize_user(u: &UserInfo) -> String {
    let mut out = format!("{} (id {})", u.name, u.id);
    if let Some(username) = &u.username {
        let _ = write!(out, " @{username}");
    }
    if u.is_bot {
        out.push_str(" [bot]");
    }
    if let Some(about) = &u.about {
        let _ = write!(out, "\n{about}");
    }
    out
}

/// Live search returns whole messages; archive search returns ranked snippets.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SearchResults {
    Messages(Vec<Message>),
    Hits(Vec<SearchHit>),
}

impl SearchResults {
    fn summary(&self) -> String {
        match self {
            Self::Messages(list) => summarize_messages(list),
            Self::Hits(hits) if hits.is_empty() => "no matches".into(),
            Self::Hits(hits) => hits.iter().map(hit_line).collect::<Vec<_>>().join("\n"),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Data tools
// ═════════════════════════════════════════════════════════════════════════

async fn list_conversations(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolListConversationsArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let limit = clamp_limit(parsed.limit, DEFAULT_LIMIT);
    let resolved = live_then_archive(
        &ctx,
        "list_conversations",
        |live| async move { live.list_conversations(limit).await },
        move |store| store.list_conversations(limit).map(Some),
    )
    .await;
    render(resolved, "conversations", |c| summarize_conversations(c))
}

async fn get_conversation(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolGetConversationArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let chat_id = parsed.chat_id;
    let resolved = live_then_archive(
        &ctx,
        "get_conversation",
        |live| async move { live.conversation(chat_id).await },
        move |store| store.conversation(chat_id),
    )
    .await;
    render(resolved, "conversation", summarize_conversation)
}

async fn read_messages(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolReadMessagesArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let chat_id = parsed.chat_id;
    let query = MessageQuery {
        limit: clamp_limit(parsed.limit, DEFAULT_LIMIT),
        before: opt_ts(&parsed.before).map_err(ToolError::bad_args)?,
        after: opt_ts(&parsed.after).map_err(ToolError::bad_args)?,
    };
    let filter = MessageFilter {
        before: query.before,
        after: query.after,
        limit: query.limit,
        ..MessageFilter::default()
    };
    let resolved = live_then_archive(
        &ctx,
        "read_messages",
        |live| async move { live.read_messages(chat_id, &query).await },
        move |store| {
            let rows = store.get(chat_id, &filter)?;
            if rows.is_empty() && store.conversation(chat_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(rows.into_iter().map(|r| r.message).collect::<Vec<_>>()))
        },
    )
    .await;
    render(resolved, "messages", |m| summarize_messages(m))
}

async fn search_messages(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolSearchMessagesArgs = parse_args(args).map_err(ToolError::bad_args)?;
    if parsed.query.trim().is_empty() {
        return Err(ToolError::BadArguments("query must not be empty".into()));
    }
    let limit = clamp_limit(parsed.limit, DEFAULT_LIMIT);
    let chat_id = parsed.chat_id;
    let query = parsed.query;
    let filter = SearchFilter {
        chat_id,
        limit,
        ..SearchFilter::default()
    };
    let live_query = query.clone();
    let resolved = live_then_archive(
        &ctx,
        "search_messages",
        |live| async move {
            live.search_messages(&live_query, chat_id, limit)
                .await
                .map(SearchResults::Messages)
        },
        move |store| store.search(&query, &filter).map(|h| Some(SearchResults::Hits(h))),
    )
    .await;
    render(resolved, "results", SearchResults::summary)
}

async fn get_user_info(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolGetUserInfoArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let user_id = parsed.user_id;
    let resolved = live_then_archive(
        &ctx,
        "get_user_info",
        |live| async move { live.user_info(user_id).await },
        move |store| store.find_user(user_id),
    )
    .await;
    render(resolved, "user", summarize_user)
}

// ═════════════════════════════════════════════════════════════════════════
// Live-only actions
// ═════════════════════════════════════════════════════════════════════════

async fn send_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolSendMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    if parsed.text.is_empty() {
        return Err(ToolError::BadArguments("text must not be empty".into()));
    }
    let (chat_id, reply_to, text) = (parsed.chat_id, parsed.reply_to, parsed.text);
    let sent = live_only(&ctx, "send_message", |live| async move {
        live.send_message(chat_id, &text, reply_to).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("sent message {} to chat {}", sent.message_id, chat_id))
            .with_details(to_details("message", &sent)?)
            .with_origin(Origin::Live),
    )
}

async fn edit_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolEditMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (chat_id, message_id, text) = (parsed.chat_id, parsed.message_id, parsed.text);
    let edited = live_only(&ctx, "edit_message", |live| async move {
        live.edit_message(chat_id, message_id, &text).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("edited message {message_id} in chat {chat_id}"))
            .with_details(to_details("message", &edited)?)
            .with_origin(Origin::Live),
    )
}

async fn delete_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolDeleteMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (chat_id, message_id) = (parsed.chat_id, parsed.message_id);
    live_only(&ctx, "delete_message", |live| async move {
        live.delete_message(chat_id, message_id).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("deleted message {message_id} in chat {chat_id}"))
            .with_details(json!({ "chat_id": chat_id, "message_id": message_id, "deleted": true }))
            .with_origin(Origin::Live),
    )
}

async fn forward_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolForwardMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (from, to, message_id) = (parsed.from_chat_id, parsed.to_chat_id, parsed.message_id);
    let forwarded = live_only(&ctx, "forward_message", |live| async move {
        live.forward_message(from, to, message_id).await
    })
    .await?;
    Ok(ToolExecution::text(format!(
        "forwarded message {message_id} from chat {from} to chat {to} as {}",
        forwarded.message_id
    ))
    .with_details(to_details("message", &forwarded)?)
    .with_origin(Origin::Live))
}

async fn pin_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolPinMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (chat_id, message_id, notify) = (parsed.chat_id, parsed.message_id, parsed.notify);
    live_only(&ctx, "pin_message", |live| async move {
        live.pin_message(chat_id, message_id, notify).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("pinned message {message_id} in chat {chat_id}"))
            .with_details(json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "pinned": true,
                "notify": notify,
            }))
            .with_origin(Origin::Live),
    )
}

async fn unpin_message(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolUnpinMessageArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (chat_id, message_id) = (parsed.chat_id, parsed.message_id);
    live_only(&ctx, "unpin_message", |live| async move {
        live.unpin_message(chat_id, message_id).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("unpinned message {message_id} in chat {chat_id}"))
            .with_details(json!({ "chat_id": chat_id, "message_id": message_id, "pinned": false }))
            .with_origin(Origin::Live),
    )
}

async fn add_reaction(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolReactionArgs = parse_args(args).map_err(ToolError::bad_args)?;
    if parsed.emoji.trim().is_empty() {
        return Err(ToolError::BadArguments("emoji must not be empty".into()));
    }
    let (chat_id, message_id, emoji) = (parsed.chat_id, parsed.message_id, parsed.emoji);
    let sent = emoji.clone();
    live_only(&ctx, "add_reaction", |live| async move {
        live.add_reaction(chat_id, message_id, &sent).await
    })
    .await?;
    Ok(
        ToolExecution::text(format!("reacted {emoji} to message {message_id} in chat {chat_id}"))
            .with_details(json!({ "chat_id": chat_id, "message_id": message_id, "emoji": emoji }))
            .with_origin(Origin::Live),
    )
}

// ═════════════════════════════════════════════════════════════════════════
// Archive tools
// ═════════════════════════════════════════════════════════════════════════

async fn get_ephemeral_messages(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolEphemeralMessagesArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let volatility = match parsed.volatility.as_deref() {
        None => None,
        Some(raw) => match Volatility::parse(raw) {
            Some(v) if v.is_volatile() => Some(v),
            _ => return Err(ToolError::BadArguments(format!("unknown volatility {raw:?}"))),
        },
    };
    let limit = clamp_limit(parsed.limit, DEFAULT_LIMIT);
    let chat_id = parsed.chat_id;
    let resolved = from_archive(&ctx, "get_ephemeral_messages", move |store| {
        store.ephemeral(chat_id, volatility, limit).map(Some)
    })
    .await;
    render(resolved, "messages", |rows| {
        summarize_messages(rows.iter().map(|r| &r.message))
    })
}

async fn search_archive(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolSearchArchiveArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let filter = SearchFilter {
        chat_id: parsed.chat_id,
        since: opt_ts(&parsed.since).map_err(ToolError::bad_args)?,
        until: opt_ts(&parsed.until).map_err(ToolError::bad_args)?,
        limit: clamp_limit(parsed.limit, DEFAULT_LIMIT),
    };
    let query = parsed.query;
    let resolved = from_archive(&ctx, "search_archive", move |store| {
        store.search(&query, &filter).map(Some)
    })
    .await;
    render(resolved, "hits", |hits| SearchResults::Hits(hits.clone()).summary())
}

async fn get_archive_stats(ctx: ToolContext, _args: Value) -> Result<ToolExecution, ToolError> {
    let resolved = from_archive(&ctx, "get_archive_stats", |store| store.stats().map(Some)).await;
    render(resolved, "stats", |s| {
        format!(
            "{} conversations, {} messages ({} self-destructing, {} view-once, {} vanishing captured)",
            s.conversations, s.messages, s.self_destructing, s.view_once, s.vanishing
        )
    })
}

async fn archive_chat(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolArchiveChatArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let chat_id = parsed.chat_id;
    let query = MessageQuery {
        limit: clamp_limit(parsed.limit, DEFAULT_SNAPSHOT_LIMIT),
        ..MessageQuery::default()
    };
    let (conversation, messages) = live_only(&ctx, "archive_chat", |live| async move {
        let conversation = live.conversation(chat_id).await?;
        let messages = live.read_messages(chat_id, &query).await?;
        Ok::<_, LiveError>((conversation, messages))
    })
    .await?;

    let fetched = messages.len();
    let (inserted, duplicates) = archive_blocking(&ctx.services.archive, move |store| {
        store.put(&ArchiveRecord::conversation(conversation, Provenance::Snapshot))?;
        put_snapshot(store, messages)
    })
    .await?;
    Ok(ToolExecution::text(format!(
        "archived chat {chat_id}: {inserted} new, {duplicates} already archived"
    ))
    .with_details(json!({
        "chat_id": chat_id,
        "fetched": fetched,
        "inserted": inserted,
        "duplicates": duplicates,
    }))
    .with_origin(Origin::Archive))
}

async fn list_archived_chats(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolListArchivedChatsArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let limit = clamp_limit(parsed.limit, DEFAULT_LIMIT);
    let resolved = from_archive(&ctx, "list_archived_chats", move |store| {
        store.archived_chats(limit).map(Some)
    })
    .await;
    render(resolved, "chats", |chats: &Vec<ArchivedChat>| {
        if chats.is_empty() {
            return "no archived chats".into();
        }
        let mut out = String::new();
        for c in chats {
            let _ = writeln!(
                out,
                "{}\t{}\t{} messages ({} ephemeral)",
                c.conversation.id, c.conversation.name, c.message_count, c.ephemeral_count
            );
        }
        out
    })
}

#[derive(Debug, Serialize)]
struct ChatExport {
    chat_id: i64,
    format: ExportFormat,
    message_count: usize,
    content: String,
}

fn export_markdown(title: &str, messages: &[ArchivedMessage]) -> String {
    let mut out = format!("# {title}\n\n");
    for m in messages {
        let _ = writeln!(out, "- {}", message_line(&m.message));
    }
    out
}

async fn export_chat(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolExportChatArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let (chat_id, format) = (parsed.chat_id, parsed.format);
    let filter = MessageFilter {
        limit: clamp_limit(parsed.limit, DEFAULT_SNAPSHOT_LIMIT),
        ..MessageFilter::default()
    };
    let resolved = from_archive(&ctx, "export_chat", move |store| {
        let conversation = store.conversation(chat_id)?;
        let mut rows = store.get(chat_id, &filter)?;
        if rows.is_empty() && conversation.is_none() {
            return Ok(None);
        }
        rows.reverse();
        let content = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&rows)?,
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for row in &rows {
                    out.push_str(&serde_json::to_string(row)?);
                    out.push('\n');
                }
                out
            }
            ExportFormat::Markdown => {
                let title = conversation
                    .map(|c| c.name)
                    .unwrap_or_else(|| format!("chat {chat_id}"));
                export_markdown(&title, &rows)
            }
        };
        Ok(Some(ChatExport {
            chat_id,
            format,
            message_count: rows.len(),
            content,
        }))
    })
    .await;
    render(resolved, "export", |e| e.content.clone())
}

// ═════════════════════════════════════════════════════════════════════════
// Gateway tools
// ═════════════════════════════════════════════════════════════════════════

async fn configure_ephemeral_capture(
    ctx: ToolContext,
    args: Value,
) -> Result<ToolExecution, ToolError> {
    let update: CaptureUpdate = parse_args(args).map_err(ToolError::bad_args)?;
    let settings = ctx.services.capture.configure(&update);
    Ok(ToolExecution::text(format!(
        "capture enabled={} self_destructing={} view_once={} vanishing={}",
        settings.enabled, settings.self_destructing, settings.view_once, settings.vanishing
    ))
    .with_details(to_details("settings", &settings)?))
}

async fn get_ephemeral_stats(ctx: ToolContext, _args: Value) -> Result<ToolExecution, ToolError> {
    let capture = &ctx.services.capture;
    let stats = capture.stats();
    let settings = capture.settings();
    Ok(ToolExecution::text(format!(
        "captured {} ({} self-destructing, {} view-once, {} vanishing), {} duplicates, {} pending, {} lost",
        stats.captured,
        stats.self_destructing,
        stats.view_once,
        stats.vanishing,
        stats.duplicates,
        stats.pending,
        stats.lost
    ))
    .with_details(json!({ "stats": stats, "settings": settings })))
}

async fn get_audit_log(ctx: ToolContext, args: Value) -> Result<ToolExecution, ToolError> {
    let parsed: ToolAuditLogArgs = parse_args(args).map_err(ToolError::bad_args)?;
    let limit = clamp_limit(parsed.limit, DEFAULT_LIMIT);
    let events = ctx.services.audit.recent(limit, parsed.tool.as_deref());
    let mut out = String::new();
    for e in &events {
        let line = match &e.kind {
            AuditKind::ToolCall { tool, origin, ok, duration_ms, .. } => format!(
                "tool {tool} ok={ok} origin={} {duration_ms}ms",
                origin.as_ref().map(Origin::as_str).unwrap_or("-")
            ),
            AuditKind::Capture { chat_id, message_id, outcome, .. } => {
                format!("capture {chat_id}/{message_id} {outcome:?}")
            }
            AuditKind::SessionBound { generation } => format!("session bound #{generation}"),
            AuditKind::SessionUnbound { generation } => format!("session unbound #{generation}"),
            AuditKind::System { message } => message.clone(),
        };
        let _ = writeln!(out, "{} {line}", e.seq);
    }
    if events.is_empty() {
        out.push_str("no audit events");
    }
    Ok(ToolExecution::text(out).with_details(to_details("events", &events)?))
}

async fn health_check(ctx: ToolContext, _args: Value) -> Result<ToolExecution, ToolError> {
    let services = &ctx.services;
    let session = services.session.current();
    let archive = archive_blocking(&services.archive, |store| store.ping()).await;
    let pending = services.capture.pending_len();
    let generation = session.as_ref().map(|h| h.generation);
    let archive_error = archive.err().map(|e| e.to_string());
    let archive_ok = archive_error.is_none();
    let status = if archive_ok { "ok" } else { "degraded" };
    Ok(ToolExecution::text(format!(
        "{status}: session {}, archive {}, {pending} captures pending",
        if generation.is_some() { "bound" } else { "absent" },
        if archive_ok { "reachable" } else { "unreachable" },
    ))
    .with_details(json!({
        "status": status,
        "session_bound": generation.is_some(),
        "session_generation": generation,
        "archive_ok": archive_ok,
        "archive_error": archive_error,
        "capture_pending": pending,
    })))
}

async fn get_server_info(ctx: ToolContext, _args: Value) -> Result<ToolExecution, ToolError> {
    let services = &ctx.services;
    let tools = services.tool_names.get().cloned().unwrap_or_default();
    let resources = resource_catalogue().len();
    let prompts = prompt_catalogue().len();
    let output = format!(
        "{SERVER_NAME} {} (protocol {PROTOCOL_VERSION}): {} tools, {resources} resources, {prompts} prompts",
        env!("CARGO_PKG_VERSION"),
        tools.len()
    );
    Ok(ToolExecution::text(output).with_details(json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
        "total_tools": tools.len(),
        "tools": tools,
        "total_resources": resources,
        "total_prompts": prompts,
        "archive_path": services.archive.path().display().to_string(),
        "session_bound": services.session.is_bound(),
        "session_generation": services.session.generation(),
    })))
}

// ── Registration ─────────────────────────────────────────────────────────

fn builtin_handler(name: &str) -> Option<ToolHandler> {
    let handler = match name {
        "list_conversations" => tool_handler(list_conversations),
        "get_conversation" => tool_handler(get_conversation),
        "read_messages" => tool_handler(read_messages),
        "search_messages" => tool_handler(search_messages),
        "get_user_info" => tool_handler(get_user_info),
        "send_message" => tool_handler(send_message),
        "edit_message" => tool_handler(edit_message),
        "delete_message" => tool_handler(delete_message),
        "forward_message" => tool_handler(forward_message),
        "pin_message" => tool_handler(pin_message),
        "unpin_message" => tool_handler(unpin_message),
        "add_reaction" => tool_handler(add_reaction),
        "get_ephemeral_messages" => tool_handler(get_ephemeral_messages),
        "search_archive" => tool_handler(search_archive),
        "get_archive_stats" => tool_handler(get_archive_stats),
        "archive_chat" => tool_handler(archive_chat),
        "list_archived_chats" => tool_handler(list_archived_chats),
        "export_chat" => tool_handler(export_chat),
        "configure_ephemeral_capture" => tool_handler(configure_ephemeral_capture),
        "get_ephemeral_stats" => tool_handler(get_ephemeral_stats),
        "get_audit_log" => tool_handler(get_audit_log),
        "health_check" => tool_handler(health_check),
        "get_server_info" => tool_handler(get_server_info),
        _ => return None,
    };
    Some(handler)
}

/// Add the built-in catalogue. Hosts may register more tools before `build`.
pub fn register_builtin(mut builder: RegistryBuilder) -> Result<RegistryBuilder, RegistryError> {
    for def in tool_definitions_json() {
        let name = def["name"].as_str().unwrap_or_default().to_string();
        let handler = builtin_handler(&name)
            .ok_or_else(|| RegistryError::InvalidSchema(name.clone(), "no handler".into()))?;
        builder = builder.register_def(&def, handler)?;
    }
    Ok(builder)
}

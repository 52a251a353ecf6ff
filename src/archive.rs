//! SQLite-backed archive of conversations and messages.
//!
//! Independent of the host's own storage. Serves two roles: the fallback data
//! source when the live session is absent, and the durable destination for
//! ephemeral captures.
//!
//! Invariants:
//!   - messages are insert-only; the first write for `(chat_id, message_id)` wins
//!     and later writes come back as [`PutOutcome::Duplicate`]
//!   - the JSON payload of a message record is stored verbatim, so reads are
//!     byte-exact with what was written
//!   - one connection behind a mutex: all writes are serialized and every read
//!     sees the latest committed write

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::types::{
    ArchiveRecord, ChatId, Conversation, ConversationKind, Message, MessageId, Provenance,
    RecordBody, Sender, UserId, UserInfo, Volatility,
};
use crate::util::now_ms;

// ── Query types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    /// Conversation metadata refreshed in place.
    Updated,
    /// A message with this identifier already exists; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct MessageFilter {
    /// Only messages strictly older than this unix timestamp.
    pub before: Option<i64>,
    /// Only messages at or after this unix timestamp.
    pub after: Option<i64>,
    pub volatility: Option<Volatility>,
    pub volatile_only: bool,
    pub limit: usize,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            volatility: None,
            volatile_only: false,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub chat_id: Option<ChatId>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: usize,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            chat_id: None,
            since: None,
            until: None,
            limit: 50,
        }
    }
}

/// A message as read back from the archive, with its capture metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub captured_at_ms: i64,
    pub provenance: Provenance,
}

/// A conversation with its archived message counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedChat {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: i64,
    pub ephemeral_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub timestamp: i64,
    pub sender: Sender,
    pub snippet: String,
    pub volatility: Volatility,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveStats {
    pub conversations: i64,
    pub messages: i64,
    pub self_destructing: i64,
    pub view_once: i64,
    pub vanishing: i64,
    pub captured_before_destruction: i64,
    pub snapshots: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_message_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_message_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_ms: Option<i64>,
    pub db_bytes: u64,
}

// ═════════════════════════════════════════════════════════════════════════
// ArchiveStore
// ═════════════════════════════════════════════════════════════════════════

pub struct ArchiveStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

// ── Schema SQL ───────────────────────────────────────────────────────────

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    chat_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'unknown',
    username TEXT,
    member_count INTEGER,
    last_activity INTEGER NOT NULL DEFAULT 0,
    provenance TEXT NOT NULL,
    first_seen_ms INTEGER NOT NULL,
    updated_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_activity ON conversations(last_activity DESC);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    message_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sender_id INTEGER NOT NULL,
    sender_name TEXT NOT NULL DEFAULT '',
    sender_username TEXT,
    search_text TEXT NOT NULL DEFAULT '',
    volatility TEXT NOT NULL DEFAULT 'persistent',
    provenance TEXT NOT NULL,
    captured_at_ms INTEGER NOT NULL,
    payload BLOB NOT NULL,
    UNIQUE(chat_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id, captured_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_messages_volatility ON messages(volatility) WHERE volatility != 'persistent';

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    search_text,
    content='messages', content_rowid='id',
    tokenize='porter unicode61'
);

-- Messages are insert-only, so one trigger keeps the index in sync.
CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, search_text) VALUES (new.id, new.search_text);
END;
";

const MESSAGE_COLUMNS: &str = "payload, captured_at_ms, provenance";

// ── Core implementation ──────────────────────────────────────────────────

impl ArchiveStore {
    /// Open or create the archive file with full schema.
    pub fn open_or_create(path: &Path, durable: bool) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn, durable)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    fn apply_pragmas(conn: &Connection, durable: bool) -> Result<(), ArchiveError> {
        // FULL syncs the WAL on every commit; a capture ack must survive power loss.
        let synchronous = if durable { "FULL" } else { "NORMAL" };
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = {synchronous};
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -8000;"
        ))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ArchiveError> {
        self.conn.lock().map_err(|_| ArchiveError::Poisoned)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Liveness check for `health_check`.
    pub fn ping(&self) -> Result<(), ArchiveError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Persist a record. Returns only after the transaction has committed.
    pub fn put(&self, record: &ArchiveRecord) -> Result<PutOutcome, ArchiveError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = match &record.body {
            RecordBody::Message(message) => {
                let payload = serde_json::to_vec(record)?;
                let inserted = tx.execute(
                    "INSERT INTO messages (chat_id, message_id, timestamp, sender_id, sender_name,
                     sender_username, search_text, volatility, provenance, captured_at_ms, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(chat_id, message_id) DO NOTHING",
                    params![
                        message.chat_id,
                        message.message_id,
                        message.timestamp,
                        message.sender.id,
                        message.sender.name,
                        message.sender.username,
                        message.search_text(),
                        message.volatility.as_str(),
                        record.provenance.as_str(),
                        record.captured_at_ms,
                        payload,
                    ],
                )?;
                if inserted == 0 {
                    PutOutcome::Duplicate
                } else {
                    // First sighting of a chat through a message creates a placeholder row.
                    tx.execute(
                        "INSERT INTO conversations (chat_id, name, kind, last_activity, provenance,
                         first_seen_ms, updated_ms)
                         VALUES (?1, ?2, 'unknown', ?3, ?4, ?5, ?5)
                         ON CONFLICT(chat_id) DO UPDATE SET
                            last_activity = MAX(conversations.last_activity, excluded.last_activity),
                            updated_ms = excluded.updated_ms",
                        params![
                            message.chat_id,
                            format!("chat {}", message.chat_id),
                            message.timestamp,
                            record.provenance.as_str(),
                            record.captured_at_ms,
                        ],
                    )?;
                    PutOutcome::Inserted
                }
            }
            RecordBody::Conversation(conv) => {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM conversations WHERE chat_id = ?",
                        params![conv.id],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?
                    .is_some();
                tx.execute(
                    "INSERT INTO conversations (chat_id, name, kind, username, member_count,
                     last_activity, provenance, first_seen_ms, updated_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT(chat_id) DO UPDATE SET
                        name = excluded.name,
                        kind = excluded.kind,
                        username = excluded.username,
                        member_count = COALESCE(excluded.member_count, conversations.member_count),
                        last_activity = MAX(conversations.last_activity, excluded.last_activity),
                        updated_ms = excluded.updated_ms",
                    params![
                        conv.id,
                        conv.name,
                        conv.kind.as_str(),
                        conv.username,
                        conv.member_count,
                        conv.last_activity,
                        record.provenance.as_str(),
                        record.captured_at_ms,
                    ],
                )?;
                if exists {
                    PutOutcome::Updated
                } else {
                    PutOutcome::Inserted
                }
            }
        };
        tx.commit()?;
        if outcome == PutOutcome::Duplicate {
            debug!(target: "archive", "duplicate put rejected");
        }
        Ok(outcome)
    }

    // ── Message reads ────────────────────────────────────────────────

    /// The record exactly as first written.
    pub fn get_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<ArchiveRecord>, ArchiveError> {
        match self.message_payload(chat_id, message_id)? {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }

    /// Raw stored bytes of a message record.
    pub fn message_payload(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<Vec<u8>>, ArchiveError> {
        let conn = self.lock()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM messages WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// Messages of one conversation, newest first.
    pub fn get(
        &self,
        chat_id: ChatId,
        filter: &MessageFilter,
    ) -> Result<Vec<ArchivedMessage>, ArchiveError> {
        self.query_messages(Some(chat_id), filter)
    }

    /// Volatile captures across all (or one) conversations, newest first.
    pub fn ephemeral(
        &self,
        chat_id: Option<ChatId>,
        volatility: Option<Volatility>,
        limit: usize,
    ) -> Result<Vec<ArchivedMessage>, ArchiveError> {
        let filter = MessageFilter {
            volatility,
            volatile_only: true,
            limit,
            ..MessageFilter::default()
        };
        self.query_messages(chat_id, &filter)
    }

    fn query_messages(
        &self,
        chat_id: Option<ChatId>,
        filter: &MessageFilter,
    ) -> Result<Vec<ArchivedMessage>, ArchiveError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(chat_id) = chat_id {
            bind_values.push(Box::new(chat_id));
            conditions.push(format!("chat_id = ?{}", bind_values.len()));
        }
        if let Some(before) = filter.before {
            bind_values.push(Box::new(before));
            conditions.push(format!("timestamp < ?{}", bind_values.len()));
        }
        if let Some(after) = filter.after {
            bind_values.push(Box::new(after));
            conditions.push(format!("timestamp >= ?{}", bind_values.len()));
        }
        if let Some(volatility) = filter.volatility {
            bind_values.push(Box::new(volatility.as_str()));
            conditions.push(format!("volatility = ?{}", bind_values.len()));
        } else if filter.volatile_only {
            conditions.push("volatility != 'persistent'".to_string());
        }

        bind_values.push(Box::new(filter.limit as i64));
        let limit_idx = bind_values.len();

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages {where_clause}
             ORDER BY timestamp DESC, message_id DESC
             LIMIT ?{limit_idx}"
        );

        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind_values.iter().map(|b| b.as_ref()).collect();

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(bind_refs.as_slice(), |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (payload, captured_at_ms, provenance) = row?;
            match Self::decode_message(&payload) {
                Some(message) => out.push(ArchivedMessage {
                    message,
                    captured_at_ms,
                    provenance: Provenance::from_db_str(&provenance),
                }),
                None => warn!(target: "archive", "skipping undecodable message payload"),
            }
        }
        Ok(out)
    }

    fn decode_message(payload: &[u8]) -> Option<Message> {
        let record: ArchiveRecord = serde_json::from_slice(payload).ok()?;
        match record.body {
            RecordBody::Message(message) => Some(message),
            RecordBody::Conversation(_) => None,
        }
    }

    // ── Search (FTS5) ────────────────────────────────────────────────

    pub fn search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<SearchHit>, ArchiveError> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut conditions = Vec::new();
        let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        // FTS MATCH is always bound at index 1
        bind_values.push(Box::new(fts_query));

        if let Some(chat_id) = filter.chat_id {
            bind_values.push(Box::new(chat_id));
            conditions.push(format!("m.chat_id = ?{}", bind_values.len()));
        }
        if let Some(since) = filter.since {
            bind_values.push(Box::new(since));
            conditions.push(format!("m.timestamp >= ?{}", bind_values.len()));
        }
        if let Some(until) = filter.until {
            bind_values.push(Box::new(until));
            conditions.push(format!("m.timestamp <= ?{}", bind_values.len()));
        }

        bind_values.push(Box::new(filter.limit as i64));
        let limit_idx = bind_values.len();

        let extra = if conditions.is_empty() {
            String::new()
        } else {
            format!("AND {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT m.chat_id, m.message_id, m.timestamp, m.sender_id, m.sender_name,
                    m.sender_username, m.volatility,
                    snippet(messages_fts, 0, '', '', '…', 24) AS snippet,
                    bm25(messages_fts) AS rank_score
             FROM messages_fts fts
             JOIN messages m ON m.id = fts.rowid
             WHERE messages_fts MATCH ?1 {extra}
             ORDER BY rank_score
             LIMIT ?{limit_idx}"
        );

        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind_values.iter().map(|b| b.as_ref()).collect();

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(bind_refs.as_slice(), |row| {
            let score: f64 = row.get(8)?;
            Ok(SearchHit {
                chat_id: row.get(0)?,
                message_id: row.get(1)?,
                timestamp: row.get(2)?,
                sender: Sender {
                    id: row.get(3)?,
                    name: row.get(4)?,
                    username: row.get(5)?,
                },
                volatility: Volatility::from_db_str(&row.get::<_, String>(6)?),
                snippet: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                score: score.abs() as f32, // bm25 is negative
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            match row {
                Ok(hit) => hits.push(hit),
                Err(e) => warn!(target: "archive", error = %e, "search row error"),
            }
        }
        Ok(hits)
    }

    /// Quote each term for FTS5 MATCH and OR them together for broad recall.
    fn sanitize_fts_query(query: &str) -> String {
        let cleaned: String = query
            .chars()
            .map(|c| match c {
                '"' | '*' | '(' | ')' | ':' | '^' | '{' | '}' | '[' | ']' | '!' | '+' | '-'
                | '~' | '\\' | '.' | '@' | '#' | ',' | ';' | '/' | '&' | '|' | '?' => ' ',
                _ => c,
            })
            .collect();
        let tokens: Vec<String> = cleaned
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2 || t.chars().all(|c| c.is_ascii_digit()))
            .map(|t| format!("\"{t}\""))
            .collect();
        tokens.join(" OR ")
    }

    // ── Conversations & users ────────────────────────────────────────

    /// Conversations by most recent activity.
    pub fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, ArchiveError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, name, kind, username, member_count, last_activity
             FROM conversations ORDER BY last_activity DESC, chat_id LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_conversation)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Archived conversations by most recent activity, with message counts.
    pub fn archived_chats(&self, limit: usize) -> Result<Vec<ArchivedChat>, ArchiveError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.chat_id, c.name, c.kind, c.username, c.member_count, c.last_activity,
                    COUNT(m.message_id),
                    COALESCE(SUM(CASE WHEN m.volatility != 'persistent' THEN 1 ELSE 0 END), 0)
             FROM conversations c LEFT JOIN messages m ON m.chat_id = c.chat_id
             GROUP BY c.chat_id
             ORDER BY c.last_activity DESC, c.chat_id
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ArchivedChat {
                conversation: Self::row_to_conversation(row)?,
                message_count: row.get(6)?,
                ephemeral_count: row.get(7)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn conversation(&self, chat_id: ChatId) -> Result<Option<Conversation>, ArchiveError> {
        let conn = self.lock()?;
        let conv = conn
            .query_row(
                "SELECT chat_id, name, kind, username, member_count, last_activity
                 FROM conversations WHERE chat_id = ?",
                params![chat_id],
                Self::row_to_conversation,
            )
            .optional()?;
        Ok(conv)
    }

    /// Best-effort user profile assembled from the most recent archived message they sent.
    pub fn find_user(&self, user_id: UserId) -> Result<Option<UserInfo>, ArchiveError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT sender_name, sender_username FROM messages
                 WHERE sender_id = ? ORDER BY captured_at_ms DESC, id DESC LIMIT 1",
                params![user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        let user = match row {
            Some((name, username)) => Some(UserInfo {
                id: user_id,
                name,
                username,
                is_bot: false,
                about: None,
            }),
            None => conn
                // Private chats are keyed by the peer's user id.
                .query_row(
                    "SELECT name, username, kind FROM conversations
                     WHERE chat_id = ? AND kind IN ('user', 'bot')",
                    params![user_id],
                    |row| {
                        Ok(UserInfo {
                            id: user_id,
                            name: row.get(0)?,
                            username: row.get(1)?,
                            is_bot: row.get::<_, String>(2)? == "bot",
                            about: None,
                        })
                    },
                )
                .optional()?,
        };
        Ok(user)
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<ArchiveStats, ArchiveError> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        };
        let mut stats = ArchiveStats {
            conversations: count("SELECT COUNT(*) FROM conversations")?,
            messages: count("SELECT COUNT(*) FROM messages")?,
            self_destructing: count(
                "SELECT COUNT(*) FROM messages WHERE volatility = 'self_destructing'",
            )?,
            view_once: count("SELECT COUNT(*) FROM messages WHERE volatility = 'view_once'")?,
            vanishing: count("SELECT COUNT(*) FROM messages WHERE volatility = 'vanishing'")?,
            captured_before_destruction: count(
                "SELECT COUNT(*) FROM messages WHERE provenance = 'captured_before_destruction'",
            )?,
            snapshots: count("SELECT COUNT(*) FROM messages WHERE provenance = 'snapshot'")?,
            ..ArchiveStats::default()
        };
        let (oldest, newest, last_capture) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp), MAX(captured_at_ms) FROM messages",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )?;
        stats.oldest_message_ts = oldest;
        stats.newest_message_ts = newest;
        stats.last_capture_ms = last_capture;
        stats.db_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(stats)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation, rusqlite::Error> {
        Ok(Conversation {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: ConversationKind::from_db_str(&row.get::<_, String>(2)?),
            username: row.get(3)?,
            member_count: row.get(4)?,
            last_activity: row.get(5)?,
        })
    }
}

/// Snapshot a batch of live messages. Returns (inserted, duplicates).
pub fn put_snapshot(
    store: &ArchiveStore,
    messages: impl IntoIterator<Item = Message>,
) -> Result<(usize, usize), ArchiveError> {
    let captured_at_ms = now_ms();
    let mut inserted = 0;
    let mut duplicates = 0;
    for message in messages {
        let record = ArchiveRecord {
            captured_at_ms,
            provenance: Provenance::Snapshot,
            body: RecordBody::Message(message),
        };
        match store.put(&record)? {
            PutOutcome::Duplicate => duplicates += 1,
            _ => inserted += 1,
        }
    }
    Ok((inserted, duplicates))
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chatgate_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("archive_{}_{name}.sqlite", std::process::id()))
    }

    fn fresh_store(name: &str) -> (ArchiveStore, PathBuf) {
        let path = temp_db_path(name);
        let _ = std::fs::remove_file(&path);
        let store = ArchiveStore::open_or_create(&path, false).unwrap();
        (store, path)
    }

    fn cleanup(path: &Path) {
        std::fs::remove_file(path).ok();
        std::fs::remove_file(path.with_extension("sqlite-wal")).ok();
        std::fs::remove_file(path.with_extension("sqlite-shm")).ok();
    }

    fn message(chat_id: ChatId, message_id: MessageId, ts: i64, text: &str) -> Message {
        Message {
            chat_id,
            message_id,
            timestamp: ts,
            sender: Sender {
                id: 7,
                name: "Ada".into(),
                username: Some("ada".into()),
            },
            text: text.into(),
            media: None,
            volatility: Volatility::Persistent,
            ttl_seconds: None,
            reply_to: None,
            outgoing: false,
        }
    }

    #[test]
    fn test_open_or_create() {
        let (store, path) = fresh_store("open_create");
        let stats = store.stats().unwrap();
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.conversations, 0);
        assert!(store.list_conversations(10).unwrap().is_empty());
        store.ping().unwrap();
        cleanup(&path);
    }

    #[test]
    fn test_put_then_get_is_byte_exact() {
        let (store, path) = fresh_store("put_get");
        let record = ArchiveRecord::message(message(1, 10, 100, "hello"), Provenance::Snapshot);
        assert_eq!(store.put(&record).unwrap(), PutOutcome::Inserted);

        let payload = store.message_payload(1, 10).unwrap().unwrap();
        assert_eq!(payload, serde_json::to_vec(&record).unwrap());
        assert_eq!(store.get_message(1, 10).unwrap(), Some(record));
        assert_eq!(store.get_message(1, 11).unwrap(), None);
        cleanup(&path);
    }

    #[test]
    fn test_second_put_is_rejected_and_first_kept() {
        let (store, path) = fresh_store("write_once");
        let mut original = message(1, 10, 100, "original");
        original.volatility = Volatility::ViewOnce;
        let first = ArchiveRecord::message(original.clone(), Provenance::CapturedBeforeDestruction);
        store.put(&first).unwrap();

        let mut later = original;
        later.text = String::new();
        let second = ArchiveRecord::message(later, Provenance::Snapshot);
        assert_eq!(store.put(&second).unwrap(), PutOutcome::Duplicate);

        assert_eq!(store.get_message(1, 10).unwrap(), Some(first));
        assert_eq!(store.stats().unwrap().messages, 1);
        cleanup(&path);
    }

    #[test]
    fn test_message_creates_placeholder_conversation() {
        let (store, path) = fresh_store("placeholder");
        store
            .put(&ArchiveRecord::message(message(42, 1, 500, "hi"), Provenance::Snapshot))
            .unwrap();
        let conv = store.conversation(42).unwrap().unwrap();
        assert_eq!(conv.name, "chat 42");
        assert_eq!(conv.kind, ConversationKind::Unknown);
        assert_eq!(conv.last_activity, 500);
        cleanup(&path);
    }

    #[test]
    fn test_conversation_upsert_keeps_activity_monotonic() {
        let (store, path) = fresh_store("conv_upsert");
        let conv = Conversation {
            id: 5,
            name: "Team".into(),
            kind: ConversationKind::Group,
            username: None,
            member_count: Some(3),
            last_activity: 1_000,
        };
        let outcome = store
            .put(&ArchiveRecord::conversation(conv.clone(), Provenance::Snapshot))
            .unwrap();
        assert_eq!(outcome, PutOutcome::Inserted);

        let mut renamed = conv;
        renamed.name = "Team (renamed)".into();
        renamed.last_activity = 10;
        renamed.member_count = None;
        let outcome = store
            .put(&ArchiveRecord::conversation(renamed, Provenance::Snapshot))
            .unwrap();
        assert_eq!(outcome, PutOutcome::Updated);

        let stored = store.conversation(5).unwrap().unwrap();
        assert_eq!(stored.name, "Team (renamed)");
        assert_eq!(stored.last_activity, 1_000);
        assert_eq!(stored.member_count, Some(3));
        cleanup(&path);
    }

    #[test]
    fn test_get_filters_and_orders() {
        let (store, path) = fresh_store("filters");
        for (id, ts) in [(1, 100), (2, 200), (3, 300), (4, 400)] {
            store
                .put(&ArchiveRecord::message(message(9, id, ts, "x"), Provenance::Snapshot))
                .unwrap();
        }
        store
            .put(&ArchiveRecord::message(message(8, 1, 999, "other chat"), Provenance::Snapshot))
            .unwrap();

        let all = store.get(9, &MessageFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.message.message_id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);

        let filter = MessageFilter {
            before: Some(400),
            after: Some(200),
            ..MessageFilter::default()
        };
        let ids: Vec<_> = store
            .get(9, &filter)
            .unwrap()
            .iter()
            .map(|m| m.message.message_id)
            .collect();
        assert_eq!(ids, vec![3, 2]);

        let limited = store
            .get(9, &MessageFilter { limit: 1, ..MessageFilter::default() })
            .unwrap();
        assert_eq!(limited.len(), 1);
        cleanup(&path);
    }

    #[test]
    fn test_ephemeral_query() {
        let (store, path) = fresh_store("ephemeral");
        let mut a = message(1, 1, 10, "burn after reading");
        a.volatility = Volatility::SelfDestructing;
        let mut b = message(2, 1, 20, "photo");
        b.volatility = Volatility::ViewOnce;
        let c = message(1, 2, 30, "normal");
        for m in [a, b, c] {
            store
                .put(&ArchiveRecord::message(m, Provenance::CapturedBeforeDestruction))
                .unwrap();
        }
        assert_eq!(store.ephemeral(None, None, 10).unwrap().len(), 2);
        assert_eq!(store.ephemeral(Some(1), None, 10).unwrap().len(), 1);
        let view_once = store.ephemeral(None, Some(Volatility::ViewOnce), 10).unwrap();
        assert_eq!(view_once.len(), 1);
        assert_eq!(view_once[0].message.chat_id, 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.self_destructing, 1);
        assert_eq!(stats.view_once, 1);
        assert_eq!(stats.captured_before_destruction, 3);
        cleanup(&path);
    }

    #[test]
    fn test_search() {
        let (store, path) = fresh_store("search");
        store
            .put(&ArchiveRecord::message(
                message(1, 1, 100, "Rust is a systems programming language"),
                Provenance::Snapshot,
            ))
            .unwrap();
        store
            .put(&ArchiveRecord::message(
                message(2, 1, 200, "Python is a scripting language"),
                Provenance::Snapshot,
            ))
            .unwrap();

        let hits = store.search("rust programming", &SearchFilter::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chat_id, 1);

        let hits = store.search("language", &SearchFilter::default()).unwrap();
        assert_eq!(hits.len(), 2);

        let scoped = SearchFilter {
            chat_id: Some(2),
            ..SearchFilter::default()
        };
        let hits = store.search("language", &scoped).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chat_id, 2);

        let ranged = SearchFilter {
            since: Some(150),
            ..SearchFilter::default()
        };
        assert_eq!(store.search("language", &ranged).unwrap().len(), 1);

        assert!(store.search("  ", &SearchFilter::default()).unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_find_user() {
        let (store, path) = fresh_store("find_user");
        assert!(store.find_user(7).unwrap().is_none());
        store
            .put(&ArchiveRecord::message(message(1, 1, 1, "hey"), Provenance::Snapshot))
            .unwrap();
        let user = store.find_user(7).unwrap().unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.username.as_deref(), Some("ada"));

        store
            .put(&ArchiveRecord::conversation(
                Conversation {
                    id: 99,
                    name: "Helper".into(),
                    kind: ConversationKind::Bot,
                    username: Some("helper_bot".into()),
                    member_count: None,
                    last_activity: 0,
                },
                Provenance::Snapshot,
            ))
            .unwrap();
        let bot = store.find_user(99).unwrap().unwrap();
        assert!(bot.is_bot);
        cleanup(&path);
    }

    #[test]
    fn test_put_snapshot_counts_duplicates() {
        let (store, path) = fresh_store("snapshot");
        let batch = vec![message(1, 1, 1, "a"), message(1, 2, 2, "b")];
        assert_eq!(put_snapshot(&store, batch.clone()).unwrap(), (2, 0));
        assert_eq!(put_snapshot(&store, batch).unwrap(), (0, 2));
        cleanup(&path);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let path = temp_db_path("reopen");
        let _ = std::fs::remove_file(&path);
        {
            let store = ArchiveStore::open_or_create(&path, true).unwrap();
            store
                .put(&ArchiveRecord::message(message(3, 3, 3, "durable"), Provenance::Snapshot))
                .unwrap();
        }
        let store = ArchiveStore::open_or_create(&path, true).unwrap();
        assert!(store.get_message(3, 3).unwrap().is_some());
        cleanup(&path);
    }

    #[test]
    fn test_racing_puts_of_one_message_keep_the_winner() {
        use std::sync::{Arc, Barrier};

        let (store, path) = fresh_store("race");
        let store = Arc::new(store);
        let mut captured = message(4, 40, 400, "view once photo");
        captured.volatility = Volatility::ViewOnce;
        let mut snapshot = captured.clone();
        snapshot.text = "snapshot copy".into();
        let records = [
            ArchiveRecord::message(captured, Provenance::CapturedBeforeDestruction),
            ArchiveRecord::message(snapshot, Provenance::Snapshot),
        ];

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = records
            .iter()
            .cloned()
            .map(|record| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.put(&record).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<PutOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let inserted = outcomes.iter().filter(|o| **o == PutOutcome::Inserted).count();
        let duplicates = outcomes.iter().filter(|o| **o == PutOutcome::Duplicate).count();
        assert_eq!((inserted, duplicates), (1, 1));

        let winner = &records[outcomes
            .iter()
            .position(|o| *o == PutOutcome::Inserted)
            .unwrap()];
        let stored = store.message_payload(4, 40).unwrap().unwrap();
        assert_eq!(stored, serde_json::to_vec(winner).unwrap());
        assert_eq!(store.stats().unwrap().messages, 1);
        cleanup(&path);
    }

    #[test]
    fn test_archived_chats_counts_messages() {
        let (store, path) = fresh_store("archived_chats");
        let mut gone = message(1, 2, 20, "gone");
        gone.volatility = Volatility::Vanishing;
        for m in [message(1, 1, 10, "a"), gone, message(2, 1, 30, "b")] {
            store
                .put(&ArchiveRecord::message(m, Provenance::Snapshot))
                .unwrap();
        }
        let chats = store.archived_chats(10).unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].conversation.id, 2);
        assert_eq!(chats[1].message_count, 2);
        assert_eq!(chats[1].ephemeral_count, 1);
        assert_eq!(store.stats().unwrap().vanishing, 1);
        cleanup(&path);
    }

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(
            ArchiveStore::sanitize_fts_query("hello world"),
            "\"hello\" OR \"world\""
        );
        assert_eq!(ArchiveStore::sanitize_fts_query("\"quoted\""), "\"quoted\"");
        assert_eq!(ArchiveStore::sanitize_fts_query("a b"), "");
        assert_eq!(ArchiveStore::sanitize_fts_query("7"), "\"7\"");
        assert_eq!(
            ArchiveStore::sanitize_fts_query("NOT this"),
            "\"NOT\" OR \"this\""
        );
    }
}

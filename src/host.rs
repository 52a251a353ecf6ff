//! Interfaces the gateway consumes from the surrounding application.
//!
//! [`LiveSource`] is the live handle a host publishes once its session is
//! ready. [`LifecycleObserver`] is what the host calls while it receives and
//! purges volatile messages. [`MemoryHost`] implements both sides in memory
//! for tests and the `--live-fixture` demo.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LiveError;
use crate::types::{ChatId, Conversation, Message, MessageId, Sender, UserId, UserInfo};
use crate::util::now_secs;

#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub limit: usize,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

/// Live read/write operations. Each maps to one tool handler's live attempt.
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, LiveError>;
    async fn conversation(&self, chat_id: ChatId) -> Result<Conversation, LiveError>;
    async fn read_messages(
        &self,
        chat_id: ChatId,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, LiveError>;
    async fn search_messages(
        &self,
        query: &str,
        chat_id: Option<ChatId>,
        limit: usize,
    ) -> Result<Vec<Message>, LiveError>;
    async fn user_info(&self, user_id: UserId) -> Result<UserInfo, LiveError>;
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, LiveError>;
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, LiveError>;
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), LiveError>;
    /// Copy a message into another conversation; returns the new message.
    async fn forward_message(
        &self,
        from_chat_id: ChatId,
        to_chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Message, LiveError>;
    async fn pin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        notify: bool,
    ) -> Result<(), LiveError>;
    async fn unpin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), LiveError>;
    async fn add_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), LiveError>;
}

/// What the host gets back from a lifecycle notification. Returning it is the
/// acknowledgement: the host may purge its copy as soon as it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureAck {
    /// Durably written to the archive.
    Captured,
    /// Already in the archive from an earlier capture.
    Duplicate,
    /// Not a class the monitor is configured to capture.
    Skipped,
    /// Store write failed; held in the bounded retry queue.
    Deferred,
    /// Could not be captured and will not be retried.
    Lost,
}

/// Synchronous on purpose: the host's purge pipeline waits on these calls.
pub trait LifecycleObserver: Send + Sync {
    fn on_message_announced(&self, message: &Message) -> CaptureAck;
    fn on_message_about_to_purge(&self, chat_id: ChatId, message_id: MessageId) -> CaptureAck;
}

// ═════════════════════════════════════════════════════════════════════════
// MemoryHost
// ═════════════════════════════════════════════════════════════════════════

/// Fixture file shape for [`MemoryHost::from_fixture`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostFixture {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub users: Vec<UserInfo>,
    pub self_user: Option<Sender>,
}

#[derive(Default)]
struct HostState {
    conversations: BTreeMap<ChatId, Conversation>,
    messages: BTreeMap<ChatId, Vec<Message>>,
    users: BTreeMap<UserId, UserInfo>,
    pinned: BTreeMap<ChatId, BTreeSet<MessageId>>,
    reactions: BTreeMap<(ChatId, MessageId), Vec<String>>,
}

impl HostState {
    fn find(&self, chat_id: ChatId, message_id: MessageId) -> Option<&Message> {
        self.messages
            .get(&chat_id)
            .and_then(|list| list.iter().find(|m| m.message_id == message_id))
    }
}

pub struct MemoryHost {
    state: RwLock<HostState>,
    me: Sender,
    next_message_id: AtomicI64,
    failing: AtomicBool,
    invalid: AtomicBool,
    stall_ms: AtomicU64,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HostState::default()),
            me: Sender {
                id: 1,
                name: "me".into(),
                username: None,
            },
            next_message_id: AtomicI64::new(1_000_000),
            failing: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
            stall_ms: AtomicU64::new(0),
        }
    }

    pub fn from_fixture(path: &Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(path)?;
        let fixture: HostFixture = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut host = Self::new();
        if let Some(me) = fixture.self_user {
            host.me = me;
        }
        for conv in fixture.conversations {
            host.add_conversation(conv);
        }
        for user in fixture.users {
            host.add_user(user);
        }
        for message in fixture.messages {
            host.add_message(message);
        }
        Ok(host)
    }

    // ── Fixture mutation ─────────────────────────────────────────────

    pub fn add_conversation(&self, conversation: Conversation) {
        if let Ok(mut state) = self.state.write() {
            state.conversations.insert(conversation.id, conversation);
        }
    }

    pub fn add_user(&self, user: UserInfo) {
        if let Ok(mut state) = self.state.write() {
            state.users.insert(user.id, user);
        }
    }

    pub fn add_message(&self, message: Message) {
        if let Ok(mut state) = self.state.write() {
            if let Some(conv) = state.conversations.get_mut(&message.chat_id) {
                conv.last_activity = conv.last_activity.max(message.timestamp);
            }
            let bump = message.message_id + 1;
            state.messages.entry(message.chat_id).or_default().push(message);
            self.next_message_id.fetch_max(bump, Ordering::Relaxed);
        }
    }

    /// Deliver a new message the way a real host would: store, then announce.
    pub fn receive(&self, message: Message, observer: &dyn LifecycleObserver) -> CaptureAck {
        self.add_message(message.clone());
        observer.on_message_announced(&message)
    }

    /// Notify, then drop the local copy once acknowledged.
    pub fn purge(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        observer: &dyn LifecycleObserver,
    ) -> CaptureAck {
        let ack = observer.on_message_about_to_purge(chat_id, message_id);
        if let Ok(mut state) = self.state.write() {
            if let Some(list) = state.messages.get_mut(&chat_id) {
                list.retain(|m| m.message_id != message_id);
            }
        }
        ack
    }

    pub fn contains_message(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        self.state
            .read()
            .map(|s| {
                s.messages
                    .get(&chat_id)
                    .is_some_and(|list| list.iter().any(|m| m.message_id == message_id))
            })
            .unwrap_or(false)
    }

    pub fn is_pinned(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        self.state
            .read()
            .map(|s| s.pinned.get(&chat_id).is_some_and(|p| p.contains(&message_id)))
            .unwrap_or(false)
    }

    pub fn reactions(&self, chat_id: ChatId, message_id: MessageId) -> Vec<String> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.reactions.get(&(chat_id, message_id)).cloned())
            .unwrap_or_default()
    }

    // ── Failure switches ─────────────────────────────────────────────

    /// Every call returns `LiveError::Failed`.
    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    /// Every call returns `LiveError::SessionInvalid`.
    pub fn set_invalid(&self, on: bool) {
        self.invalid.store(on, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn set_stall(&self, stall: Duration) {
        self.stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), LiveError> {
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        if self.invalid.load(Ordering::SeqCst) {
            return Err(LiveError::SessionInvalid);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LiveError::Failed("injected failure".into()));
        }
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, HostState>, LiveError> {
        self.state
            .read()
            .map_err(|_| LiveError::Failed("host state poisoned".into()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, HostState>, LiveError> {
        self.state
            .write()
            .map_err(|_| LiveError::Failed("host state poisoned".into()))
    }
}

fn newest_first(mut messages: Vec<Message>, limit: usize) -> Vec<Message> {
    messages.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.message_id.cmp(&a.message_id))
    });
    messages.truncate(limit);
    messages
}

#[async_trait]
impl LiveSource for MemoryHost {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, LiveError> {
        self.gate().await?;
        let state = self.read_state()?;
        let mut convs: Vec<Conversation> = state.conversations.values().cloned().collect();
        convs.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.id.cmp(&b.id)));
        convs.truncate(limit);
        Ok(convs)
    }

    async fn conversation(&self, chat_id: ChatId) -> Result<Conversation, LiveError> {
        self.gate().await?;
        let state = self.read_state()?;
        state
            .conversations
            .get(&chat_id)
            .cloned()
            .ok_or(LiveError::NotFound)
    }

    async fn read_messages(
        &self,
        chat_id: ChatId,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, LiveError> {
        self.gate().await?;
        let state = self.read_state()?;
        if !state.conversations.contains_key(&chat_id) && !state.messages.contains_key(&chat_id) {
            return Err(LiveError::NotFound);
        }
        let selected: Vec<Message> = state
            .messages
            .get(&chat_id)
            .into_iter()
            .flatten()
            .filter(|m| query.before.is_none_or(|b| m.timestamp < b))
            .filter(|m| query.after.is_none_or(|a| m.timestamp >= a))
            .cloned()
            .collect();
        Ok(newest_first(selected, query.limit))
    }

    async fn search_messages(
        &self,
        query: &str,
        chat_id: Option<ChatId>,
        limit: usize,
    ) -> Result<Vec<Message>, LiveError> {
        self.gate().await?;
        let needle = query.to_lowercase();
        let state = self.read_state()?;
        let hits: Vec<Message> = state
            .messages
            .iter()
            .filter(|(id, _)| chat_id.is_none_or(|c| c == **id))
            .flat_map(|(_, list)| list.iter())
            .filter(|m| m.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(newest_first(hits, limit))
    }

    async fn user_info(&self, user_id: UserId) -> Result<UserInfo, LiveError> {
        self.gate().await?;
        let state = self.read_state()?;
        state.users.get(&user_id).cloned().ok_or(LiveError::NotFound)
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        let Some(conv) = state.conversations.get_mut(&chat_id) else {
            return Err(LiveError::NotFound);
        };
        let message = Message {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            timestamp: now_secs(),
            sender: self.me.clone(),
            text: text.to_string(),
            media: None,
            volatility: Default::default(),
            ttl_seconds: None,
            reply_to,
            outgoing: true,
        };
        conv.last_activity = conv.last_activity.max(message.timestamp);
        state.messages.entry(chat_id).or_default().push(message.clone());
        Ok(message)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        let message = state
            .messages
            .get_mut(&chat_id)
            .and_then(|list| list.iter_mut().find(|m| m.message_id == message_id))
            .ok_or(LiveError::NotFound)?;
        message.text = text.to_string();
        Ok(message.clone())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        let list = state.messages.get_mut(&chat_id).ok_or(LiveError::NotFound)?;
        let before = list.len();
        list.retain(|m| m.message_id != message_id);
        if list.len() == before {
            return Err(LiveError::NotFound);
        }
        Ok(())
    }

    async fn forward_message(
        &self,
        from_chat_id: ChatId,
        to_chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Message, LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        let original = state
            .find(from_chat_id, message_id)
            .cloned()
            .ok_or(LiveError::NotFound)?;
        let Some(conv) = state.conversations.get_mut(&to_chat_id) else {
            return Err(LiveError::NotFound);
        };
        let message = Message {
            chat_id: to_chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            timestamp: now_secs(),
            sender: self.me.clone(),
            volatility: Default::default(),
            ttl_seconds: None,
            reply_to: None,
            outgoing: true,
            ..original
        };
        conv.last_activity = conv.last_activity.max(message.timestamp);
        state.messages.entry(to_chat_id).or_default().push(message.clone());
        Ok(message)
    }

    async fn pin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        _notify: bool,
    ) -> Result<(), LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        if state.find(chat_id, message_id).is_none() {
            return Err(LiveError::NotFound);
        }
        state.pinned.entry(chat_id).or_default().insert(message_id);
        Ok(())
    }

    async fn unpin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        let removed = state
            .pinned
            .get_mut(&chat_id)
            .is_some_and(|p| p.remove(&message_id));
        if !removed {
            return Err(LiveError::NotFound);
        }
        Ok(())
    }

    async fn add_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), LiveError> {
        self.gate().await?;
        let mut state = self.write_state()?;
        if state.find(chat_id, message_id).is_none() {
            return Err(LiveError::NotFound);
        }
        let list = state.reactions.entry((chat_id, message_id)).or_default();
        if !list.iter().any(|e| e == emoji) {
            list.push(emoji.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{ConversationKind, Volatility};

    pub(crate) fn sample_conversation(id: ChatId, name: &str, last_activity: i64) -> Conversation {
        Conversation {
            id,
            name: name.into(),
            kind: ConversationKind::Group,
            username: None,
            member_count: Some(2),
            last_activity,
        }
    }

    pub(crate) fn sample_message(chat_id: ChatId, message_id: MessageId, text: &str) -> Message {
        Message {
            chat_id,
            message_id,
            timestamp: 1_700_000_000 + message_id,
            sender: Sender {
                id: 42,
                name: "Grace".into(),
                username: Some("grace".into()),
            },
            text: text.into(),
            media: None,
            volatility: Volatility::Persistent,
            ttl_seconds: None,
            reply_to: None,
            outgoing: false,
        }
    }

    pub(crate) fn seeded_host() -> MemoryHost {
        let host = MemoryHost::new();
        host.add_conversation(sample_conversation(10, "ops", 0));
        host.add_conversation(sample_conversation(20, "design", 0));
        host.add_message(sample_message(10, 1, "deploy at noon"));
        host.add_message(sample_message(10, 2, "deploy done"));
        host.add_message(sample_message(20, 3, "new mockups"));
        host.add_user(UserInfo {
            id: 42,
            name: "Grace".into(),
            username: Some("grace".into()),
            is_bot: false,
            about: Some("ops lead".into()),
        });
        host
    }

    #[tokio::test]
    async fn reads_are_newest_first_and_filtered() {
        let host = seeded_host();
        let all = host
            .read_messages(10, &MessageQuery { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.iter().map(|m| m.message_id).collect::<Vec<_>>(), vec![2, 1]);

        let older = host
            .read_messages(
                10,
                &MessageQuery {
                    limit: 10,
                    before: Some(1_700_000_002),
                    after: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(older.len(), 1);

        let convs = host.list_conversations(10).await.unwrap();
        assert_eq!(convs[0].id, 20);
    }

    #[tokio::test]
    async fn send_edit_delete() {
        let host = seeded_host();
        let sent = host.send_message(10, "hello", Some(2)).await.unwrap();
        assert!(sent.outgoing);
        assert!(sent.message_id > 3);
        let edited = host.edit_message(10, sent.message_id, "hello!").await.unwrap();
        assert_eq!(edited.text, "hello!");
        host.delete_message(10, sent.message_id).await.unwrap();
        assert_eq!(
            host.delete_message(10, sent.message_id).await,
            Err(LiveError::NotFound)
        );
        assert_eq!(host.send_message(99, "x", None).await.unwrap_err(), LiveError::NotFound);
    }

    #[tokio::test]
    async fn forward_pin_and_react() {
        let host = seeded_host();
        let copy = host.forward_message(10, 20, 1).await.unwrap();
        assert_eq!(copy.chat_id, 20);
        assert_eq!(copy.text, "deploy at noon");
        assert!(host.contains_message(20, copy.message_id));
        assert_eq!(host.forward_message(10, 99, 1).await.unwrap_err(), LiveError::NotFound);

        host.pin_message(10, 2, false).await.unwrap();
        assert!(host.is_pinned(10, 2));
        host.unpin_message(10, 2).await.unwrap();
        assert!(!host.is_pinned(10, 2));
        assert_eq!(host.unpin_message(10, 2).await, Err(LiveError::NotFound));

        host.add_reaction(10, 1, "👍").await.unwrap();
        host.add_reaction(10, 1, "👍").await.unwrap();
        assert_eq!(host.reactions(10, 1), vec!["👍".to_string()]);
        assert_eq!(host.add_reaction(10, 404, "👍").await, Err(LiveError::NotFound));
    }

    #[tokio::test]
    async fn failure_switches() {
        let host = seeded_host();
        host.set_failing(true);
        assert!(matches!(host.list_conversations(5).await, Err(LiveError::Failed(_))));
        host.set_failing(false);
        host.set_invalid(true);
        assert_eq!(host.user_info(42).await, Err(LiveError::SessionInvalid));
        host.set_invalid(false);
        assert_eq!(host.user_info(42).await.unwrap().name, "Grace");
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let host = seeded_host();
        let hits = host.search_messages("DEPLOY", None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        let scoped = host.search_messages("deploy", Some(20), 10).await.unwrap();
        assert!(scoped.is_empty());
    }
}

//! Ephemeral capture: persist self-destructing, view-once and vanishing
//! messages before the host purges them.
//!
//! The archive commit happens before `on_message_announced` returns, so the
//! returned [`CaptureAck`] is the commit point the host waits on. A failed
//! write is parked in a bounded queue. Each later notification handles its
//! own message first and then retries a small batch of parked records;
//! anything that falls out of the queue is audited as lost.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveStore, PutOutcome};
use crate::audit::{AuditKind, AuditLogger};
use crate::config::CaptureConfig;
use crate::error::ArchiveError;
use crate::host::{CaptureAck, LifecycleObserver};
use crate::types::{ArchiveRecord, ChatId, Message, MessageId, Provenance, Volatility};
use crate::util::now_ms;

/// Where captures are written. The archive store in production.
pub trait CaptureSink: Send + Sync {
    fn put(&self, record: &ArchiveRecord) -> Result<PutOutcome, ArchiveError>;
}

impl CaptureSink for ArchiveStore {
    fn put(&self, record: &ArchiveRecord) -> Result<PutOutcome, ArchiveError> {
        ArchiveStore::put(self, record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub enabled: bool,
    pub self_destructing: bool,
    pub view_once: bool,
    pub vanishing: bool,
}

impl CaptureSettings {
    fn qualifies(&self, volatility: Volatility) -> bool {
        self.enabled
            && match volatility {
                Volatility::Persistent => false,
                Volatility::SelfDestructing => self.self_destructing,
                Volatility::ViewOnce => self.view_once,
                Volatility::Vanishing => self.vanishing,
            }
    }
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(cfg: &CaptureConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            self_destructing: cfg.self_destructing,
            view_once: cfg.view_once,
            vanishing: cfg.vanishing,
        }
    }
}

/// Partial update for `configure_ephemeral_capture`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureUpdate {
    pub enabled: Option<bool>,
    pub self_destructing: Option<bool>,
    pub view_once: Option<bool>,
    pub vanishing: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub captured: u64,
    pub self_destructing: u64,
    pub view_once: u64,
    pub vanishing: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub lost: u64,
    pub purged: u64,
    pub pending: usize,
    pub tracked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Announced,
    Captured,
}

type Key = (ChatId, MessageId);

/// Parked records retried per notification.
const DRAIN_BATCH: usize = 8;

#[derive(Default)]
struct MonitorState {
    phases: HashMap<Key, Phase>,
    /// Insertion order of `phases`; may hold keys already removed.
    order: VecDeque<Key>,
    pending: VecDeque<ArchiveRecord>,
    stats: CaptureStats,
}

pub struct CaptureMonitor {
    sink: Arc<dyn CaptureSink>,
    audit: AuditLogger,
    settings: RwLock<CaptureSettings>,
    pending_capacity: usize,
    tracked_capacity: usize,
    state: Mutex<MonitorState>,
}

impl CaptureMonitor {
    pub fn new(sink: Arc<dyn CaptureSink>, audit: AuditLogger, config: &CaptureConfig) -> Self {
        Self {
            sink,
            audit,
            settings: RwLock::new(CaptureSettings::from(config)),
            pending_capacity: config.pending_capacity.max(1),
            tracked_capacity: config.tracked_capacity.max(config.pending_capacity).max(1),
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn settings(&self) -> CaptureSettings {
        match self.settings.read() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn configure(&self, update: &CaptureUpdate) -> CaptureSettings {
        let mut guard = match self.settings.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(v) = update.enabled {
            guard.enabled = v;
        }
        if let Some(v) = update.self_destructing {
            guard.self_destructing = v;
        }
        if let Some(v) = update.view_once {
            guard.view_once = v;
        }
        if let Some(v) = update.vanishing {
            guard.vanishing = v;
        }
        let settings = *guard;
        drop(guard);
        info!(
            target: "capture",
            enabled = settings.enabled,
            self_destructing = settings.self_destructing,
            view_once = settings.view_once,
            vanishing = settings.vanishing,
            "capture settings changed"
        );
        self.audit.system(format!(
            "capture settings: enabled={} self_destructing={} view_once={} vanishing={}",
            settings.enabled, settings.self_destructing, settings.view_once, settings.vanishing
        ));
        settings
    }

    pub fn stats(&self) -> CaptureStats {
        let state = self.lock_state();
        let mut stats = state.stats.clone();
        stats.pending = state.pending.len();
        stats.tracked = state.phases.len();
        stats
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn audit_capture(&self, message: &Message, outcome: CaptureAck, reason: Option<String>) {
        self.audit.record(AuditKind::Capture {
            chat_id: message.chat_id,
            message_id: message.message_id,
            volatility: message.volatility,
            outcome,
            reason,
        });
    }

    /// Record a phase, forgetting the oldest captured entries past capacity.
    /// Parked entries are never forgotten here; the pending bound covers them.
    fn track(&self, state: &mut MonitorState, key: Key, phase: Phase) {
        if state.phases.insert(key, phase).is_none() {
            state.order.push_back(key);
        }
        let mut budget = state.order.len();
        while state.phases.len() > self.tracked_capacity && budget > 0 {
            budget -= 1;
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            match state.phases.get(&oldest).copied() {
                Some(Phase::Captured) => {
                    state.phases.remove(&oldest);
                }
                Some(Phase::Announced) => state.order.push_back(oldest),
                None => {}
            }
        }
        if state.order.len() > self.tracked_capacity.saturating_mul(2) {
            let MonitorState { phases, order, .. } = state;
            order.retain(|k| phases.contains_key(k));
        }
    }

    fn note_captured(&self, state: &mut MonitorState, message: &Message, reason: Option<String>) {
        self.track(state, (message.chat_id, message.message_id), Phase::Captured);
        state.stats.captured += 1;
        match message.volatility {
            Volatility::SelfDestructing => state.stats.self_destructing += 1,
            Volatility::ViewOnce => state.stats.view_once += 1,
            Volatility::Vanishing => state.stats.vanishing += 1,
            Volatility::Persistent => {}
        }
        state.stats.last_capture_ms = Some(now_ms());
        self.audit_capture(message, CaptureAck::Captured, reason);
    }

    fn note_lost(&self, state: &mut MonitorState, message: &Message, reason: &str) {
        state.phases.remove(&(message.chat_id, message.message_id));
        state.stats.lost += 1;
        warn!(
            target: "capture",
            chat_id = message.chat_id,
            message_id = message.message_id,
            reason,
            "ephemeral message lost"
        );
        self.audit_capture(message, CaptureAck::Lost, Some(reason.to_string()));
    }

    /// Write one record and classify the result.
    fn write(
        &self,
        state: &mut MonitorState,
        record: &ArchiveRecord,
        reason: Option<String>,
    ) -> Result<CaptureAck, ArchiveError> {
        let Some(message) = record.as_message() else {
            return Ok(CaptureAck::Skipped);
        };
        match self.sink.put(record)? {
            PutOutcome::Duplicate => {
                self.track(state, (message.chat_id, message.message_id), Phase::Captured);
                state.stats.duplicates += 1;
                self.audit_capture(message, CaptureAck::Duplicate, reason);
                Ok(CaptureAck::Duplicate)
            }
            PutOutcome::Inserted | PutOutcome::Updated => {
                self.note_captured(state, message, reason);
                Ok(CaptureAck::Captured)
            }
        }
    }

    /// Retry up to `limit` parked records in order; stop at the first failure.
    fn drain_pending(&self, state: &mut MonitorState, limit: usize) {
        for _ in 0..limit {
            let Some(record) = state.pending.pop_front() else {
                break;
            };
            if let Err(e) = self.write(state, &record, Some("retried".into())) {
                debug!(target: "capture", error = %e, "pending capture still failing");
                state.pending.push_front(record);
                break;
            }
        }
    }

    fn park(&self, state: &mut MonitorState, record: ArchiveRecord, error: &ArchiveError) {
        if state.pending.len() >= self.pending_capacity {
            if let Some(oldest) = state.pending.pop_front() {
                if let Some(message) = oldest.as_message() {
                    self.note_lost(state, message, "pending_overflow");
                }
            }
        }
        if let Some(message) = record.as_message() {
            self.track(state, (message.chat_id, message.message_id), Phase::Announced);
            state.stats.deferred += 1;
            warn!(
                target: "capture",
                chat_id = message.chat_id,
                message_id = message.message_id,
                error = %error,
                "capture write failed, deferred"
            );
            self.audit_capture(message, CaptureAck::Deferred, Some(error.to_string()));
        }
        state.pending.push_back(record);
    }
}

impl LifecycleObserver for CaptureMonitor {
    fn on_message_announced(&self, message: &Message) -> CaptureAck {
        let settings = self.settings();
        let mut state = self.lock_state();

        if !settings.qualifies(message.volatility) {
            state.stats.skipped += 1;
            if message.volatility.is_volatile() {
                self.audit_capture(message, CaptureAck::Skipped, Some("capture disabled".into()));
            }
            self.drain_pending(&mut state, DRAIN_BATCH);
            return CaptureAck::Skipped;
        }

        let record = ArchiveRecord::message(message.clone(), Provenance::CapturedBeforeDestruction);
        match self.write(&mut state, &record, None) {
            Ok(ack) => {
                debug!(
                    target: "capture",
                    chat_id = message.chat_id,
                    message_id = message.message_id,
                    ?ack,
                    "announce handled"
                );
                self.drain_pending(&mut state, DRAIN_BATCH);
                ack
            }
            Err(e) => {
                self.park(&mut state, record, &e);
                CaptureAck::Deferred
            }
        }
    }

    fn on_message_about_to_purge(&self, chat_id: ChatId, message_id: MessageId) -> CaptureAck {
        let mut state = self.lock_state();

        let key = (chat_id, message_id);
        let ack = match state.phases.get(&key).copied() {
            None => {
                debug!(target: "capture", chat_id, message_id, "purge for untracked message");
                CaptureAck::Skipped
            }
            Some(Phase::Captured) => CaptureAck::Captured,
            Some(Phase::Announced) => {
                let position = state.pending.iter().position(|r| {
                    r.as_message()
                        .is_some_and(|m| m.chat_id == chat_id && m.message_id == message_id)
                });
                let parked = position.and_then(|i| state.pending.remove(i));
                match parked {
                    Some(record) => {
                        let retry = Some("retried_at_purge".to_string());
                        match self.write(&mut state, &record, retry) {
                            Ok(ack) => ack,
                            Err(e) => {
                                debug!(target: "capture", error = %e, "final capture attempt failed");
                                if let Some(message) = record.as_message() {
                                    self.note_lost(&mut state, message, "purged_before_capture");
                                }
                                CaptureAck::Lost
                            }
                        }
                    }
                    None => CaptureAck::Lost,
                }
            }
        };
        if state.phases.remove(&key).is_some() {
            state.stats.purged += 1;
        }
        self.drain_pending(&mut state, DRAIN_BATCH);
        ack
    }
}

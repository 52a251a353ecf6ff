//! Append-only audit trail.
//!
//! `record` hands the event to a channel and returns; a background thread
//! appends it to `audit-YYYY-MM-DD.jsonl`. A bounded ring of recent events is
//! kept in memory for the `get_audit_log` tool.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::host::CaptureAck;
use crate::types::{ChatId, MessageId, Origin, Volatility};
use crate::util::now_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditKind {
    ToolCall {
        tool: String,
        args_digest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<Origin>,
        ok: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Capture {
        chat_id: ChatId,
        message_id: MessageId,
        volatility: Volatility,
        outcome: CaptureAck,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionBound {
        generation: u64,
    },
    SessionUnbound {
        generation: u64,
    },
    System {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub ts_ms: i64,
    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn tool(&self) -> Option<&str> {
        match &self.kind {
            AuditKind::ToolCall { tool, .. } => Some(tool),
            _ => None,
        }
    }
}

struct AuditInner {
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    ring: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    seq: AtomicU64,
}

/// Cheap to clone; all clones feed the same writer.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditInner>,
}

impl AuditLogger {
    /// Start the writer thread for `dir` and warm the ring from recent files.
    pub fn start(dir: &Path, ring_capacity: usize) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let recent = load_recent(dir, ring_capacity);
        let next_seq = recent.last().map(|e| e.seq + 1).unwrap_or(0);

        let (tx, rx) = mpsc::channel::<AuditEvent>();
        let dir_owned = dir.to_path_buf();
        let writer = std::thread::Builder::new()
            .name("chatgate-audit".into())
            .spawn(move || writer_loop(&dir_owned, rx))?;

        Ok(Self::build(Some(tx), Some(writer), recent, ring_capacity, next_seq))
    }

    /// Ring only, nothing written to disk.
    pub fn in_memory(ring_capacity: usize) -> Self {
        Self::build(None, None, Vec::new(), ring_capacity, 0)
    }

    fn build(
        tx: Option<mpsc::Sender<AuditEvent>>,
        writer: Option<JoinHandle<()>>,
        recent: Vec<AuditEvent>,
        capacity: usize,
        next_seq: u64,
    ) -> Self {
        let capacity = capacity.max(1);
        let mut ring: VecDeque<AuditEvent> = recent.into_iter().collect();
        while ring.len() > capacity {
            ring.pop_front();
        }
        Self {
            inner: Arc::new(AuditInner {
                tx: Mutex::new(tx),
                writer: Mutex::new(writer),
                ring: Mutex::new(ring),
                capacity,
                seq: AtomicU64::new(next_seq),
            }),
        }
    }

    /// Fire-and-forget. Never blocks on I/O.
    pub fn record(&self, kind: AuditKind) {
        let event = AuditEvent {
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            ts_ms: now_ms(),
            kind,
        };
        if let Ok(mut ring) = self.inner.ring.lock() {
            if ring.len() == self.inner.capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        if let Ok(tx) = self.inner.tx.lock() {
            if let Some(tx) = tx.as_ref() {
                // Receiver only goes away at shutdown.
                let _ = tx.send(event);
            }
        }
    }

    pub fn system(&self, message: impl Into<String>) {
        self.record(AuditKind::System {
            message: message.into(),
        });
    }

    /// Most recent events, oldest first, optionally limited to one tool.
    pub fn recent(&self, limit: usize, tool: Option<&str>) -> Vec<AuditEvent> {
        let Ok(ring) = self.inner.ring.lock() else {
            return Vec::new();
        };
        let mut out: Vec<AuditEvent> = ring
            .iter()
            .rev()
            .filter(|e| tool.is_none_or(|t| e.tool() == Some(t)))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Close the channel and wait for pending lines to be written.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
        let handle = self.inner.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "audit", "audit writer thread panicked");
            }
        }
    }
}

fn audit_file(dir: &Path, ts_ms: i64) -> PathBuf {
    let date = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d");
    dir.join(format!("audit-{date}.jsonl"))
}

fn append_jsonl(dir: &Path, event: &AuditEvent) -> Result<(), Box<dyn std::error::Error>> {
    let path = audit_file(dir, event.ts_ms);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let json = serde_json::to_string(event)?;
    writeln!(file, "{json}")?;
    Ok(())
}

fn writer_loop(dir: &Path, rx: mpsc::Receiver<AuditEvent>) {
    for event in rx {
        if let Err(e) = append_jsonl(dir, &event) {
            warn!(target: "audit", error = %e, "audit append failed");
        }
    }
}

/// Newest `limit` events across the last week of files, oldest first.
pub(crate) fn load_recent(dir: &Path, limit: usize) -> Vec<AuditEvent> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("audit-") && n.ends_with(".jsonl"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort();
    let skip = files.len().saturating_sub(7);

    let mut collected: VecDeque<AuditEvent> = VecDeque::new();
    for path in files.iter().skip(skip) {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            let Ok(event) = serde_json::from_str::<AuditEvent>(&line) else {
                continue;
            };
            collected.push_back(event);
            if collected.len() > limit {
                collected.pop_front();
            }
        }
    }
    collected.into_iter().collect()
}

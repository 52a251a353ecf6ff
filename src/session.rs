//! Single-slot holder for the host's live source.
//!
//! The lock only guards an `Arc` clone or replacement; it is never held
//! across an await, so `current()` returns immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::audit::{AuditKind, AuditLogger};
use crate::host::LiveSource;

/// A published live source, tagged with the bind generation it belongs to.
#[derive(Clone)]
pub struct SessionHandle {
    pub generation: u64,
    pub source: Arc<dyn LiveSource>,
}

pub struct SessionBinder {
    slot: RwLock<Option<SessionHandle>>,
    generation: AtomicU64,
    audit: AuditLogger,
}

impl SessionBinder {
    pub fn new(audit: AuditLogger) -> Self {
        Self {
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            audit,
        }
    }

    /// Install `source`, replacing any earlier handle. Returns the new generation.
    pub fn publish(&self, source: Arc<dyn LiveSource>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = SessionHandle { generation, source };
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        info!(target: "session", generation, "live session published");
        self.audit.record(AuditKind::SessionBound { generation });
        generation
    }

    /// Drop the current handle, if any. Calls already holding it finish normally.
    pub fn unpublish(&self) {
        let previous = match self.slot.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = previous {
            info!(target: "session", generation = handle.generation, "live session ended");
            self.audit.record(AuditKind::SessionUnbound {
                generation: handle.generation,
            });
        }
    }

    pub fn current(&self) -> Option<SessionHandle> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.current().is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    #[test]
    fn absent_until_published() {
        let audit = AuditLogger::in_memory(10);
        let binder = SessionBinder::new(audit.clone());
        assert!(binder.current().is_none());

        let g1 = binder.publish(Arc::new(MemoryHost::new()));
        assert_eq!(binder.current().map(|h| h.generation), Some(g1));

        let g2 = binder.publish(Arc::new(MemoryHost::new()));
        assert!(g2 > g1);
        assert_eq!(binder.current().map(|h| h.generation), Some(g2));

        binder.unpublish();
        assert!(!binder.is_bound());
        binder.unpublish();

        let kinds: Vec<_> = audit.recent(10, None).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AuditKind::SessionBound { generation: 1 },
                AuditKind::SessionBound { generation: 2 },
                AuditKind::SessionUnbound { generation: 2 },
            ]
        );
    }

    #[test]
    fn held_handle_survives_unpublish() {
        let binder = SessionBinder::new(AuditLogger::in_memory(10));
        binder.publish(Arc::new(MemoryHost::new()));
        let held = binder.current();
        binder.unpublish();
        assert!(held.is_some());
        assert!(binder.current().is_none());
    }
}

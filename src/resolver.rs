//! Live-then-archive resolution.
//!
//! Each call takes its payload from exactly one source. Any live failure,
//! including a missing session, falls through to the archive; an archive
//! miss or failure becomes a structured "no data" result. Archive work runs
//! on the blocking pool, never on an async worker.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::archive::ArchiveStore;
use crate::error::{ArchiveError, LiveError, ToolError};
use crate::host::LiveSource;
use crate::tool_exec::ToolContext;
use crate::types::Origin;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Found { value: T, origin: Origin },
    NoData { reason: String },
}

impl<T> Resolved<T> {
    pub fn origin(&self) -> Origin {
        match self {
            Self::Found { origin, .. } => *origin,
            Self::NoData { .. } => Origin::Archive,
        }
    }
}

/// Try the live source, then the archive.
///
/// Skips the live path once if the previous call for this tool timed out.
pub async fn live_then_archive<T, L, Fut, A>(
    ctx: &ToolContext,
    tool: &str,
    live: L,
    archive: A,
) -> Resolved<T>
where
    L: FnOnce(Arc<dyn LiveSource>) -> Fut,
    Fut: Future<Output = Result<T, LiveError>>,
    A: FnOnce(&ArchiveStore) -> Result<Option<T>, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    if ctx.live_degraded.swap(false, Ordering::SeqCst) {
        debug!(target: "resolver", tool, "live path skipped after timeout");
    } else if let Some(handle) = ctx.services.session.current() {
        match live(handle.source).await {
            Ok(value) => {
                return Resolved::Found {
                    value,
                    origin: Origin::Live,
                };
            }
            Err(e) => {
                debug!(
                    target: "resolver",
                    tool,
                    generation = handle.generation,
                    error = %e,
                    "live path unavailable, using archive"
                );
            }
        }
    }
    from_archive(ctx, tool, archive).await
}

/// Run a synchronous archive call on the blocking pool.
pub async fn archive_blocking<T, F>(store: &Arc<ArchiveStore>, f: F) -> Result<T, ArchiveError>
where
    F: FnOnce(&ArchiveStore) -> Result<T, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

/// Archive-only resolution.
pub async fn from_archive<T, A>(ctx: &ToolContext, tool: &str, archive: A) -> Resolved<T>
where
    A: FnOnce(&ArchiveStore) -> Result<Option<T>, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    match archive_blocking(&ctx.services.archive, archive).await {
        Ok(Some(value)) => Resolved::Found {
            value,
            origin: Origin::Archive,
        },
        Ok(None) => Resolved::NoData {
            reason: "no matching data in archive".into(),
        },
        Err(e) => {
            warn!(target: "resolver", tool, error = %e, "archive read failed");
            Resolved::NoData {
                reason: format!("archive unavailable: {e}"),
            }
        }
    }
}

/// Live-only actions. No session, or any live failure, is a tool error.
pub async fn live_only<T, L, Fut>(ctx: &ToolContext, tool: &str, live: L) -> Result<T, ToolError>
where
    L: FnOnce(Arc<dyn LiveSource>) -> Fut,
    Fut: Future<Output = Result<T, LiveError>>,
{
    let Some(handle) = ctx.services.session.current() else {
        return Err(ToolError::Unavailable("live session unavailable".into()));
    };
    live(handle.source).await.map_err(|e| {
        debug!(target: "resolver", tool, error = %e, "live action failed");
        match e {
            LiveError::Unavailable | LiveError::SessionInvalid => {
                ToolError::Unavailable(format!("live session unavailable: {e}"))
            }
            other => ToolError::Unavailable(other.to_string()),
        }
    })
}

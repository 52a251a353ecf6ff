//! Tool-call gateway for a messaging client.
//!
//! An agent speaks JSON-RPC over stdio or a local socket; every data tool
//! answers from the host's live session when one is published and from the
//! archive otherwise. Self-destructing, view-once and vanishing messages are
//! written to the archive before the host is allowed to purge them.

pub mod archive;
pub mod audit;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod host;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tool_exec;
pub mod transport;
pub mod types;

mod prompts;
mod resources;
mod tool_args;
mod tool_defs;
mod util;

pub use archive::{ArchiveStats, ArchiveStore, ArchivedChat, PutOutcome};
pub use audit::{AuditEvent, AuditKind, AuditLogger};
pub use capture::{CaptureMonitor, CaptureStats};
pub use config::{load_config, save_config, Framing, GatewayConfig};
pub use dispatch::{Dispatcher, Reply};
pub use error::{GatewayError, LiveError, ToolError};
pub use gateway::Gateway;
pub use host::{CaptureAck, LifecycleObserver, LiveSource, MemoryHost, MessageQuery};
pub use registry::{tool_handler, ToolRegistry};
pub use session::{SessionBinder, SessionHandle};
pub use tool_exec::{ToolContext, ToolExecution};
pub use types::{ArchiveRecord, Conversation, Message, Origin, Provenance, Volatility};

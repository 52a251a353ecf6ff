//! Startup and transport wiring for an embedding host.
//!
//! [`Gateway`] builds the tool catalogue, opens the archive, starts the audit
//! writer, and serves stdio and the local socket until the peer or the host
//! asks it to stop.

use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::ArchiveStore;
use crate::audit::AuditLogger;
use crate::capture::CaptureMonitor;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, RegistryError};
use crate::host::{LifecycleObserver, LiveSource};
use crate::registry::{RegistryBuilder, ToolRegistry};
use crate::session::SessionBinder;
use crate::tool_exec::{register_builtin, Services};
use crate::transport::{serve_stdio, IpcServer};

/// Everything a host embeds: one dispatcher shared by both transports, the
/// session slot the host publishes into, and the capture observer it notifies.
pub struct Gateway {
    config: GatewayConfig,
    services: Arc<Services>,
    dispatcher: Arc<Dispatcher>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_tools(config, Ok)
    }

    /// Like `new`, with a hook to register extra tools before the catalogue
    /// is frozen. A duplicate name fails here, at startup.
    pub fn with_tools<F>(config: GatewayConfig, extra: F) -> Result<Self, GatewayError>
    where
        F: FnOnce(RegistryBuilder) -> Result<RegistryBuilder, RegistryError>,
    {
        // Steps that can fail come before the audit writer thread exists.
        let registry = extra(register_builtin(ToolRegistry::builder())?)?.build()?;
        let archive = Arc::new(ArchiveStore::open_or_create(
            &config.archive_path,
            config.durable_writes,
        )?);
        let audit = AuditLogger::start(&config.audit_dir(), config.audit_ring_capacity)?;
        let capture = Arc::new(CaptureMonitor::new(
            archive.clone(),
            audit.clone(),
            &config.capture,
        ));
        let session = Arc::new(SessionBinder::new(audit.clone()));
        info!(
            target: "gateway",
            tools = registry.len(),
            archive = %config.archive_path.display(),
            "gateway ready"
        );

        let services = Arc::new(Services::new(session, archive, capture, audit));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            services.clone(),
            config.tool_timeout(),
        ));
        services.audit.system("gateway started");
        Ok(Self {
            config,
            services,
            dispatcher,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Host side: the live session is ready (or was replaced).
    pub fn publish(&self, source: Arc<dyn LiveSource>) -> u64 {
        self.services.session.publish(source)
    }

    /// Host side: the live session ended.
    pub fn unpublish(&self) {
        self.services.session.unpublish();
    }

    /// The object the host delivers message lifecycle notifications to.
    pub fn observer(&self) -> Arc<dyn LifecycleObserver> {
        self.services.capture.clone()
    }

    /// Stops the IPC listener and the stdio loop. A peer's `shutdown`
    /// request has the same effect once its answer is written.
    pub fn shutdown(&self) {
        self.dispatcher.request_stop();
    }

    /// Serve the configured transports. Returns when stdin closes (if stdio
    /// is on) or when `shutdown` is called.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let mut ipc_task = None;
        if self.config.ipc {
            match IpcServer::bind(
                &self.config.ipc_socket(),
                self.config.ipc_framing,
                self.config.max_frame_bytes,
            ) {
                Ok(server) => {
                    info!(target: "gateway", socket = %server.path().display(), "ipc enabled");
                    ipc_task = Some(tokio::spawn(
                        server.run(self.dispatcher.clone(), self.dispatcher.subscribe_shutdown()),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Unsupported => {
                    warn!(target: "gateway", error = %e, "ipc disabled");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.config.stdio {
            serve_stdio(
                self.dispatcher.clone(),
                self.config.max_frame_bytes,
                self.dispatcher.subscribe_shutdown(),
            )
            .await?;
            info!(target: "gateway", "stdio closed");
            self.shutdown();
        } else if ipc_task.is_some() {
            let mut stop = self.dispatcher.subscribe_shutdown();
            let _ = stop.recv().await;
        } else {
            warn!(target: "gateway", "no transport enabled");
        }

        if let Some(task) = ipc_task {
            match task.await {
                Ok(result) => result?,
                Err(e) => warn!(target: "gateway", error = %e, "ipc task failed"),
            }
        }
        Ok(())
    }

    /// Flush the audit trail. Call once, after `run` returns.
    pub fn close(&self) {
        self.services.audit.system("gateway stopped");
        self.services.audit.shutdown();
    }
}

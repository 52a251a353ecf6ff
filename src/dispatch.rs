//! JSON-RPC 2.0 request dispatcher shared by every transport.
//!
//! One frame in, at most one response out. No state survives between frames
//! apart from the registry and the services the dispatcher was built with.
//!
//! A `shutdown` request is answered first; the transport that wrote the answer
//! then fires the stop signal every accept loop listens on.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audit::AuditKind;
use crate::error::{
    ResourceError, ToolError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use crate::prompts::{get_prompt, prompt_catalogue};
use crate::registry::{normalize_args, ToolRegistry};
use crate::resources::{read_resource, resource_catalogue};
use crate::tool_exec::{Services, ToolContext, ToolExecution};
use crate::types::Origin;
use crate::util::args_digest;

pub(crate) const SERVER_NAME: &str = "chatgate";
pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";

pub(crate) fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

/// What one frame produced: the response to write, if any, and whether the
/// peer asked the gateway to stop once that response is out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub response: Option<Value>,
    pub stop: bool,
}

impl Reply {
    fn respond(response: Value) -> Self {
        Self {
            response: Some(response),
            stop: false,
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    services: Arc<Services>,
    tool_timeout: Duration,
    stop: broadcast::Sender<()>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, services: Arc<Services>, tool_timeout: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        let names = registry.names().map(str::to_string).collect();
        if services.tool_names.set(names).is_err() {
            debug!(target: "dispatch", "tool catalogue already recorded");
        }
        Self {
            registry,
            services,
            tool_timeout,
            stop,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Fires once a `shutdown` answer has been written, or on [`Self::request_stop`].
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.stop.subscribe()
    }

    pub fn request_stop(&self) {
        // No receivers just means nothing is serving yet.
        let _ = self.stop.send(());
    }

    /// Decode and handle one raw frame. `None` means nothing goes back.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<Value> {
        self.reply_to_frame(frame).await.response
    }

    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        self.reply_to_message(message).await.response
    }

    pub async fn reply_to_frame(&self, frame: &[u8]) -> Reply {
        match serde_json::from_slice::<Value>(frame) {
            Ok(message) => self.reply_to_message(message).await,
            Err(e) => {
                warn!(target: "dispatch", error = %e, "unparseable frame");
                Reply::respond(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                ))
            }
        }
    }

    pub async fn reply_to_message(&self, message: Value) -> Reply {
        let obj = match &message {
            Value::Object(obj) => obj,
            Value::Array(_) => {
                return Reply::respond(error_response(
                    Value::Null,
                    INVALID_REQUEST,
                    "batch requests are not supported",
                ));
            }
            _ => {
                return Reply::respond(error_response(
                    Value::Null,
                    INVALID_REQUEST,
                    "request must be a JSON object",
                ));
            }
        };

        // A request without an id is a notification: handled, never answered.
        let notification = !obj.contains_key("id");
        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        if !(id.is_null() || id.is_string() || id.is_number()) {
            return Reply::respond(error_response(Value::Null, INVALID_REQUEST, "invalid id"));
        }
        let reply = |response: Value| Reply {
            response: (!notification).then_some(response),
            stop: false,
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return reply(error_response(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }
        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            if notification {
                debug!(target: "dispatch", "dropping notification without method");
            }
            return reply(error_response(id, INVALID_REQUEST, "missing method"));
        };
        let params = obj.get("params").cloned().unwrap_or_else(|| json!({}));

        let response = match method {
            "initialize" => {
                let protocol = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION);
                success_response(
                    id,
                    json!({
                        "protocolVersion": protocol,
                        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                        "serverInfo": {
                            "name": SERVER_NAME,
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    }),
                )
            }
            "ping" => success_response(id, json!({})),
            "shutdown" => {
                info!(target: "dispatch", "shutdown requested by peer");
                let mut out = reply(success_response(id, Value::Null));
                out.stop = true;
                return out;
            }
            "tools/list" => success_response(id, json!({ "tools": self.registry.catalogue() })),
            "tools/call" => self.call_tool(id, &params).await,
            "resources/list" => success_response(id, json!({ "resources": resource_catalogue() })),
            "resources/read" => self.read_resource(id, &params).await,
            "prompts/list" => success_response(id, json!({ "prompts": prompt_catalogue() })),
            "prompts/get" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return reply(error_response(id, INVALID_PARAMS, "prompts/get requires a name"));
                };
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                match get_prompt(name, &arguments) {
                    Ok(result) => success_response(id, result),
                    Err(e) => error_response(id, INVALID_PARAMS, e.to_string()),
                }
            }
            m if m.starts_with("notifications/") => {
                debug!(target: "dispatch", method = m, "notification");
                return Reply::silent();
            }
            other => error_response(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
        };
        reply(response)
    }

    async fn read_resource(&self, id: Value, params: &Value) -> Value {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return error_response(id, INVALID_PARAMS, "resources/read requires a uri");
        };
        match read_resource(&self.services, uri).await {
            Ok(result) => success_response(id, result),
            Err(e @ ResourceError::Unknown(_)) => error_response(id, INVALID_PARAMS, e.to_string()),
            Err(e @ ResourceError::Archive(_)) => {
                error!(target: "dispatch", uri, error = %e, "resource read failed");
                error_response(id, INTERNAL_ERROR, e.to_string())
            }
        }
    }

    async fn call_tool(&self, id: Value, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(id, INVALID_PARAMS, "tools/call requires a tool name");
        };
        let args = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(v) => v.clone(),
        };
        let digest = args_digest(&args);
        let Some(entry) = self.registry.get(name).cloned() else {
            debug!(target: "dispatch", tool = name, "unknown tool");
            self.audit_call(name, digest, None, Some("unknown_tool".into()), Duration::ZERO);
            return error_response(id, METHOD_NOT_FOUND, format!("unknown tool: {name}"));
        };
        let args = normalize_args(args);

        if let Err(msg) = entry.validate(&args) {
            self.audit_call(name, digest, None, Some(msg.clone()), Duration::ZERO);
            return error_response(id, INVALID_PARAMS, format!("bad arguments: {msg}"));
        }

        let started = Instant::now();
        let ctx = ToolContext::new(self.services.clone(), entry.live_degraded.clone());
        // Own task per call: a panicking handler cannot take the connection down.
        let task = tokio::spawn((entry.handler)(ctx, args));

        let execution = match tokio::time::timeout(self.tool_timeout, task).await {
            Ok(Ok(Ok(execution))) => execution,
            Ok(Ok(Err(ToolError::BadArguments(msg)))) => {
                self.audit_call(name, digest, None, Some(msg.clone()), started.elapsed());
                return error_response(id, INVALID_PARAMS, format!("bad arguments: {msg}"));
            }
            Ok(Ok(Err(e))) => ToolExecution::error(e.to_string()),
            Ok(Err(join)) => {
                error!(target: "dispatch", tool = name, error = %join, "tool task failed");
                let what = if join.is_panic() { "panicked" } else { "was cancelled" };
                ToolExecution::error(format!("tool {name} {what}"))
            }
            Err(_) => {
                // Left running; its result is discarded. The next call skips the live path.
                entry.live_degraded.store(true, Ordering::SeqCst);
                warn!(
                    target: "dispatch",
                    tool = name,
                    timeout_ms = self.tool_timeout.as_millis() as u64,
                    "tool timed out"
                );
                ToolExecution::error(format!(
                    "tool {name} timed out after {} ms",
                    self.tool_timeout.as_millis()
                ))
            }
        };

        let error = execution.is_error.then(|| execution.output.clone());
        self.audit_call(name, digest, execution.origin, error, started.elapsed());
        success_response(id, execution.to_result_json())
    }

    fn audit_call(
        &self,
        tool: &str,
        args_digest: String,
        origin: Option<Origin>,
        error: Option<String>,
        elapsed: Duration,
    ) {
        self.services.audit.record(AuditKind::ToolCall {
            tool: tool.to_string(),
            args_digest,
            origin,
            ok: error.is_none(),
            duration_ms: elapsed.as_millis() as u64,
            error,
        });
    }
}

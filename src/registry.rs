//! Static tool catalogue: name → (description, input schema, handler).
//!
//! Built once at startup through [`RegistryBuilder`] and read-only afterwards.
//! Arguments are checked against the declared schema before a handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};

use crate::error::{RegistryError, ToolError};
use crate::tool_exec::{ToolContext, ToolExecution};

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolExecution, ToolError>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;

/// Wrap an async fn as a registry handler.
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolExecution, ToolError>> + Send + 'static,
{
    Arc::new(move |ctx: ToolContext, args: Value| -> ToolFuture { Box::pin(f(ctx, args)) })
}

pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub(crate) handler: ToolHandler,
    validator: Arc<JSONSchema>,
    /// Set when a call timed out; the next call for this tool skips the live path.
    pub(crate) live_degraded: Arc<AtomicBool>,
}

impl ToolEntry {
    /// First schema violation, rendered for the -32602 message.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        self.validator.validate(args).map_err(|mut errors| {
            errors
                .next()
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .unwrap_or_else(|| "arguments do not match the input schema".into())
        })
    }

    fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

pub struct ToolRegistry {
    entries: Vec<Arc<ToolEntry>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolEntry>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// `tools/list` payload, in registration order.
    pub fn catalogue(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.descriptor()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    pending: Vec<(String, String, Value, ToolHandler)>,
}

impl RegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Self {
        self.pending
            .push((name.into(), description.into(), input_schema, handler));
        self
    }

    /// Register from a `{name, description, inputSchema}` descriptor.
    pub fn register_def(self, def: &Value, handler: ToolHandler) -> Result<Self, RegistryError> {
        let name = def
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RegistryError::InvalidSchema("<unnamed>".into(), "missing name".into()))?;
        let description = def.get("description").and_then(Value::as_str).unwrap_or_default();
        let schema = def
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
        Ok(self.register(name, description, schema, handler))
    }

    /// Fails on a duplicate name or a malformed schema.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut entries = Vec::with_capacity(self.pending.len());
        let mut index = HashMap::new();
        for (name, description, input_schema, handler) in self.pending {
            if index.contains_key(&name) {
                return Err(RegistryError::Duplicate(name));
            }
            let validator = compile_schema(&input_schema)
                .map_err(|e| RegistryError::InvalidSchema(name.clone(), e))?;
            index.insert(name.clone(), entries.len());
            entries.push(Arc::new(ToolEntry {
                name,
                description,
                input_schema,
                validator: Arc::new(validator),
                handler,
                live_degraded: Arc::new(AtomicBool::new(false)),
            }));
        }
        Ok(ToolRegistry { entries, index })
    }
}

// ── Schema checking ──────────────────────────────────────────────────────

fn compile_schema(schema: &Value) -> Result<JSONSchema, String> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err("top-level type must be \"object\"".into());
    }
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|err| err.to_string())
}

/// Explicit null on a top-level field means "not given", and integer-valued
/// floats become integers so typed argument structs accept them.
pub(crate) fn normalize_args(args: Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop_tool(_ctx: ToolContext, _args: Value) -> Result<ToolExecution, ToolError> {
        Ok(ToolExecution::text("ok"))
    }

    fn noop() -> ToolHandler {
        tool_handler(noop_tool)
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "chat_id": { "type": "integer" },
                "limit": { "type": "integer", "minimum": 1 },
                "before": { "type": ["string", "integer"] },
                "volatility": { "type": "string", "enum": ["self_destructing", "view_once"] }
            },
            "required": ["chat_id"]
        })
    }

    #[test]
    fn duplicate_names_fail_the_build() {
        let result = ToolRegistry::builder()
            .register("a", "first", schema(), noop())
            .register("b", "second", schema(), noop())
            .register("a", "again", schema(), noop())
            .build();
        assert_eq!(result.err(), Some(RegistryError::Duplicate("a".into())));
    }

    #[test]
    fn malformed_schema_fails_the_build() {
        let bad = json!({"type": "object", "properties": {"x": {"type": "integr"}}});
        let result = ToolRegistry::builder().register("x", "", bad, noop()).build();
        assert!(matches!(result.err(), Some(RegistryError::InvalidSchema(name, _)) if name == "x"));

        let not_object = json!({"type": "array"});
        let result = ToolRegistry::builder().register("y", "", not_object, noop()).build();
        assert!(matches!(result.err(), Some(RegistryError::InvalidSchema(name, _)) if name == "y"));
    }

    #[test]
    fn catalogue_is_stable_and_ordered() {
        let registry = ToolRegistry::builder()
            .register("zeta", "z", schema(), noop())
            .register("alpha", "a", schema(), noop())
            .build()
            .unwrap();
        let first = registry.catalogue();
        assert_eq!(first, registry.catalogue());
        assert_eq!(first[0]["name"], "zeta");
        assert_eq!(first[1]["inputSchema"]["required"][0], "chat_id");
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    fn entry(schema: Value) -> Arc<ToolEntry> {
        let registry = ToolRegistry::builder().register("t", "", schema, noop()).build().unwrap();
        registry.get("t").unwrap().clone()
    }

    #[test]
    fn validation_rules() {
        let e = entry(schema());
        assert!(e.validate(&json!({"chat_id": 1})).is_ok());
        assert!(e.validate(&json!({"chat_id": 1, "before": "2024-01-01"})).is_ok());
        assert!(e.validate(&json!({"chat_id": 1, "before": 17})).is_ok());
        assert!(e.validate(&normalize_args(json!({"chat_id": 1, "limit": null}))).is_ok());
        assert!(e.validate(&json!({"chat_id": 1, "extra": true})).is_ok());

        assert!(e.validate(&json!({})).unwrap_err().contains("chat_id"));
        assert!(e.validate(&json!({"chat_id": "1"})).unwrap_err().contains("integer"));
        assert!(e.validate(&json!({"chat_id": 1.5})).is_err());
        assert!(e.validate(&json!({"chat_id": 1, "limit": 0})).is_err());
        assert!(e.validate(&json!({"chat_id": 1, "volatility": "forever"})).is_err());
        assert!(e.validate(&json!([1, 2])).is_err());

        let closed = entry(json!({"type": "object", "properties": {}, "additionalProperties": false}));
        assert!(closed.validate(&json!({"x": 1})).is_err());
    }

    #[test]
    fn nested_and_bounded_keywords_are_enforced() {
        let e = entry(json!({
            "type": "object",
            "properties": {
                "ids": { "type": "array", "items": { "type": "integer" }, "maxItems": 2 },
                "name": { "type": "string", "maxLength": 3 },
                "limit": { "type": "integer", "maximum": 10 },
                "opt": {
                    "type": "object",
                    "properties": { "x": { "type": "integer" } },
                    "required": ["x"]
                }
            }
        }));
        assert!(e.validate(&json!({"ids": ["a", "b", "c"]})).is_err());
        assert!(e.validate(&json!({"ids": [1, 2, 3]})).is_err());
        assert!(e.validate(&json!({"name": "way too long"})).is_err());
        assert!(e.validate(&json!({"limit": 1000000})).is_err());
        assert!(e.validate(&json!({"opt": {}})).is_err());

        assert!(e.validate(&json!({"limit": 5.0})).is_ok());
        assert!(e.validate(&json!({"ids": [1, 2], "name": "abc", "opt": {"x": 1}})).is_ok());
    }

    #[test]
    fn normalized_args_drop_nulls_and_integral_floats() {
        let args = normalize_args(json!({"limit": 5.0, "ratio": 0.5, "skip": null, "ids": [2.0]}));
        assert_eq!(args, json!({"limit": 5, "ratio": 0.5, "ids": [2]}));
        assert!(args["limit"].is_i64());
    }
}

use serde_json::{json, Value};

pub(crate) const MAX_LIMIT: usize = 500;

pub(crate) fn tool_definitions_json() -> Vec<Value> {
    vec![
        // ── Data tools: live first, archive fallback ──
        json!({
            "name": "list_conversations",
            "description": "List conversations by most recent activity. Falls back to the archive when the live session is unavailable.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }
        }),
        json!({
            "name": "get_conversation",
            "description": "Details for one conversation: name, kind, member count, last activity.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" }
                },
                "required": ["chat_id"]
            }
        }),
        json!({
            "name": "read_messages",
            "description": "Read messages from a conversation, newest first. before/after take unix seconds or YYYY-MM-DD.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "limit": { "type": "integer", "minimum": 1 },
                    "before": { "type": ["integer", "string"] },
                    "after": { "type": ["integer", "string"] }
                },
                "required": ["chat_id"]
            }
        }),
        json!({
            "name": "search_messages",
            "description": "Search message text, optionally within one conversation.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "chat_id": { "type": "integer" },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "get_user_info",
            "description": "Profile for a user. The archive answer is derived from messages they sent.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "user_id": { "type": "integer" }
                },
                "required": ["user_id"]
            }
        }),
        // ── Live-only actions ──
        json!({
            "name": "send_message",
            "description": "Send a text message. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "text": { "type": "string" },
                    "reply_to": { "type": "integer" }
                },
                "required": ["chat_id", "text"]
            }
        }),
        json!({
            "name": "edit_message",
            "description": "Replace the text of a message. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" },
                    "text": { "type": "string" }
                },
                "required": ["chat_id", "message_id", "text"]
            }
        }),
        json!({
            "name": "delete_message",
            "description": "Delete a message. Requires a live session. Archived copies are kept.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" }
                },
                "required": ["chat_id", "message_id"]
            }
        }),
        json!({
            "name": "forward_message",
            "description": "Forward a message to another conversation. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "from_chat_id": { "type": "integer" },
                    "to_chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" }
                },
                "required": ["from_chat_id", "to_chat_id", "message_id"]
            }
        }),
        json!({
            "name": "pin_message",
            "description": "Pin a message in its conversation. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" },
                    "notify": { "type": "boolean", "default": false }
                },
                "required": ["chat_id", "message_id"]
            }
        }),
        json!({
            "name": "unpin_message",
            "description": "Unpin a pinned message. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" }
                },
                "required": ["chat_id", "message_id"]
            }
        }),
        json!({
            "name": "add_reaction",
            "description": "React to a message with an emoji. Requires a live session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "message_id": { "type": "integer" },
                    "emoji": { "type": "string", "minLength": 1 }
                },
                "required": ["chat_id", "message_id", "emoji"]
            }
        }),
        // ── Archive tools ──
        json!({
            "name": "get_ephemeral_messages",
            "description": "Captured self-destructing, view-once and vanishing messages.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "volatility": {
                        "type": "string",
                        "enum": ["self_destructing", "view_once", "vanishing"]
                    },
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }
        }),
        json!({
            "name": "search_archive",
            "description": "Full-text search over archived messages, ranked by relevance.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "chat_id": { "type": "integer" },
                    "since": { "type": ["integer", "string"] },
                    "until": { "type": ["integer", "string"] },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "get_archive_stats",
            "description": "Counts and time range of archived data.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "archive_chat",
            "description": "Snapshot recent live messages of a conversation into the archive.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["chat_id"]
            }
        }),
        json!({
            "name": "list_archived_chats",
            "description": "Conversations held in the archive, with message counts.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }
        }),
        json!({
            "name": "export_chat",
            "description": "Export archived messages of a conversation, oldest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "chat_id": { "type": "integer" },
                    "format": { "type": "string", "enum": ["json", "jsonl", "markdown"] },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["chat_id", "format"]
            }
        }),
        // ── Gateway tools ──
        json!({
            "name": "configure_ephemeral_capture",
            "description": "Enable or disable capture of self-destructing, view-once and vanishing messages.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "enabled": { "type": "boolean" },
                    "self_destructing": { "type": "boolean" },
                    "view_once": { "type": "boolean" },
                    "vanishing": { "type": "boolean" }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "get_ephemeral_stats",
            "description": "Capture counters and current capture settings.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_audit_log",
            "description": "Recent audit events, optionally for one tool.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 },
                    "tool": { "type": "string" }
                }
            }
        }),
        json!({
            "name": "health_check",
            "description": "Session binding, archive reachability and capture backlog.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_server_info",
            "description": "Gateway name, version, protocol and catalogue sizes.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

pub(crate) fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_schemas_are_objects() {
        let defs = tool_definitions_json();
        let mut seen = HashSet::new();
        for def in &defs {
            let name = def["name"].as_str().unwrap();
            assert!(seen.insert(name.to_string()), "duplicate {name}");
            assert_eq!(def["inputSchema"]["type"], "object");
            assert!(!def["description"].as_str().unwrap().is_empty());
        }
        assert_eq!(defs.len(), 23);
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 50), 50);
        assert_eq!(clamp_limit(Some(0), 50), 1);
        assert_eq!(clamp_limit(Some(10_000), 50), MAX_LIMIT);
    }
}

//! MCP prompt templates for conversation analysis.

use serde_json::{json, Value};

use crate::error::PromptError;

const DEFAULT_SUMMARY_LIMIT: i64 = 50;

pub(crate) fn prompt_catalogue() -> Vec<Value> {
    vec![
        json!({
            "name": "summarize_chat",
            "description": "Summarize recent messages of a conversation",
            "arguments": [
                { "name": "chat_id", "description": "Conversation to summarize", "required": true },
                { "name": "limit", "description": "Number of messages to cover (default 50)", "required": false }
            ]
        }),
        json!({
            "name": "analyze_trends",
            "description": "Describe how activity in a conversation changes over time",
            "arguments": [
                { "name": "chat_id", "description": "Conversation to analyze", "required": true }
            ]
        }),
    ]
}

/// Prompt arguments arrive as strings per MCP; numbers are accepted too.
fn int_arg(prompt: &str, args: &Value, name: &str) -> Result<Option<i64>, PromptError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| PromptError::InvalidArgument(name.into())),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PromptError::InvalidArgument(name.into())),
        Some(_) => Err(PromptError::InvalidArgument(format!("{name} (in {prompt})"))),
    }
}

fn required_int(prompt: &str, args: &Value, name: &str) -> Result<i64, PromptError> {
    int_arg(prompt, args, name)?.ok_or_else(|| PromptError::MissingArgument {
        prompt: prompt.into(),
        argument: name.into(),
    })
}

/// `prompts/get` result body.
pub(crate) fn get_prompt(name: &str, args: &Value) -> Result<Value, PromptError> {
    let (description, text) = match name {
        "summarize_chat" => {
            let chat_id = required_int(name, args, "chat_id")?;
            let limit = int_arg(name, args, "limit")?.unwrap_or(DEFAULT_SUMMARY_LIMIT);
            (
                format!("Summary of chat {chat_id}"),
                format!(
                    "Read the last {limit} messages of chat {chat_id} (use read_messages) and \
                     summarize them. Cover the main topics, who took part, decisions made, \
                     open action items and the overall tone."
                ),
            )
        }
        "analyze_trends" => {
            let chat_id = required_int(name, args, "chat_id")?;
            (
                format!("Activity trends for chat {chat_id}"),
                format!(
                    "Look at activity in chat {chat_id} over time. Report message frequency, \
                     who participates and how often, the busiest hours, and whether the chat \
                     is getting more or less active."
                ),
            )
        }
        other => return Err(PromptError::Unknown(other.into())),
    };
    Ok(json!({
        "description": description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text }
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_takes_string_or_number_ids() {
        let a = get_prompt("summarize_chat", &json!({"chat_id": "10", "limit": "5"})).unwrap();
        let text = a["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("last 5 messages of chat 10"));
        assert_eq!(a["messages"][0]["role"], "user");

        let b = get_prompt("summarize_chat", &json!({"chat_id": 10})).unwrap();
        assert!(b["messages"][0]["content"]["text"].as_str().unwrap().contains("last 50"));
    }

    #[test]
    fn missing_and_bad_arguments() {
        assert_eq!(
            get_prompt("analyze_trends", &json!({})),
            Err(PromptError::MissingArgument {
                prompt: "analyze_trends".into(),
                argument: "chat_id".into()
            })
        );
        assert!(matches!(
            get_prompt("summarize_chat", &json!({"chat_id": "ten"})),
            Err(PromptError::InvalidArgument(_))
        ));
        assert_eq!(
            get_prompt("write_poem", &json!({})),
            Err(PromptError::Unknown("write_poem".into()))
        );
    }

    #[test]
    fn catalogue_names_match_handlers() {
        for prompt in prompt_catalogue() {
            let name = prompt["name"].as_str().unwrap();
            assert!(get_prompt(name, &json!({"chat_id": 1})).is_ok(), "{name}");
        }
    }
}

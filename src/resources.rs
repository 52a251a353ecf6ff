//! Read-only MCP resources. Every resource is served from the archive, so a
//! read answers the same with or without a live session.

use serde_json::{json, Value};

use crate::archive::MessageFilter;
use crate::error::ResourceError;
use crate::resolver::archive_blocking;
use crate::tool_exec::Services;
use crate::types::ChatId;

pub(crate) const CHATS_URI: &str = "chatgate://chats";
pub(crate) const ARCHIVE_STATS_URI: &str = "chatgate://archive/stats";
const MESSAGES_PREFIX: &str = "chatgate://messages/";
const CHATS_LIMIT: usize = 100;
const MESSAGES_LIMIT: usize = 50;

pub(crate) fn resource_catalogue() -> Vec<Value> {
    vec![
        json!({
            "uri": CHATS_URI,
            "name": "Archived chats",
            "description": "Archived conversations with message counts",
            "mimeType": "application/json"
        }),
        json!({
            "uri": format!("{MESSAGES_PREFIX}{{chat_id}}"),
            "name": "Chat messages",
            "description": "The 50 most recent archived messages of one conversation",
            "mimeType": "application/json"
        }),
        json!({
            "uri": ARCHIVE_STATS_URI,
            "name": "Archive statistics",
            "description": "Counts and time range of archived data",
            "mimeType": "application/json"
        }),
    ]
}

enum Target {
    Chats,
    Messages(ChatId),
    Stats,
}

fn parse_uri(uri: &str) -> Result<Target, ResourceError> {
    match uri {
        CHATS_URI => Ok(Target::Chats),
        ARCHIVE_STATS_URI => Ok(Target::Stats),
        _ => uri
            .strip_prefix(MESSAGES_PREFIX)
            .and_then(|id| id.parse::<ChatId>().ok())
            .map(Target::Messages)
            .ok_or_else(|| ResourceError::Unknown(uri.to_string())),
    }
}

/// `resources/read` result body.
pub(crate) async fn read_resource(services: &Services, uri: &str) -> Result<Value, ResourceError> {
    let target = parse_uri(uri)?;
    let payload = archive_blocking(&services.archive, move |store| {
        let value = match target {
            Target::Chats => serde_json::to_value(store.archived_chats(CHATS_LIMIT)?)?,
            Target::Messages(chat_id) => {
                let filter = MessageFilter {
                    limit: MESSAGES_LIMIT,
                    ..MessageFilter::default()
                };
                serde_json::to_value(store.get(chat_id, &filter)?)?
            }
            Target::Stats => serde_json::to_value(store.stats()?)?,
        };
        Ok(value)
    })
    .await?;
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": payload.to_string(),
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::sample_message;
    use crate::tool_exec::tests::test_services;
    use crate::types::{ArchiveRecord, Provenance};

    #[tokio::test]
    async fn reads_chats_messages_and_stats() {
        let (services, _archive) = test_services("resources");
        for id in 1..=3 {
            services
                .archive
                .put(&ArchiveRecord::message(sample_message(10, id, "hi"), Provenance::Snapshot))
                .unwrap();
        }

        let chats = read_resource(&services, CHATS_URI).await.unwrap();
        assert_eq!(chats["contents"][0]["uri"], CHATS_URI);
        let text: Value = serde_json::from_str(chats["contents"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text[0]["id"], 10);
        assert_eq!(text[0]["message_count"], 3);

        let messages = read_resource(&services, "chatgate://messages/10").await.unwrap();
        let text: Value =
            serde_json::from_str(messages["contents"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text.as_array().unwrap().len(), 3);
        assert_eq!(text[0]["message_id"], 3);

        let stats = read_resource(&services, ARCHIVE_STATS_URI).await.unwrap();
        assert_eq!(stats["contents"][0]["mimeType"], "application/json");
    }

    #[tokio::test]
    async fn unknown_uris_are_rejected() {
        let (services, _archive) = test_services("resources_unknown");
        for uri in ["chatgate://nothing", "chatgate://messages/abc", "file:///etc/passwd"] {
            assert!(matches!(
                read_resource(&services, uri).await,
                Err(ResourceError::Unknown(_))
            ));
        }
    }

    #[test]
    fn catalogue_lists_every_target() {
        let uris: Vec<String> = resource_catalogue()
            .iter()
            .map(|r| r["uri"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(uris.len(), 3);
        assert!(uris.contains(&"chatgate://messages/{chat_id}".to_string()));
    }
}

//! Data model shared across the roster pipeline: the exported chat document
//! shape, the pre-enrichment participant reference, and the enriched user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to parse chat export: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Root object of an exported chat-history document.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatDocument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One message inside an export. Regular messages carry the author pair
/// (`from`, `from_id`); service messages carry the actor pair instead.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub from_id: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub actor_id: String,
    /// Either a plain string or an array of rich-text fragments; opaque here.
    #[serde(default)]
    pub text: serde_json::Value,
    #[serde(default)]
    pub text_entities: Vec<TextEntity>,
}

impl Message {
    pub fn is_service(&self) -> bool {
        self.kind == "service"
    }
}

/// A rich fragment of message text (mention, link, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct TextEntity {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// A pre-enrichment reference to a potential user. At least one of `user_id`
/// or `username` is set, or the record is an identifier-less name carried
/// through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParticipant {
    /// Stable id when known (e.g. `user12345`); empty for pure mentions.
    pub user_id: String,
    pub name: String,
    /// Mention username, leading `@` optional.
    pub username: String,
}

/// An enriched chat participant. `id` is 0 when the participant could not be
/// resolved upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub bio: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
}

/// Parses an exported chat-history document from raw JSON bytes.
pub fn parse_document(data: &[u8]) -> Result<ChatDocument, DocumentError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_export() {
        let data = br#"{
            "name": "Team",
            "type": "private_supergroup",
            "id": 42,
            "messages": [
                {
                    "id": 1,
                    "type": "message",
                    "date": "2024-01-01T00:00:00",
                    "from": "John",
                    "from_id": "user123",
                    "text": "hello",
                    "text_entities": [{"type": "mention", "text": "@kate"}]
                },
                {
                    "id": 2,
                    "type": "service",
                    "actor": "Jane",
                    "actor_id": "user456",
                    "text": ["a", {"type": "bold", "text": "b"}]
                }
            ]
        }"#;

        let chat = parse_document(data).expect("parse");
        assert_eq!(chat.name, "Team");
        assert_eq!(chat.id, 42);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].from_id, "user123");
        assert_eq!(chat.messages[0].text_entities[0].kind, "mention");
        assert!(chat.messages[1].is_service());
        assert_eq!(chat.messages[1].actor_id, "user456");
        // Missing author fields default to empty rather than failing.
        assert_eq!(chat.messages[1].from, "");
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(parse_document(b"not json").is_err());
    }

    #[test]
    fn user_serialization_omits_empty_channel() {
        let user = User {
            id: 7,
            name: "John".to_string(),
            username: "john".to_string(),
            bio: String::new(),
            channel: String::new(),
        };
        let json = serde_json::to_value(&user).expect("serialize");
        assert!(json.get("channel").is_none());

        let user = User {
            channel: "newsfeed".to_string(),
            ..user
        };
        let json = serde_json::to_value(&user).expect("serialize");
        assert_eq!(json["channel"], "newsfeed");
    }
}

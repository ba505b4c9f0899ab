use std::collections::HashSet;

use roster_domain::{ChatDocument, RawParticipant};

/// Walks a parsed chat document once and returns the deduplicated raw
/// participants: message authors (by id) and textual mentions (by username).
/// The two deduplication spaces are independent, so the same person may
/// appear once as an author and once as a mention.
pub fn extract_raw_participants(chat: &ChatDocument) -> Vec<RawParticipant> {
    let mut participants = Vec::new();
    let mut seen_authors: HashSet<&str> = HashSet::new();
    let mut seen_mentions: HashSet<&str> = HashSet::new();

    for message in &chat.messages {
        let (entity_id, entity_name) = if message.is_service() {
            (message.actor_id.as_str(), message.actor.as_str())
        } else {
            (message.from_id.as_str(), message.from.as_str())
        };

        // Only real user authors count; group/channel actors and deleted
        // accounts are skipped.
        if entity_id.starts_with("user")
            && !entity_name.is_empty()
            && entity_name != "Deleted Account"
            && seen_authors.insert(entity_id)
        {
            participants.push(RawParticipant {
                user_id: entity_id.to_string(),
                name: entity_name.to_string(),
                username: String::new(),
            });
        }

        for entity in &message.text_entities {
            if entity.kind == "mention" && seen_mentions.insert(entity.text.as_str()) {
                participants.push(RawParticipant {
                    username: entity.text.clone(),
                    ..Default::default()
                });
            }
        }
    }

    participants
}

#[cfg(test)]
mod tests {
    use roster_domain::parse_document;

    use super::*;

    fn document(messages: serde_json::Value) -> ChatDocument {
        let raw = serde_json::json!({
            "name": "Fixture",
            "type": "private_supergroup",
            "id": 1,
            "messages": messages,
        });
        parse_document(raw.to_string().as_bytes()).expect("fixture parses")
    }

    #[test]
    fn extracts_authors_and_mentions() {
        let chat = document(serde_json::json!([
            {"id": 1, "type": "message", "from": "John", "from_id": "user123"},
            {
                "id": 2,
                "type": "message",
                "from": "Jane",
                "from_id": "user456",
                "text_entities": [{"type": "mention", "text": "@kate"}]
            },
        ]));

        let participants = extract_raw_participants(&chat);
        assert_eq!(
            participants,
            vec![
                RawParticipant {
                    user_id: "user123".to_string(),
                    name: "John".to_string(),
                    username: String::new(),
                },
                RawParticipant {
                    user_id: "user456".to_string(),
                    name: "Jane".to_string(),
                    username: String::new(),
                },
                RawParticipant {
                    username: "@kate".to_string(),
                    ..Default::default()
                },
            ]
        );
    }

    #[test]
    fn service_messages_use_the_actor_pair() {
        let chat = document(serde_json::json!([
            {
                "id": 1,
                "type": "service",
                "from": "John",
                "from_id": "user123",
                "actor": "Jane",
                "actor_id": "user456"
            },
        ]));

        let participants = extract_raw_participants(&chat);
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].user_id, "user456");
        assert_eq!(participants[0].name, "Jane");
    }

    #[test]
    fn filters_deleted_accounts_and_non_user_ids() {
        let chat = document(serde_json::json!([
            {"id": 1, "type": "message", "from": "Deleted Account", "from_id": "user999"},
            {"id": 2, "type": "message", "from": "Newsfeed", "from_id": "channel42"},
            {"id": 3, "type": "message", "from": "", "from_id": "user777"},
        ]));

        assert!(extract_raw_participants(&chat).is_empty());
    }

    #[test]
    fn deduplicates_authors_and_mentions_independently() {
        let chat = document(serde_json::json!([
            {
                "id": 1,
                "type": "message",
                "from": "John",
                "from_id": "user123",
                "text_entities": [{"type": "mention", "text": "@kate"}]
            },
            {
                "id": 2,
                "type": "message",
                "from": "John",
                "from_id": "user123",
                "text_entities": [
                    {"type": "mention", "text": "@kate"},
                    {"type": "mention", "text": "@john"}
                ]
            },
        ]));

        let participants = extract_raw_participants(&chat);
        assert_eq!(participants.len(), 3);
        assert_eq!(participants[0].user_id, "user123");
        assert_eq!(participants[1].username, "@kate");
        assert_eq!(participants[2].username, "@john");
    }

    #[test]
    fn extraction_is_idempotent() {
        let chat = document(serde_json::json!([
            {
                "id": 1,
                "type": "message",
                "from": "John",
                "from_id": "user123",
                "text_entities": [{"type": "mention", "text": "@kate"}]
            },
            {"id": 2, "type": "service", "actor": "Jane", "actor_id": "user456"},
        ]));

        assert_eq!(
            extract_raw_participants(&chat),
            extract_raw_participants(&chat)
        );
    }
}

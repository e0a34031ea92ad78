// REST and event payload models.
//
// These mirror the instance's JSON shapes one-to-one. The same `Message`
// shape is returned by the REST API and carried in `message.created` /
// `message.updated` event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,

    /// Client correlation token, echoed back by the server for messages
    /// this client sent.
    #[serde(default)]
    pub nonce: Option<String>,

    #[serde(default)]
    pub reactions: Vec<Reaction>,

    #[serde(default)]
    pub thread_reply_count: u32,

    #[serde(default)]
    pub thread_last_reply_at: Option<DateTime<Utc>>,
}

/// Aggregated reactions for one emoji on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Request body for `POST channels/{channel}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
    pub nonce: &'a str,
}

/// Request body for `PATCH channels/{channel}/messages/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct EditMessageRequest<'a> {
    pub content: &'a str,
}

/// Request body for `POST auth/refresh`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token pair returned by `POST auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Structured error body some instances return on failure.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn message_defaults_optional_fields() {
        let json = r#"{
            "id": "m1",
            "channel_id": "general",
            "author_id": "u1",
            "content": "hi",
            "created_at": "2026-03-01T10:00:00Z"
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert!(msg.nonce.is_none());
        assert!(msg.reactions.is_empty());
        assert_eq!(msg.thread_reply_count, 0);
    }

    #[test]
    fn error_body_accepts_error_alias() {
        let body: ApiErrorBody = serde_json::from_str(r#"{"error":"nope"}"#).unwrap();
        assert_eq!(body.message.as_deref(), Some("nope"));
    }
}

// ── Inbound event table ──
//
// Maps an envelope's `type` to the typed shape its domain expects.
// Unknown types decode to `None` and are ignored by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use chorus_api::{Envelope, Message, kind};

use crate::model::UserId;

// ── Payload shapes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingEvent {
    pub channel_id: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageDeleted {
    pub channel_id: String,
    #[serde(alias = "id")]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadUpdated {
    pub channel_id: String,
    pub message_id: String,
    pub reply_count: u32,
    #[serde(default)]
    pub last_reply_at: Option<DateTime<Utc>>,
}

/// A participant's voice state. `channel_id` is `None` once they leave.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceStateEvent {
    pub user_id: UserId,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub deafened: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceMembership {
    pub user_id: UserId,
    pub channel_id: String,
}

// ── InboundEvent ─────────────────────────────────────────────────────

/// Every envelope type the client acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Authenticated,
    Ping,
    Presence(PresenceUpdate),
    TypingStart(TypingEvent),
    TypingStop(TypingEvent),
    MessageCreated(Message),
    MessageUpdated(Message),
    MessageDeleted(MessageDeleted),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    ThreadUpdated(ThreadUpdated),
    VoiceState(VoiceStateEvent),
    VoiceJoined(VoiceMembership),
    VoiceLeft(VoiceMembership),
}

impl InboundEvent {
    /// Decode an envelope. `Ok(None)` for types this client doesn't handle.
    pub fn decode(envelope: &Envelope) -> Result<Option<Self>, serde_json::Error> {
        let event = match envelope.kind.as_str() {
            kind::AUTHENTICATED => Self::Authenticated,
            kind::PING => Self::Ping,
            kind::PRESENCE_UPDATE => Self::Presence(envelope.decode()?),
            kind::TYPING_START => Self::TypingStart(envelope.decode()?),
            kind::TYPING_STOP => Self::TypingStop(envelope.decode()?),
            kind::MESSAGE_CREATED => Self::MessageCreated(envelope.decode()?),
            kind::MESSAGE_UPDATED => Self::MessageUpdated(envelope.decode()?),
            kind::MESSAGE_DELETED => Self::MessageDeleted(envelope.decode()?),
            kind::REACTION_ADDED => Self::ReactionAdded(envelope.decode()?),
            kind::REACTION_REMOVED => Self::ReactionRemoved(envelope.decode()?),
            kind::THREAD_UPDATED => Self::ThreadUpdated(envelope.decode()?),
            kind::VOICE_STATE => Self::VoiceState(envelope.decode()?),
            kind::VOICE_JOINED => Self::VoiceJoined(envelope.decode()?),
            kind::VOICE_LEFT => Self::VoiceLeft(envelope.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

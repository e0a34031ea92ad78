//! Session wire format.
//!
//! Every frame exchanged over an instance's WebSocket is a JSON envelope of
//! the shape `{ "type": "...", "timestamp": "...", "payload": {...} }`.
//! Inbound envelopes are parsed once and shared immutably; outbound
//! messages are built by the client with a fresh timestamp.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ── Close codes ──────────────────────────────────────────────────────

/// WebSocket close codes that carry protocol meaning.
pub mod close_code {
    /// Clean, intentional close. Never triggers a reconnect.
    pub const NORMAL: u16 = 1000;

    /// No close frame was received (transport failure). Used locally
    /// when a dial or stream error ends the session.
    pub const ABNORMAL: u16 = 1006;

    /// The server replaced this session with a newer login for the same
    /// account. Never triggers a reconnect.
    pub const SESSION_SUPERSEDED: u16 = 4000;
}

// ── Event kinds ──────────────────────────────────────────────────────

/// Envelope `type` values understood by the client.
pub mod kind {
    /// Server confirmation that the handshake token was accepted.
    pub const AUTHENTICATED: &str = "authenticated";

    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";

    pub const PRESENCE_UPDATE: &str = "presence.update";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";

    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const REACTION_ADDED: &str = "reaction.added";
    pub const REACTION_REMOVED: &str = "reaction.removed";
    pub const THREAD_UPDATED: &str = "thread.updated";

    pub const VOICE_STATE: &str = "voice.state";
    pub const VOICE_JOINED: &str = "voice.joined";
    pub const VOICE_LEFT: &str = "voice.left";
}

// ── Envelope ─────────────────────────────────────────────────────────

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type, e.g. `"message.created"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Server timestamp (RFC 3339). Kept as the raw string the server sent.
    #[serde(default)]
    pub timestamp: String,

    /// Event body. Shape depends on `kind`.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the payload into a typed shape.
    ///
    /// A missing payload decodes as JSON `null`, which succeeds for
    /// payload types that are entirely optional.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(value) => T::deserialize(value),
            None => serde_json::from_value(serde_json::Value::Null),
        }
    }
}

// ── OutboundMessage ──────────────────────────────────────────────────

/// A client-issued frame, queued while offline and sent once connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,

    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }

    /// Serialize to the JSON text frame sent over the socket.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

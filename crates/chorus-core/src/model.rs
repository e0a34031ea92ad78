// ── Core identity and fleet types ──
//
// Instance and user identifiers are opaque strings chosen by the user
// (instance) or issued by the server (user). Both are newtyped so they
// can't be swapped by accident.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;
use url::Url;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of one configured chat server.
    InstanceId
);

string_id!(
    /// Identifier of an account on an instance.
    UserId
);

// ── Instance ────────────────────────────────────────────────────────

/// One independently-addressed chat server the client connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    /// REST and socket base address, e.g. `https://chat.example.com`.
    pub base_url: Url,
    /// Display name shown to the user.
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<Url>,
}

impl Instance {
    pub fn new(id: impl Into<InstanceId>, base_url: Url, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url,
            name: name.into(),
            icon_url: None,
        }
    }
}

// ── ConnectionStatus ────────────────────────────────────────────────

/// Session state observable by consumers. Transitions only via
/// [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// The server confirmed authentication on the current socket.
    Connected,
    /// Waiting out the backoff before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// The last attempt could not authenticate. No retry is scheduled.
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Connected, or an attempt is in flight or scheduled.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }
}

// ── Per-instance domain stores ──
//
// Presence, chat and voice state, one container per instance. Stores
// never talk to a Connection; they only receive events the coordinator
// dispatches to them (plus direct results from REST calls for chat).

mod chat;
mod presence;
mod voice;

use std::sync::Arc;

pub use chat::{ChatRecord, ChatStore, Delivery};
pub use presence::PresenceStore;
pub use voice::{LocalVoiceState, VoiceParticipant, VoiceStore};

use crate::model::InstanceId;
use crate::registry::InstanceRegistry;

/// Every domain's registry, owned by the [`Client`](crate::Client).
#[derive(Debug, Default)]
pub struct DomainStores {
    presence: InstanceRegistry<PresenceStore>,
    chat: InstanceRegistry<ChatStore>,
    voice: InstanceRegistry<VoiceStore>,
}

impl DomainStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presence(&self, id: &InstanceId) -> Arc<PresenceStore> {
        self.presence.get(id)
    }

    pub fn chat(&self, id: &InstanceId) -> Arc<ChatStore> {
        self.chat.get(id)
    }

    pub fn voice(&self, id: &InstanceId) -> Arc<VoiceStore> {
        self.voice.get(id)
    }

    /// Forget everything cached for one instance.
    pub fn clear(&self, id: &InstanceId) {
        self.presence.clear(id);
        self.chat.clear(id);
        self.voice.clear(id);
    }

    /// Forget everything (full logout).
    pub fn clear_all(&self) {
        self.presence.clear_all();
        self.chat.clear_all();
        self.voice.clear_all();
    }
}

/// Bump a store's change counter. `send_modify` updates even with zero
/// receivers.
fn bump(version: &tokio::sync::watch::Sender<u64>) {
    version.send_modify(|v| *v = v.wrapping_add(1));
}

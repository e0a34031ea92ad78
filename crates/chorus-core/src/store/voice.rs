// Voice: participants per channel, plus this client's own mute/deafen
// state. Audio itself is handled by an external media client.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::watch;

use super::bump;
use crate::events::{VoiceMembership, VoiceStateEvent};
use crate::model::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParticipant {
    pub user_id: UserId,
    pub channel_id: String,
    pub muted: bool,
    pub deafened: bool,
}

/// This client's own voice controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalVoiceState {
    /// Voice channel joined through the media client, if any.
    pub channel_id: Option<String>,
    pub muted: bool,
    pub deafened: bool,
}

#[derive(Debug)]
pub struct VoiceStore {
    participants: DashMap<UserId, VoiceParticipant>,
    local: Mutex<LocalVoiceState>,
    version: watch::Sender<u64>,
}

impl Default for VoiceStore {
    fn default() -> Self {
        Self {
            participants: DashMap::new(),
            local: Mutex::new(LocalVoiceState::default()),
            version: watch::Sender::new(0),
        }
    }
}

impl VoiceStore {
    pub fn apply_state(&self, event: &VoiceStateEvent) {
        match &event.channel_id {
            Some(channel_id) => {
                self.participants.insert(
                    event.user_id.clone(),
                    VoiceParticipant {
                        user_id: event.user_id.clone(),
                        channel_id: channel_id.clone(),
                        muted: event.muted,
                        deafened: event.deafened,
                    },
                );
            }
            None => {
                self.participants.remove(&event.user_id);
            }
        }
        bump(&self.version);
    }

    pub fn joined(&self, event: &VoiceMembership) {
        self.participants
            .entry(event.user_id.clone())
            .and_modify(|p| p.channel_id.clone_from(&event.channel_id))
            .or_insert_with(|| VoiceParticipant {
                user_id: event.user_id.clone(),
                channel_id: event.channel_id.clone(),
                muted: false,
                deafened: false,
            });
        bump(&self.version);
    }

    /// A `left` for a channel the user already moved away from is stale.
    pub fn left(&self, event: &VoiceMembership) {
        if self
            .participants
            .remove_if(&event.user_id, |_, p| p.channel_id == event.channel_id)
            .is_some()
        {
            bump(&self.version);
        }
    }

    pub fn participant(&self, user: &UserId) -> Option<VoiceParticipant> {
        self.participants.get(user).map(|p| p.clone())
    }

    /// Participants in `channel_id`, sorted by user id.
    pub fn participants_in(&self, channel_id: &str) -> Vec<VoiceParticipant> {
        let mut found: Vec<VoiceParticipant> = self
            .participants
            .iter()
            .filter(|p| p.channel_id == channel_id)
            .map(|p| p.clone())
            .collect();
        found.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        found
    }

    // ── Local state ──────────────────────────────────────────────────

    pub fn local(&self) -> LocalVoiceState {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deafening implies muting.
    pub fn set_local(&self, muted: bool, deafened: bool) -> LocalVoiceState {
        let updated = {
            let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
            local.muted = muted || deafened;
            local.deafened = deafened;
            local.clone()
        };
        bump(&self.version);
        updated
    }

    pub fn set_local_channel(&self, channel_id: Option<String>) {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channel_id = channel_id;
        bump(&self.version);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

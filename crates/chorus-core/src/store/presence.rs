// Presence: who is online, who is typing where, and whether this
// instance's session is up.

use dashmap::DashMap;
use tokio::sync::watch;

use super::bump;
use crate::events::{PresenceStatus, PresenceUpdate, TypingEvent};
use crate::model::UserId;

#[derive(Debug)]
pub struct PresenceStore {
    connected: watch::Sender<bool>,
    users: DashMap<UserId, PresenceStatus>,
    /// Channel id -> users typing there, in arrival order.
    typing: DashMap<String, Vec<UserId>>,
    version: watch::Sender<u64>,
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self {
            connected: watch::Sender::new(false),
            users: DashMap::new(),
            typing: DashMap::new(),
            version: watch::Sender::new(0),
        }
    }
}

impl PresenceStore {
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Typing indicators don't survive a lost session.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed && !connected {
            self.typing.clear();
            bump(&self.version);
        }
    }

    pub fn status(&self, user: &UserId) -> PresenceStatus {
        self.users.get(user).map_or(PresenceStatus::Offline, |s| *s)
    }

    pub fn apply_update(&self, update: &PresenceUpdate) {
        self.users.insert(update.user_id.clone(), update.status);
        if update.status == PresenceStatus::Offline {
            for mut channel in self.typing.iter_mut() {
                channel.retain(|u| *u != update.user_id);
            }
        }
        bump(&self.version);
    }

    pub fn typing_started(&self, event: &TypingEvent) {
        let mut users = self.typing.entry(event.channel_id.clone()).or_default();
        if !users.contains(&event.user_id) {
            users.push(event.user_id.clone());
            drop(users);
            bump(&self.version);
        }
    }

    pub fn typing_stopped(&self, event: &TypingEvent) {
        let removed = self.typing.get_mut(&event.channel_id).is_some_and(|mut users| {
            let before = users.len();
            users.retain(|u| *u != event.user_id);
            users.len() != before
        });
        if removed {
            bump(&self.version);
        }
    }

    pub fn typing_in(&self, channel_id: &str) -> Vec<UserId> {
        self.typing
            .get(channel_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Change counter, bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

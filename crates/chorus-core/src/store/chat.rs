// ── Chat messages with optimistic sends ──
//
// Each channel holds an ordered list of records. A send appends a
// pending record immediately, keyed by a fresh correlation token (sent
// to the server as `nonce`). The REST response and the inbound
// `message.created` event both reconcile against that token, in either
// order, so the channel ends up with exactly one record per send.
//
// Everything after creation is a targeted diff keyed by message id:
// edits, deletes, reactions, thread counters.

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use chorus_api::{Message, Reaction};

use super::bump;
use crate::events::{ReactionEvent, ThreadUpdated};
use crate::model::UserId;

/// Prefix of the placeholder id a pending record carries until the
/// server assigns a real one.
const LOCAL_ID_PREFIX: &str = "local:";

/// Where a record stands relative to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Confirmed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub message: Message,
    pub delivery: Delivery,
}

impl ChatRecord {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Confirmed,
        }
    }

    /// Correlation token of a locally-issued send.
    pub fn nonce(&self) -> Option<&str> {
        self.message.nonce.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.delivery != Delivery::Confirmed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, Delivery::Failed { .. })
    }
}

/// Messages for every channel of one instance.
#[derive(Debug)]
pub struct ChatStore {
    channels: DashMap<String, Vec<ChatRecord>>,
    version: watch::Sender<u64>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self {
            channels: DashMap::new(),
            version: watch::Sender::new(0),
        }
    }
}

impl ChatStore {
    // ── Reads ────────────────────────────────────────────────────────

    pub fn messages(&self, channel_id: &str) -> Vec<ChatRecord> {
        self.channels
            .get(channel_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, channel_id: &str, message_id: &str) -> Option<ChatRecord> {
        self.channels
            .get(channel_id)?
            .iter()
            .find(|r| r.message.id == message_id)
            .cloned()
    }

    pub fn find_by_nonce(&self, channel_id: &str, nonce: &str) -> Option<ChatRecord> {
        self.channels
            .get(channel_id)?
            .iter()
            .find(|r| r.nonce() == Some(nonce))
            .cloned()
    }

    /// Whether `user` has reacted with `emoji` on a message.
    pub fn has_reacted(&self, channel_id: &str, message_id: &str, emoji: &str, user: &UserId) -> bool {
        self.find(channel_id, message_id).is_some_and(|r| {
            r.message
                .reactions
                .iter()
                .any(|re| re.emoji == emoji && re.user_ids.iter().any(|u| u == user.as_str()))
        })
    }

    /// Change counter, bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Optimistic sends ─────────────────────────────────────────────

    /// Append a pending record and return its correlation token.
    pub fn begin_send(&self, channel_id: &str, author: &UserId, content: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let record = ChatRecord {
            message: Message {
                id: format!("{LOCAL_ID_PREFIX}{token}"),
                channel_id: channel_id.to_owned(),
                author_id: author.to_string(),
                content: content.to_owned(),
                created_at: Utc::now(),
                edited_at: None,
                nonce: Some(token.clone()),
                reactions: Vec::new(),
                thread_reply_count: 0,
                thread_last_reply_at: None,
            },
            delivery: Delivery::Pending,
        };
        self.channels
            .entry(channel_id.to_owned())
            .or_default()
            .push(record);
        bump(&self.version);
        token
    }

    /// Replace the record for `token` with the server's canonical copy.
    pub fn confirm(&self, channel_id: &str, token: &str, mut message: Message) {
        if message.nonce.is_none() {
            message.nonce = Some(token.to_owned());
        }
        {
            let mut records = self.channels.entry(channel_id.to_owned()).or_default();
            reconcile(&mut records, message);
        }
        bump(&self.version);
    }

    /// Flip a pending record to failed. Returns `false` if there was no
    /// pending record for `token` (it may already be confirmed by an
    /// inbound event).
    pub fn fail(&self, channel_id: &str, token: &str, reason: impl Into<String>) -> bool {
        let flipped = self.channels.get_mut(channel_id).is_some_and(|mut records| {
            let pending = records
                .iter_mut()
                .find(|r| r.nonce() == Some(token) && r.delivery == Delivery::Pending);
            match pending {
                Some(record) => {
                    record.delivery = Delivery::Failed {
                        reason: reason.into(),
                    };
                    true
                }
                None => false,
            }
        });
        if flipped {
            bump(&self.version);
        }
        flipped
    }

    /// Remove a failed record.
    pub fn discard(&self, channel_id: &str, token: &str) -> Option<ChatRecord> {
        let removed = self.channels.get_mut(channel_id).and_then(|mut records| {
            let index = records
                .iter()
                .position(|r| r.nonce() == Some(token) && r.is_failed())?;
            Some(records.remove(index))
        });
        if removed.is_some() {
            bump(&self.version);
        }
        removed
    }

    // ── Inbound events ───────────────────────────────────────────────

    /// A matching correlation token reconciles in place, then a matching
    /// server id, otherwise the message is appended.
    pub fn apply_created(&self, message: Message) {
        {
            let mut records = self.channels.entry(message.channel_id.clone()).or_default();
            reconcile(&mut records, message);
        }
        bump(&self.version);
    }

    /// Replace a known message's content. Local delivery state is kept.
    pub fn apply_updated(&self, mut message: Message) -> bool {
        let channel_id = message.channel_id.clone();
        let message_id = message.id.clone();
        self.with_message(&channel_id, &message_id, |existing| {
            if message.nonce.is_none() {
                message.nonce = existing.nonce.take();
            }
            *existing = message;
        })
    }

    pub fn apply_deleted(&self, channel_id: &str, message_id: &str) -> bool {
        let removed = self.channels.get_mut(channel_id).is_some_and(|mut records| {
            let before = records.len();
            records.retain(|r| r.message.id != message_id);
            records.len() != before
        });
        if removed {
            bump(&self.version);
        }
        removed
    }

    /// Idempotent: a user already counted for `emoji` is not counted again.
    pub fn apply_reaction_added(&self, event: &ReactionEvent) -> bool {
        self.with_message(&event.channel_id, &event.message_id, |message| {
            add_reaction(&mut message.reactions, &event.emoji, event.user_id.as_str());
        })
    }

    /// The last remaining user removing a reaction deletes its entry.
    pub fn apply_reaction_removed(&self, event: &ReactionEvent) -> bool {
        self.with_message(&event.channel_id, &event.message_id, |message| {
            remove_reaction(&mut message.reactions, &event.emoji, event.user_id.as_str());
        })
    }

    pub fn apply_thread_updated(&self, event: &ThreadUpdated) -> bool {
        self.with_message(&event.channel_id, &event.message_id, |message| {
            message.thread_reply_count = event.reply_count;
            if event.last_reply_at.is_some() {
                message.thread_last_reply_at = event.last_reply_at;
            }
        })
    }

    // ── History ──────────────────────────────────────────────────────

    /// Replace a channel's confirmed records with `page`, keeping local
    /// pending and failed records after it.
    pub fn load_history(&self, channel_id: &str, page: Vec<Message>) {
        {
            let mut records = self.channels.entry(channel_id.to_owned()).or_default();
            let local: Vec<ChatRecord> = records.drain(..).filter(ChatRecord::is_local).collect();
            records.extend(page.into_iter().map(ChatRecord::confirmed));
            for record in local {
                if let Some(token) = record.nonce() {
                    // The page may already contain this send.
                    if records.iter().any(|r| r.nonce() == Some(token)) {
                        continue;
                    }
                }
                records.push(record);
            }
        }
        bump(&self.version);
    }

    /// Insert an older page in front of what is cached, skipping ids
    /// already present.
    pub fn prepend_history(&self, channel_id: &str, page: Vec<Message>) {
        {
            let mut records = self.channels.entry(channel_id.to_owned()).or_default();
            let older: Vec<ChatRecord> = page
                .into_iter()
                .filter(|m| !records.iter().any(|r| r.message.id == m.id))
                .map(ChatRecord::confirmed)
                .collect();
            records.splice(0..0, older);
        }
        bump(&self.version);
    }

    pub fn clear(&self) {
        self.channels.clear();
        bump(&self.version);
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn with_message(&self, channel_id: &str, message_id: &str, apply: impl FnOnce(&mut Message)) -> bool {
        let found = self.channels.get_mut(channel_id).is_some_and(|mut records| {
            match records.iter_mut().find(|r| r.message.id == message_id) {
                Some(record) => {
                    apply(&mut record.message);
                    true
                }
                None => false,
            }
        });
        if found {
            bump(&self.version);
        }
        found
    }
}

/// Fold a server record into a channel list.
fn reconcile(records: &mut Vec<ChatRecord>, message: Message) {
    let by_nonce = message
        .nonce
        .as_deref()
        .and_then(|nonce| records.iter().position(|r| r.nonce() == Some(nonce)));
    let by_id = records.iter().position(|r| r.message.id == message.id);

    match (by_nonce, by_id) {
        (Some(local), Some(server)) if local != server => {
            // The server copy already arrived without its token: keep that
            // slot and drop the local placeholder.
            records[server] = ChatRecord::confirmed(message);
            records.remove(local);
        }
        (Some(index), _) | (None, Some(index)) => records[index] = ChatRecord::confirmed(message),
        (None, None) => records.push(ChatRecord::confirmed(message)),
    }
}

fn add_reaction(reactions: &mut Vec<Reaction>, emoji: &str, user_id: &str) {
    match reactions.iter_mut().find(|r| r.emoji == emoji) {
        Some(reaction) => {
            if !reaction.user_ids.iter().any(|u| u == user_id) {
                reaction.user_ids.push(user_id.to_owned());
                reaction.count = reaction.count.saturating_add(1);
            }
        }
        None => reactions.push(Reaction {
            emoji: emoji.to_owned(),
            count: 1,
            user_ids: vec![user_id.to_owned()],
        }),
    }
}

fn remove_reaction(reactions: &mut Vec<Reaction>, emoji: &str, user_id: &str) {
    let Some(index) = reactions.iter().position(|r| r.emoji == emoji) else {
        return;
    };
    let reaction = &mut reactions[index];
    let before = reaction.user_ids.len();
    reaction.user_ids.retain(|u| u != user_id);
    if reaction.user_ids.len() != before {
        reaction.count = reaction.count.saturating_sub(1);
    }
    if reaction.count == 0 {
        reactions.remove(index);
    }
}

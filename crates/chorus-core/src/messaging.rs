// ── Chat actions over REST ──
//
// User-issued chat mutations. Sends go through the optimistic tracker:
// the pending record is visible before the request leaves, and the
// response (or failure) reconciles it in place. Edits, deletes and
// reactions apply the server's answer as targeted diffs. A rejected
// bearer token is refreshed once and the request retried.

use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, warn};

use chorus_api::{Message, RestClient};

use crate::auth::TokenProvider;
use crate::error::CoreError;
use crate::model::{InstanceId, UserId};
use crate::rest::RestClients;
use crate::store::DomainStores;

/// Default page size for history fetches.
pub const HISTORY_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct Messaging {
    clients: Arc<RestClients>,
    tokens: Arc<TokenProvider>,
    stores: Arc<DomainStores>,
}

impl Messaging {
    pub fn new(clients: Arc<RestClients>, tokens: Arc<TokenProvider>, stores: Arc<DomainStores>) -> Self {
        Self {
            clients,
            tokens,
            stores,
        }
    }

    /// Send `content` optimistically. The pending record exists before
    /// this awaits; on error it has been flipped to failed.
    pub async fn send_message(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        author: &UserId,
        content: &str,
    ) -> Result<Message, CoreError> {
        let chat = self.stores.chat(instance);
        let token = chat.begin_send(channel_id, author, content);
        debug!(instance = %instance, channel = channel_id, nonce = %token, "sending message");

        let nonce = token.as_str();
        let result = self
            .call(instance, move |client, access| async move {
                client.send_message(&access, channel_id, content, nonce).await
            })
            .await;

        match result {
            Ok(message) => {
                chat.confirm(channel_id, &token, message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!(instance = %instance, channel = channel_id, error = %e, "send failed");
                chat.fail(channel_id, &token, e.to_string());
                Err(e)
            }
        }
    }

    /// Re-send a failed message with a fresh token, discarding the old
    /// record.
    pub async fn retry(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        token: &str,
        author: &UserId,
    ) -> Result<Message, CoreError> {
        let failed = self
            .stores
            .chat(instance)
            .discard(channel_id, token)
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "failed message".into(),
                identifier: token.to_owned(),
            })?;
        self.send_message(instance, channel_id, author, &failed.message.content)
            .await
    }

    /// Drop a failed message without re-sending.
    pub fn discard(&self, instance: &InstanceId, channel_id: &str, token: &str) -> bool {
        self.stores
            .chat(instance)
            .discard(channel_id, token)
            .is_some()
    }

    pub async fn edit_message(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message, CoreError> {
        let message = self
            .call(instance, move |client, access| async move {
                client.edit_message(&access, channel_id, message_id, content).await
            })
            .await?;
        self.stores.chat(instance).apply_updated(message.clone());
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), CoreError> {
        self.call(instance, move |client, access| async move {
            client.delete_message(&access, channel_id, message_id).await
        })
        .await?;
        self.stores.chat(instance).apply_deleted(channel_id, message_id);
        Ok(())
    }

    /// Add `user`'s `emoji` reaction, or remove it if already present.
    /// Returns whether the reaction is now set.
    pub async fn toggle_reaction(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool, CoreError> {
        let chat = self.stores.chat(instance);
        let event = crate::events::ReactionEvent {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
            emoji: emoji.to_owned(),
            user_id: user.clone(),
        };

        if chat.has_reacted(channel_id, message_id, emoji, user) {
            self.call(instance, move |client, access| async move {
                client.remove_reaction(&access, channel_id, message_id, emoji).await
            })
            .await?;
            chat.apply_reaction_removed(&event);
            Ok(false)
        } else {
            self.call(instance, move |client, access| async move {
                client.add_reaction(&access, channel_id, message_id, emoji).await
            })
            .await?;
            chat.apply_reaction_added(&event);
            Ok(true)
        }
    }

    /// Fetch a page of history. Without `before`, replaces the confirmed
    /// portion of the channel; with it, prepends an older page.
    pub async fn load_history(
        &self,
        instance: &InstanceId,
        channel_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<usize, CoreError> {
        let page = self
            .call(instance, move |client, access| async move {
                client.list_messages(&access, channel_id, before, limit).await
            })
            .await?;
        let count = page.len();
        let chat = self.stores.chat(instance);
        if before.is_some() {
            chat.prepend_history(channel_id, page);
        } else {
            chat.load_history(channel_id, page);
        }
        Ok(count)
    }

    /// Run `op` with a valid access token. If the server rejects the
    /// token, force one refresh and retry once with the new one.
    async fn call<T, F, Fut>(&self, instance: &InstanceId, op: F) -> Result<T, CoreError>
    where
        F: Fn(RestClient, SecretString) -> Fut,
        Fut: Future<Output = Result<T, chorus_api::Error>>,
    {
        let client = self.clients.get(instance)?;
        let access = self.access_token(instance).await?;
        match op(client.clone(), access).await {
            Err(e) if e.is_auth_expired() => {
                warn!(instance = %instance, error = %e, "access token rejected, refreshing");
                if !self.tokens.refresh(instance).await {
                    return Err(e.into());
                }
                let access = self.access_token(instance).await?;
                Ok(op(client, access).await?)
            }
            result => Ok(result?),
        }
    }

    async fn access_token(&self, instance: &InstanceId) -> Result<SecretString, CoreError> {
        self.tokens
            .access_token(instance)
            .await
            .ok_or_else(|| CoreError::NotAuthenticated { id: instance.clone() })
    }
}

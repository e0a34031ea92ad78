// ── Client facade ──
//
// Wires the fleet, credentials, REST clients, coordinator and domain
// stores together. Consumers (the CLI, embedders) hold one `Client` and
// reach everything through it.

use std::sync::Arc;

use chorus_api::{Dialer, Message, WsDialer};

use crate::auth::{CredentialStore, MemoryCredentialStore, RestRefresher, TokenProvider, TokenRefresher};
use crate::config::ClientConfig;
use crate::connection::ConnectionContext;
use crate::coordinator::SessionCoordinator;
use crate::error::CoreError;
use crate::fleet::Fleet;
use crate::media::MediaSession;
use crate::messaging::Messaging;
use crate::model::{Instance, InstanceId, UserId};
use crate::rest::RestClients;
use crate::store::DomainStores;

/// Entry point for consumers. Cheaply cloneable.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    fleet: Arc<Fleet>,
    stores: Arc<DomainStores>,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<TokenProvider>,
    clients: Arc<RestClients>,
    coordinator: SessionCoordinator,
    messaging: Messaging,
}

impl Client {
    /// A client with the production WebSocket dialer and REST refresher.
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::builder(config).credentials(credentials).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            credentials: None,
            dialer: None,
            refresher: None,
            media: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.inner.fleet
    }

    pub fn stores(&self) -> &Arc<DomainStores> {
        &self.inner.stores
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub fn tokens(&self) -> &Arc<TokenProvider> {
        &self.inner.tokens
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.inner.coordinator
    }

    pub fn messaging(&self) -> &Messaging {
        &self.inner.messaging
    }

    // ── Fleet ────────────────────────────────────────────────────────

    pub fn add_instance(&self, instance: Instance) {
        let id = instance.id.clone();
        if self.inner.fleet.add(instance).is_some() {
            // Base URL may have changed.
            self.inner.clients.forget(&id);
        }
    }

    /// Disconnect and forget an instance along with all cached state.
    pub async fn remove_instance(&self, id: &InstanceId) -> Option<Instance> {
        self.inner.coordinator.disconnect(id).await;
        self.inner.stores.clear(id);
        self.inner.clients.forget(id);
        self.inner.fleet.remove(id)
    }

    /// Disconnect everything and drop all cached domain state.
    pub async fn logout_all(&self) {
        self.inner.coordinator.disconnect_all().await;
        self.inner.stores.clear_all();
    }

    // ── Shortcuts ────────────────────────────────────────────────────

    pub fn connect(&self, id: &InstanceId, user: &UserId) -> Result<(), CoreError> {
        self.inner.coordinator.connect(id, user)
    }

    pub async fn disconnect(&self, id: &InstanceId) {
        self.inner.coordinator.disconnect(id).await;
    }

    pub async fn switch_active(&self, id: &InstanceId, user: &UserId) -> Result<(), CoreError> {
        self.inner.coordinator.switch_active(id, user).await
    }

    pub async fn send_message(
        &self,
        id: &InstanceId,
        channel_id: &str,
        author: &UserId,
        content: &str,
    ) -> Result<Message, CoreError> {
        self.inner
            .messaging
            .send_message(id, channel_id, author, content)
            .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("instances", &self.inner.fleet.list().len())
            .finish_non_exhaustive()
    }
}

// ── ClientBuilder ────────────────────────────────────────────────────

/// Swaps collaborators for tests and embedders.
pub struct ClientBuilder {
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    dialer: Option<Arc<dyn Dialer>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    media: Option<Arc<dyn MediaSession>>,
}

impl ClientBuilder {
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaSession>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn build(self) -> Client {
        let fleet = Arc::new(Fleet::new());
        let stores = Arc::new(DomainStores::new());
        let credentials: Arc<dyn CredentialStore> = match self.credentials {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let clients = Arc::new(RestClients::new(
            Arc::clone(&fleet),
            self.config.transport(),
        ));
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(RestRefresher::new(
                Arc::clone(&clients),
                Arc::clone(&credentials),
            )),
        };
        let tokens = Arc::new(TokenProvider::new(
            Arc::clone(&credentials),
            refresher,
            self.config.session.token_skew,
        ));
        let dialer: Arc<dyn Dialer> = match self.dialer {
            Some(dialer) => dialer,
            None => Arc::new(WsDialer),
        };

        let ctx = ConnectionContext {
            config: self.config.session.clone(),
            dialer,
            tokens: Arc::clone(&tokens),
            fleet: Arc::clone(&fleet),
        };
        let coordinator = SessionCoordinator::new(ctx, Arc::clone(&stores), self.media);
        let messaging = Messaging::new(Arc::clone(&clients), Arc::clone(&tokens), Arc::clone(&stores));

        Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                fleet,
                stores,
                credentials,
                tokens,
                clients,
                coordinator,
                messaging,
            }),
        }
    }
}

// ── Credentials and token lifecycle ──
//
// Connections ask the `TokenProvider` for an access token before every
// handshake. Tokens close to expiry trigger a refresh through the
// `TokenRefresher`; concurrent callers for the same instance share one
// in-flight refresh future.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use chorus_api::TokenPair;

use crate::error::CoreError;
use crate::model::InstanceId;
use crate::rest::RestClients;

// ── Credentials ──────────────────────────────────────────────────────

/// Token pair for one instance.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// Expired once `now >= expires_at - skew`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::MAX);
        self.expires_at
            .checked_sub_signed(skew)
            .is_none_or(|deadline| now >= deadline)
    }

    pub fn is_expired(&self, skew: Duration) -> bool {
        self.is_expired_at(Utc::now(), skew)
    }
}

impl From<TokenPair> for Credentials {
    fn from(pair: TokenPair) -> Self {
        Self::new(pair.access_token, pair.refresh_token, pair.expires_at)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ── CredentialStore ──────────────────────────────────────────────────

/// Key-value lookup of credentials by instance.
pub trait CredentialStore: Send + Sync {
    fn get(&self, id: &InstanceId) -> Result<Option<Credentials>, CoreError>;
    fn put(&self, id: &InstanceId, credentials: &Credentials) -> Result<(), CoreError>;
    fn remove(&self, id: &InstanceId) -> Result<(), CoreError>;
}

/// Process-local store. Used by tests and as a cache in front of nothing.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<InstanceId, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, id: &InstanceId) -> Result<Option<Credentials>, CoreError> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    fn put(&self, id: &InstanceId, credentials: &Credentials) -> Result<(), CoreError> {
        self.entries.insert(id.clone(), credentials.clone());
        Ok(())
    }

    fn remove(&self, id: &InstanceId) -> Result<(), CoreError> {
        self.entries.remove(id);
        Ok(())
    }
}

// ── TokenRefresher ───────────────────────────────────────────────────

/// Obtains fresh credentials for an instance and persists them.
/// Resolves `true` on success.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, id: &InstanceId) -> BoxFuture<'static, bool>;
}

/// Refreshes through `POST /api/v1/auth/refresh` and writes the result
/// back to the credential store.
pub struct RestRefresher {
    clients: Arc<RestClients>,
    store: Arc<dyn CredentialStore>,
}

impl RestRefresher {
    pub fn new(clients: Arc<RestClients>, store: Arc<dyn CredentialStore>) -> Self {
        Self { clients, store }
    }
}

impl TokenRefresher for RestRefresher {
    fn refresh(&self, id: &InstanceId) -> BoxFuture<'static, bool> {
        let clients = Arc::clone(&self.clients);
        let store = Arc::clone(&self.store);
        let id = id.clone();

        Box::pin(async move {
            match refresh_once(&clients, store.as_ref(), &id).await {
                Ok(()) => {
                    info!(instance = %id, "access token refreshed");
                    true
                }
                Err(e) => {
                    warn!(instance = %id, error = %e, "token refresh failed");
                    false
                }
            }
        })
    }
}

async fn refresh_once(
    clients: &RestClients,
    store: &dyn CredentialStore,
    id: &InstanceId,
) -> Result<(), CoreError> {
    let current = store
        .get(id)?
        .ok_or_else(|| CoreError::NotAuthenticated { id: id.clone() })?;
    let client = clients.get(id)?;
    let pair = client.refresh_token(&current.refresh_token).await?;
    store.put(id, &Credentials::from(pair))
}

// ── TokenProvider ────────────────────────────────────────────────────

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// Hands out valid access tokens, refreshing when needed.
pub struct TokenProvider {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    skew: Duration,
    in_flight: DashMap<InstanceId, (u64, RefreshFuture)>,
    generation: AtomicU64,
}

impl TokenProvider {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        skew: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            skew,
            in_flight: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// A currently-valid access token, refreshing first if the stored one
    /// is missing or about to expire. `None` if nothing usable exists
    /// after the refresh attempt.
    pub async fn access_token(&self, id: &InstanceId) -> Option<SecretString> {
        if let Some(credentials) = self.valid(id) {
            return Some(credentials.access_token);
        }

        debug!(instance = %id, "access token missing or expiring, refreshing");
        if !self.refresh(id).await {
            return None;
        }
        self.valid(id).map(|c| c.access_token)
    }

    /// Run (or join) the refresh for `id`.
    pub async fn refresh(&self, id: &InstanceId) -> bool {
        let (generation, future) = {
            let entry = self.in_flight.entry(id.clone()).or_insert_with(|| {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                (generation, self.refresher.refresh(id).shared())
            });
            entry.value().clone()
        };

        let refreshed = future.await;
        // A later refresh may already own the slot; only clear our own.
        self.in_flight.remove_if(id, |_, (g, _)| *g == generation);
        refreshed
    }

    fn valid(&self, id: &InstanceId) -> Option<Credentials> {
        match self.store.get(id) {
            Ok(Some(credentials)) if !credentials.is_expired(self.skew) => Some(credentials),
            Ok(_) => None,
            Err(e) => {
                warn!(instance = %id, error = %e, "credential lookup failed");
                None
            }
        }
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("skew", &self.skew)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use secrecy::ExposeSecret;

    use super::*;

    /// Counts calls and writes a fresh token after yielding once.
    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
        store: Arc<MemoryCredentialStore>,
        succeed: bool,
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh(&self, id: &InstanceId) -> BoxFuture<'static, bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let store = Arc::clone(&self.store);
            let id = id.clone();
            let succeed = self.succeed;
            Box::pin(async move {
                tokio::task::yield_now().await;
                if succeed {
                    let fresh = Credentials::new("fresh", "r2", Utc::now() + chrono::Duration::hours(1));
                    store.put(&id, &fresh).unwrap();
                }
                succeed
            })
        }
    }

    fn provider(succeed: bool) -> (TokenProvider, Arc<MemoryCredentialStore>, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = CountingRefresher {
            calls: Arc::clone(&calls),
            store: Arc::clone(&store),
            succeed,
        };
        let provider = TokenProvider::new(
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::new(refresher),
            Duration::from_secs(30),
        );
        (provider, store, calls)
    }

    #[test]
    fn expiry_honours_skew() {
        let now = Utc::now();
        let creds = Credentials::new("a", "r", now + chrono::Duration::seconds(20));
        assert!(creds.is_expired_at(now, Duration::from_secs(30)));
        assert!(!creds.is_expired_at(now, Duration::from_secs(10)));

        let exact = Credentials::new("a", "r", now + chrono::Duration::seconds(30));
        assert!(exact.is_expired_at(now, Duration::from_secs(30)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let creds = Credentials::new("secret-access", "secret-refresh", Utc::now());
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }

    #[tokio::test]
    async fn valid_token_skips_refresh() {
        let (provider, store, calls) = provider(true);
        let id = InstanceId::new("a");
        store
            .put(&id, &Credentials::new("live", "r", Utc::now() + chrono::Duration::hours(1)))
            .unwrap();

        let token = provider.access_token(&id).await.unwrap();
        assert_eq!(token.expose_secret(), "live");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_are_deduplicated() {
        let (provider, store, calls) = provider(true);
        let id = InstanceId::new("a");
        store
            .put(&id, &Credentials::new("stale", "r", Utc::now()))
            .unwrap();

        let (a, b, c) = tokio::join!(
            provider.access_token(&id),
            provider.access_token(&id),
            provider.access_token(&id),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for token in [a, b, c] {
            assert_eq!(token.unwrap().expose_secret(), "fresh");
        }
        assert!(provider.in_flight.is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_yields_none_and_clears_slot() {
        let (provider, _store, calls) = provider(false);
        let id = InstanceId::new("a");

        assert!(provider.access_token(&id).await.is_none());
        assert!(provider.access_token(&id).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(provider.in_flight.is_empty());
    }
}

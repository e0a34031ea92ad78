#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures: an in-memory dialer and pre-wired clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{self, BoxFuture};
use tokio::sync::mpsc;
use url::Url;

use chorus_api::{Dialer, Error, SocketCommand, SocketPeer, SocketSession};
use chorus_core::{
    Client, ClientConfig, ConnectionContext, ConnectionEvent, ConnectionStatus, CredentialStore,
    Credentials, Fleet, Instance, InstanceId, MemoryCredentialStore, SessionConfig, Subscription,
    TokenProvider, TokenRefresher,
};

pub const INSTANCE: &str = "home";

pub fn instance_id() -> InstanceId {
    InstanceId::new(INSTANCE)
}

// ── Dialer ───────────────────────────────────────────────────────────

/// A handshake the code under test performed.
pub struct Dialed {
    pub url: Url,
    pub peer: SocketPeer,
}

impl Dialed {
    pub fn authenticate(&self) {
        assert!(self.peer.send_text(r#"{"type":"authenticated","timestamp":"t"}"#));
    }

    pub fn send(&self, kind: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({ "type": kind, "timestamp": "t", "payload": payload });
        assert!(self.peer.send_text(frame.to_string()));
    }

    /// Next text frame the client wrote, as JSON.
    pub async fn next_frame(&mut self) -> serde_json::Value {
        match tokio::time::timeout(Duration::from_secs(5), self.peer.commands.recv())
            .await
            .unwrap()
        {
            Some(SocketCommand::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub async fn next_command(&mut self) -> Option<SocketCommand> {
        tokio::time::timeout(Duration::from_secs(5), self.peer.commands.recv())
            .await
            .unwrap()
    }
}

/// Hands every successful handshake to the test through a channel.
pub struct MockDialer {
    dialed: mpsc::UnboundedSender<Dialed>,
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl MockDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Dialed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            dialed: tx,
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    /// Refuse the next `n` handshakes.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl Dialer for MockDialer {
    fn dial(&self, url: Url) -> BoxFuture<'static, Result<SocketSession, Error>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Box::pin(future::ready(Err(Error::WebSocketConnect("connection refused".into()))));
        }
        let (session, peer) = SocketSession::pair();
        let _ = self.dialed.send(Dialed { url, peer });
        Box::pin(future::ready(Ok(session)))
    }
}

/// Never manages to refresh.
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh(&self, _id: &InstanceId) -> BoxFuture<'static, bool> {
        Box::pin(future::ready(false))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn valid_credentials() -> Credentials {
    Credentials::new("access-1", "refresh-1", Utc::now() + chrono::Duration::hours(1))
}

pub fn fleet_with(base_url: &str) -> Arc<Fleet> {
    let fleet = Arc::new(Fleet::new());
    fleet.add(Instance::new(INSTANCE, Url::parse(base_url).unwrap(), "Home"));
    fleet
}

pub struct ConnectionFixture {
    pub ctx: ConnectionContext,
    pub dialer: Arc<MockDialer>,
    pub dialed: mpsc::UnboundedReceiver<Dialed>,
    pub credentials: Arc<MemoryCredentialStore>,
}

impl ConnectionFixture {
    pub fn new(config: SessionConfig) -> Self {
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials.put(&instance_id(), &valid_credentials()).unwrap();
        let (dialer, dialed) = MockDialer::new();
        let tokens = Arc::new(TokenProvider::new(
            Arc::clone(&credentials) as Arc<dyn CredentialStore>,
            Arc::new(NoRefresh),
            config.token_skew,
        ));
        let ctx = ConnectionContext {
            config,
            dialer: Arc::clone(&dialer) as Arc<dyn Dialer>,
            tokens,
            fleet: fleet_with("https://chat.example.com"),
        };
        Self {
            ctx,
            dialer,
            dialed,
            credentials,
        }
    }

    pub async fn next_dial(&mut self) -> Dialed {
        tokio::time::timeout(Duration::from_secs(120), self.dialed.recv())
            .await
            .expect("no handshake within timeout")
            .unwrap()
    }
}

pub struct ClientFixture {
    pub client: Client,
    pub dialer: Arc<MockDialer>,
    pub dialed: mpsc::UnboundedReceiver<Dialed>,
    pub credentials: Arc<MemoryCredentialStore>,
}

impl ClientFixture {
    pub fn new(base_url: &str, session: SessionConfig) -> Self {
        Self::with_builder(base_url, session, |b| b)
    }

    pub fn with_builder(
        base_url: &str,
        session: SessionConfig,
        customize: impl FnOnce(chorus_core::ClientBuilder) -> chorus_core::ClientBuilder,
    ) -> Self {
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials.put(&instance_id(), &valid_credentials()).unwrap();
        let (dialer, dialed) = MockDialer::new();
        let config = ClientConfig {
            session,
            ..ClientConfig::default()
        };
        let builder = Client::builder(config)
            .credentials(Arc::clone(&credentials) as Arc<dyn CredentialStore>)
            .dialer(Arc::clone(&dialer) as Arc<dyn Dialer>)
            .refresher(Arc::new(NoRefresh));
        let client = customize(builder).build();
        client.add_instance(Instance::new(INSTANCE, Url::parse(base_url).unwrap(), "Home"));
        Self {
            client,
            dialer,
            dialed,
            credentials,
        }
    }

    pub async fn next_dial(&mut self) -> Dialed {
        tokio::time::timeout(Duration::from_secs(120), self.dialed.recv())
            .await
            .expect("no handshake within timeout")
            .unwrap()
    }

    /// Wait until the fleet reports `status` for the test instance.
    pub async fn wait_for_status(&self, status: ConnectionStatus) {
        let mut rx = self.client.fleet().subscribe_status(&instance_id());
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
            .await
            .expect("status not reached")
            .unwrap();
    }
}

/// Millisecond backoff for tests that can't pause time.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        backoff: vec![Duration::from_millis(10)],
        unsubscribe_grace: Duration::from_millis(20),
        token_skew: Duration::from_secs(30),
    }
}

// ── Subscription helpers ─────────────────────────────────────────────

pub async fn next_event(sub: &mut Subscription) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(120), sub.recv())
        .await
        .expect("no event within timeout")
        .unwrap()
}

/// Skip events until a status arrives, and return it.
pub async fn next_status(sub: &mut Subscription) -> ConnectionStatus {
    loop {
        if let ConnectionEvent::Status(status) = next_event(sub).await {
            return status;
        }
    }
}

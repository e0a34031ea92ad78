// ── Per-instance live session ──
//
// A `Connection` owns one instance's socket end to end: token lookup,
// handshake, inbound parsing, backoff reconnects, and reference-counted
// teardown. All state lives behind one short-lived `std::sync::Mutex`;
// status changes and inbound envelopes are published while that lock is
// held so every subscriber observes them in the same order.
//
// Stale async work is fenced off with a generation counter: `close()` and
// every new attempt bump it, and a task that wakes up holding an old
// generation does nothing.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use secrecy::ExposeSecret;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use chorus_api::socket::socket_url;
use chorus_api::{CloseFrame, Dialer, Envelope, SocketCommand, SocketEvent, close_code, kind};

use crate::auth::TokenProvider;
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::fleet::Fleet;
use crate::model::{ConnectionStatus, InstanceId, UserId};

/// Something a subscriber observes, in session order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Message(Arc<Envelope>),
    Status(ConnectionStatus),
}

/// Collaborators every connection needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: SessionConfig,
    pub dialer: Arc<dyn Dialer>,
    pub tokens: Arc<TokenProvider>,
    pub fleet: Arc<Fleet>,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ── State ────────────────────────────────────────────────────────────

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

struct LiveSocket {
    outbound: mpsc::UnboundedSender<SocketCommand>,
    /// Stops the read loop for this socket.
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    generation: u64,
    /// An attempt is between `connect()` and socket open.
    connecting: bool,
    socket: Option<LiveSocket>,
    attempt: u32,
    listeners: Vec<Listener>,
    next_listener: u64,
    user: Option<UserId>,
    reconnect_timer: Option<CancellationToken>,
    teardown_timer: Option<CancellationToken>,
}

struct Inner {
    instance: InstanceId,
    ctx: ConnectionContext,
    state: Mutex<State>,
    status: watch::Sender<ConnectionStatus>,
}

// ── Connection ───────────────────────────────────────────────────────

/// One instance's persistent session. Cheaply cloneable.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(instance: InstanceId, ctx: ConnectionContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                instance,
                ctx,
                state: Mutex::new(State::default()),
                status: watch::Sender::new(ConnectionStatus::Disconnected),
            }),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.instance
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Consecutive non-suppressed closes since the last authenticated open.
    pub fn attempt(&self) -> u32 {
        self.lock().attempt
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Whether a transport is open (authenticated or not).
    pub fn is_open(&self) -> bool {
        self.lock().socket.is_some()
    }

    /// Whether a reconnect is waiting out its backoff.
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect_timer.is_some()
    }

    // ── Subscribers ──────────────────────────────────────────────────

    /// Register a subscriber for `user` and make sure a session is being
    /// established. A different user than the current one forces the
    /// existing session closed first.
    pub fn subscribe(&self, user: UserId) -> Subscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.lock();
            if state.user.as_ref().is_some_and(|current| *current != user) {
                info!(instance = %self.inner.instance, user = %user, "user changed, closing previous session");
                self.close_locked(&mut state);
            }
            state.user = Some(user);
            if let Some(timer) = state.teardown_timer.take() {
                timer.cancel();
            }

            let id = state.next_listener;
            state.next_listener += 1;
            let _ = tx.send(ConnectionEvent::Status(*self.inner.status.borrow()));
            state.listeners.push(Listener { id, tx });
            id
        };

        self.connect();

        Subscription {
            connection: self.clone(),
            listener: id,
            events,
        }
    }

    fn release(&self, listener: u64) {
        let timer = {
            let mut state = self.lock();
            let before = state.listeners.len();
            state.listeners.retain(|l| l.id != listener);
            if state.listeners.len() == before || !state.listeners.is_empty() {
                return;
            }
            if let Some(previous) = state.teardown_timer.take() {
                previous.cancel();
            }
            let timer = CancellationToken::new();
            state.teardown_timer = Some(timer.clone());
            timer
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Dropped outside a runtime: nothing can fire later.
            self.teardown_due(&timer);
            return;
        };

        let grace = self.inner.ctx.config.unsubscribe_grace;
        let connection = self.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(grace) => connection.teardown_due(&timer),
            }
        });
    }

    fn teardown_due(&self, timer: &CancellationToken) {
        let mut state = self.lock();
        if timer.is_cancelled() {
            return;
        }
        state.teardown_timer = None;
        if state.listeners.is_empty() {
            info!(instance = %self.inner.instance, "no subscribers left, closing session");
            self.close_locked(&mut state);
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start a connect attempt unless one is in flight or a socket is open.
    pub fn connect(&self) {
        let generation = {
            let mut state = self.lock();
            match self.begin_attempt_locked(&mut state) {
                Some(generation) => generation,
                None => return,
            }
        };
        self.spawn_session(generation);
    }

    fn begin_attempt_locked(&self, state: &mut State) -> Option<u64> {
        if state.connecting || state.socket.is_some() {
            return None;
        }
        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        state.connecting = true;
        // A scheduled reconnect keeps reporting its attempt number.
        let reconnecting = matches!(*self.inner.status.borrow(), ConnectionStatus::Reconnecting { .. });
        if state.attempt == 0 || !reconnecting {
            self.set_status_locked(state, ConnectionStatus::Connecting);
        }
        Some(state.generation)
    }

    fn spawn_session(&self, generation: u64) {
        let connection = self.clone();
        tokio::spawn(async move { connection.run_session(generation).await });
    }

    /// Close the session for good: no reconnect, counters reset.
    pub fn close(&self) {
        let mut state = self.lock();
        self.close_locked(&mut state);
    }

    fn close_locked(&self, state: &mut State) {
        for timer in [state.reconnect_timer.take(), state.teardown_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }
        state.generation += 1;
        state.connecting = false;
        if let Some(socket) = state.socket.take() {
            let _ = socket.outbound.send(SocketCommand::Close(close_code::NORMAL));
            socket.cancel.cancel();
        }
        state.attempt = 0;
        state.user = None;
        self.set_status_locked(state, ConnectionStatus::Disconnected);
    }

    /// Transmit a raw frame. `false` (and nothing sent) unless a socket
    /// is open.
    pub fn send(&self, raw: String) -> bool {
        let state = self.lock();
        state
            .socket
            .as_ref()
            .is_some_and(|socket| socket.outbound.send(SocketCommand::Text(raw)).is_ok())
    }

    // ── Session task ─────────────────────────────────────────────────

    async fn run_session(self, generation: u64) {
        let instance = &self.inner.instance;
        let token = self.inner.ctx.tokens.access_token(instance).await;

        let url = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            let Some(token) = token else {
                warn!(instance = %instance, "no valid access token, aborting connect");
                state.connecting = false;
                self.set_status_locked(&state, ConnectionStatus::Error);
                return;
            };
            if state.listeners.is_empty() {
                debug!(instance = %instance, "subscribers gone before handshake");
                state.connecting = false;
                self.set_status_locked(&state, ConnectionStatus::Disconnected);
                return;
            }
            match self.handshake_url(token.expose_secret()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(instance = %instance, error = %e, "cannot derive socket address");
                    state.connecting = false;
                    self.set_status_locked(&state, ConnectionStatus::Error);
                    return;
                }
            }
        };

        let session = match self.inner.ctx.dialer.dial(url).await {
            Ok(session) => session,
            Err(e) => {
                warn!(instance = %instance, error = %e, "socket handshake failed");
                self.handle_close(generation, &CloseFrame::abnormal(e.to_string()));
                return;
            }
        };

        let (outbound, mut inbound) = session.into_parts();
        let cancel = CancellationToken::new();
        {
            let mut state = self.lock();
            if state.generation != generation {
                // Closed while the handshake was in flight.
                let _ = outbound.send(SocketCommand::Close(close_code::NORMAL));
                return;
            }
            state.connecting = false;
            state.socket = Some(LiveSocket {
                outbound,
                cancel: cancel.clone(),
            });
        }
        debug!(instance = %instance, "socket open, awaiting authentication");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                event = inbound.recv() => match event {
                    Some(SocketEvent::Text(text)) => self.handle_frame(generation, &text),
                    Some(SocketEvent::Closed(frame)) => {
                        self.handle_close(generation, &frame);
                        return;
                    }
                    None => {
                        self.handle_close(generation, &CloseFrame::abnormal("transport dropped"));
                        return;
                    }
                },
            }
        }
    }

    fn handshake_url(&self, token: &str) -> Result<Url, CoreError> {
        let base = self.inner.ctx.fleet.base_url(&self.inner.instance)?;
        Ok(socket_url(&base, token)?)
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                warn!(instance = %self.inner.instance, error = %e, "dropping malformed frame");
                return;
            }
        };

        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        if envelope.kind == kind::AUTHENTICATED {
            info!(instance = %self.inner.instance, "session authenticated");
            state.attempt = 0;
            self.set_status_locked(&state, ConnectionStatus::Connected);
        }
        for listener in &state.listeners {
            let _ = listener.tx.send(ConnectionEvent::Message(Arc::clone(&envelope)));
        }
    }

    fn handle_close(&self, generation: u64, frame: &CloseFrame) {
        let instance = &self.inner.instance;
        let (timer, delay) = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.connecting = false;
            if let Some(socket) = state.socket.take() {
                socket.cancel.cancel();
            }

            if state.listeners.is_empty() {
                debug!(instance = %instance, code = frame.code, "session closed with no subscribers");
                self.set_status_locked(&state, ConnectionStatus::Disconnected);
                return;
            }
            match frame.code {
                close_code::NORMAL => {
                    info!(instance = %instance, "session closed cleanly");
                    self.set_status_locked(&state, ConnectionStatus::Disconnected);
                    return;
                }
                close_code::SESSION_SUPERSEDED => {
                    warn!(instance = %instance, "session superseded by a newer login, not reconnecting");
                    self.set_status_locked(&state, ConnectionStatus::Disconnected);
                    return;
                }
                _ => {}
            }

            let delay = self.inner.ctx.config.backoff_delay(state.attempt);
            state.attempt = state.attempt.saturating_add(1);
            let attempt = state.attempt;
            warn!(
                instance = %instance,
                code = frame.code,
                reason = %frame.reason,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "session lost, scheduling reconnect"
            );
            self.set_status_locked(&state, ConnectionStatus::Reconnecting { attempt });

            let timer = CancellationToken::new();
            state.reconnect_timer = Some(timer.clone());
            (timer, delay)
        };

        let connection = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => connection.reconnect_due(&timer),
            }
        });
    }

    fn reconnect_due(&self, timer: &CancellationToken) {
        let generation = {
            let mut state = self.lock();
            if timer.is_cancelled() {
                return;
            }
            state.reconnect_timer = None;
            match self.begin_attempt_locked(&mut state) {
                Some(generation) => generation,
                None => return,
            }
        };
        debug!(instance = %self.inner.instance, "reconnecting");
        self.spawn_session(generation);
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn set_status_locked(&self, state: &State, status: ConnectionStatus) {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!(instance = %self.inner.instance, %status, "connection status changed");
            for listener in &state.listeners {
                let _ = listener.tx.send(ConnectionEvent::Status(status));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("instance", &self.inner.instance)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// A registered subscriber. Dropping it unsubscribes.
pub struct Subscription {
    connection: Connection,
    listener: u64,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Explicit form of dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connection.release(self.listener);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("instance", self.connection.instance_id())
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

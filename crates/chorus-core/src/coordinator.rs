// ── Session coordinator ──
//
// Owns every instance's Connection (through an instance registry),
// multiplexes outbound sends with a per-instance FIFO queue while
// offline, and routes inbound envelopes to the domain stores.
//
// One pump task per linked instance consumes that Connection's ordered
// event stream, so inbound handling is strictly in order per instance
// and unordered across instances.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use chorus_api::{Envelope, OutboundMessage, kind};

use crate::connection::{Connection, ConnectionContext, ConnectionEvent, Subscription};
use crate::error::CoreError;
use crate::events::InboundEvent;
use crate::media::MediaSession;
use crate::model::{ConnectionStatus, InstanceId, UserId};
use crate::registry::InstanceRegistry;
use crate::store::{DomainStores, LocalVoiceState};

/// Queue length above which each further enqueue logs a warning.
const QUEUE_WARN_THRESHOLD: usize = 256;

// ── InstanceSession ──────────────────────────────────────────────────

/// The coordinator's record for one instance.
struct InstanceSession {
    connection: Connection,
    outbound: Mutex<VecDeque<OutboundMessage>>,
    link: Mutex<Option<Link>>,
}

/// A live subscription and the task pumping it.
struct Link {
    user: UserId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InstanceSession {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            outbound: Mutex::new(VecDeque::new()),
            link: Mutex::new(None),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<OutboundMessage>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── SessionCoordinator ───────────────────────────────────────────────

/// Connection fan-in/fan-out across all instances. Cheaply cloneable.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    ctx: ConnectionContext,
    stores: Arc<DomainStores>,
    sessions: InstanceRegistry<InstanceSession>,
    media: Option<Arc<dyn MediaSession>>,
    /// Serializes `switch_active`.
    active: tokio::sync::Mutex<Option<InstanceId>>,
}

impl SessionCoordinator {
    pub fn new(
        ctx: ConnectionContext,
        stores: Arc<DomainStores>,
        media: Option<Arc<dyn MediaSession>>,
    ) -> Self {
        let factory_ctx = ctx.clone();
        let sessions = InstanceRegistry::new(move |id: &InstanceId| {
            InstanceSession::new(Connection::new(id.clone(), factory_ctx.clone()))
        });
        Self {
            inner: Arc::new(CoordinatorInner {
                ctx,
                stores,
                sessions,
                media,
                active: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn stores(&self) -> &Arc<DomainStores> {
        &self.inner.stores
    }

    /// The Connection for `id`, if a record exists.
    pub fn connection(&self, id: &InstanceId) -> Option<Connection> {
        self.inner.sessions.peek(id).map(|s| s.connection.clone())
    }

    pub fn status(&self, id: &InstanceId) -> ConnectionStatus {
        self.inner.ctx.fleet.status(id)
    }

    /// Outbound items waiting for `id` to come online.
    pub fn queued(&self, id: &InstanceId) -> usize {
        self.inner.sessions.peek(id).map_or(0, |s| s.queue().len())
    }

    pub fn is_linked(&self, id: &InstanceId) -> bool {
        self.inner
            .sessions
            .peek(id)
            .is_some_and(|s| s.link().is_some())
    }

    pub async fn active(&self) -> Option<InstanceId> {
        self.inner.active.lock().await.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Link `id` for `user`. A no-op if already linked for the same user
    /// and that session is live; an ended session is retried.
    pub fn connect(&self, id: &InstanceId, user: &UserId) -> Result<(), CoreError> {
        if !self.inner.ctx.fleet.contains(id) {
            return Err(CoreError::UnknownInstance { id: id.clone() });
        }

        let session = self.inner.sessions.get(id);
        let mut link = session.link();
        if let Some(existing) = link.as_ref() {
            if existing.user == *user {
                // A superseded close or an aborted token lookup leaves the
                // link in place with nothing in flight; start over.
                if !session.connection.status().is_live() {
                    info!(instance = %id, status = %session.connection.status(), "retrying ended session");
                    session.connection.connect();
                }
                return Ok(());
            }
            info!(instance = %id, from = %existing.user, to = %user, "relinking for a different user");
        }

        // Status reaches the fleet only through the pump, in session order.
        let subscription = session.connection.subscribe(user.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(
            Arc::clone(&self.inner),
            id.clone(),
            Arc::clone(&session),
            subscription,
            cancel.clone(),
        ));

        // The previous pump's subscription is released after the new one
        // registered, so the refcount never touches zero.
        if let Some(previous) = link.replace(Link {
            user: user.clone(),
            cancel,
            task,
        }) {
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Unlink and close `id`, ending any media call hosted there, and
    /// destroy its record including queued sends.
    pub async fn disconnect(&self, id: &InstanceId) {
        if let Some(session) = self.inner.sessions.peek(id) {
            let link = session.link().take();
            if let Some(link) = link {
                link.cancel.cancel();
                if let Err(e) = link.task.await {
                    warn!(instance = %id, error = %e, "session pump ended abnormally");
                }
            }
            session.connection.close();
            let dropped = session.queue().len();
            if dropped > 0 {
                debug!(instance = %id, dropped, "discarding queued sends");
            }
        }

        if let Some(media) = &self.inner.media {
            if media.hosted_on().as_ref() == Some(id) {
                info!(instance = %id, "ending media session hosted on disconnected instance");
                media.leave().await;
                self.inner.stores.voice(id).set_local_channel(None);
            }
        }

        self.inner.ctx.fleet.set_status(id, ConnectionStatus::Disconnected);
        self.inner.stores.presence(id).set_connected(false);
        self.inner.sessions.clear(id);
        info!(instance = %id, "disconnected");
    }

    /// Disconnect the previously active instance, then connect `id`.
    /// Concurrent switches run one after another.
    pub async fn switch_active(&self, id: &InstanceId, user: &UserId) -> Result<(), CoreError> {
        let mut active = self.inner.active.lock().await;
        if let Some(previous) = active.take() {
            if previous != *id {
                self.disconnect(&previous).await;
            }
        }
        self.connect(id, user)?;
        *active = Some(id.clone());
        Ok(())
    }

    /// Disconnect everything (shutdown or full logout).
    pub async fn disconnect_all(&self) {
        let mut active = self.inner.active.lock().await;
        for id in self.inner.sessions.ids() {
            self.disconnect(&id).await;
        }
        *active = None;
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Send now if connected with nothing queued ahead; otherwise queue.
    pub fn send(&self, id: &InstanceId, kind: &str, payload: Option<Value>) -> Result<(), CoreError> {
        if !self.inner.ctx.fleet.contains(id) {
            return Err(CoreError::UnknownInstance { id: id.clone() });
        }
        let message = OutboundMessage::new(kind, payload);
        let session = self.inner.sessions.get(id);

        let mut queue = session.queue();
        if queue.is_empty() && session.connection.status().is_connected() {
            let frame = message.to_frame()?;
            if session.connection.send(frame) {
                trace!(instance = %id, kind, "sent");
                return Ok(());
            }
        }

        queue.push_back(message);
        let queued = queue.len();
        if queued > QUEUE_WARN_THRESHOLD {
            warn!(instance = %id, queued, "outbound queue is growing while offline");
        } else {
            debug!(instance = %id, kind, queued, "queued until connected");
        }
        Ok(())
    }

    pub fn start_typing(&self, id: &InstanceId, channel_id: &str) -> Result<(), CoreError> {
        self.send(id, kind::TYPING_START, Some(json!({ "channel_id": channel_id })))
    }

    pub fn stop_typing(&self, id: &InstanceId, channel_id: &str) -> Result<(), CoreError> {
        self.send(id, kind::TYPING_STOP, Some(json!({ "channel_id": channel_id })))
    }

    /// Update this client's mute/deafen state and announce it.
    pub fn set_voice_state(
        &self,
        id: &InstanceId,
        muted: bool,
        deafened: bool,
    ) -> Result<LocalVoiceState, CoreError> {
        if !self.inner.ctx.fleet.contains(id) {
            return Err(CoreError::UnknownInstance { id: id.clone() });
        }
        let local = self.inner.stores.voice(id).set_local(muted, deafened);
        self.send(
            id,
            kind::VOICE_STATE,
            Some(json!({
                "channel_id": local.channel_id,
                "muted": local.muted,
                "deafened": local.deafened,
            })),
        )?;
        Ok(local)
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("sessions", &self.inner.sessions.ids())
            .finish_non_exhaustive()
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

async fn pump(
    inner: Arc<CoordinatorInner>,
    id: InstanceId,
    session: Arc<InstanceSession>,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(ConnectionEvent::Status(status)) => inner.on_status(&id, &session, status),
                Some(ConnectionEvent::Message(envelope)) => inner.dispatch(&id, &session, &envelope),
                None => break,
            },
        }
    }
    debug!(instance = %id, "session pump stopped");
}

impl CoordinatorInner {
    fn on_status(&self, id: &InstanceId, session: &InstanceSession, status: ConnectionStatus) {
        self.ctx.fleet.set_status(id, status);
        self.stores.presence(id).set_connected(status.is_connected());
        if status.is_connected() {
            flush(id, session);
        }
    }

    /// Fixed event-type → action table.
    fn dispatch(&self, id: &InstanceId, session: &InstanceSession, envelope: &Envelope) {
        let event = match InboundEvent::decode(envelope) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(instance = %id, kind = %envelope.kind, "ignoring unhandled event");
                return;
            }
            Err(e) => {
                warn!(instance = %id, kind = %envelope.kind, error = %e, "dropping undecodable payload");
                return;
            }
        };

        match event {
            InboundEvent::Authenticated => {}
            InboundEvent::Ping => match OutboundMessage::new(kind::PONG, None).to_frame() {
                Ok(frame) => {
                    if !session.connection.send(frame) {
                        debug!(instance = %id, "pong dropped, socket closed");
                    }
                }
                Err(e) => warn!(instance = %id, error = %e, "failed to encode pong"),
            },
            InboundEvent::Presence(update) => self.stores.presence(id).apply_update(&update),
            InboundEvent::TypingStart(typing) => self.stores.presence(id).typing_started(&typing),
            InboundEvent::TypingStop(typing) => self.stores.presence(id).typing_stopped(&typing),
            InboundEvent::MessageCreated(message) => self.stores.chat(id).apply_created(message),
            InboundEvent::MessageUpdated(message) => {
                self.stores.chat(id).apply_updated(message);
            }
            InboundEvent::MessageDeleted(deleted) => {
                self.stores
                    .chat(id)
                    .apply_deleted(&deleted.channel_id, &deleted.message_id);
            }
            InboundEvent::ReactionAdded(reaction) => {
                self.stores.chat(id).apply_reaction_added(&reaction);
            }
            InboundEvent::ReactionRemoved(reaction) => {
                self.stores.chat(id).apply_reaction_removed(&reaction);
            }
            InboundEvent::ThreadUpdated(thread) => {
                self.stores.chat(id).apply_thread_updated(&thread);
            }
            InboundEvent::VoiceState(state) => self.stores.voice(id).apply_state(&state),
            InboundEvent::VoiceJoined(member) => self.stores.voice(id).joined(&member),
            InboundEvent::VoiceLeft(member) => self.stores.voice(id).left(&member),
        }
    }
}

/// Replay the queue in order. The queue is taken before the first send
/// and held locked throughout, so a concurrent `send` can't overtake it;
/// items that fail to transmit go back in their original order.
fn flush(id: &InstanceId, session: &InstanceSession) {
    let mut queue = session.queue();
    if queue.is_empty() {
        return;
    }
    let pending = std::mem::take(&mut *queue);
    let total = pending.len();
    let mut items = pending.into_iter();

    while let Some(message) = items.next() {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(instance = %id, kind = %message.kind, error = %e, "dropping unencodable message");
                continue;
            }
        };
        if !session.connection.send(frame) {
            queue.push_back(message);
            queue.extend(items);
            warn!(instance = %id, remaining = queue.len(), "socket closed mid-flush, re-queued");
            return;
        }
    }
    debug!(instance = %id, sent = total, "flushed outbound queue");
}

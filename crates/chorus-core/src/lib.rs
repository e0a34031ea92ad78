//! Session engine between `chorus-api` and consumers (CLI, embedders).
//!
//! - **[`Connection`]**: one instance's live socket. Token lookup, handshake,
//!   backoff reconnect (`1s, 2s, 5s, 10s, 30s`), close-code policy, and
//!   reference-counted teardown with a short grace window.
//!
//! - **[`SessionCoordinator`]**: owns every instance's Connection, queues
//!   outbound envelopes while offline and replays them once connected,
//!   and routes inbound events to the domain stores.
//!
//! - **[`ChatStore`]**: per-instance chat state with optimistic sends
//!   reconciled by correlation token.
//!
//! - **[`InstanceRegistry`]**: lazily-built per-instance containers that
//!   keep instances isolated from each other.
//!
//! - **[`Client`]**: facade wiring all of the above.

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fleet;
pub mod media;
pub mod messaging;
pub mod model;
pub mod registry;
pub mod rest;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{CredentialStore, Credentials, MemoryCredentialStore, RestRefresher, TokenProvider, TokenRefresher};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, DEFAULT_BACKOFF, SessionConfig, backoff_delay};
pub use connection::{Connection, ConnectionContext, ConnectionEvent, Subscription};
pub use coordinator::SessionCoordinator;
pub use error::CoreError;
pub use events::{InboundEvent, PresenceStatus};
pub use fleet::Fleet;
pub use media::MediaSession;
pub use messaging::{HISTORY_PAGE_SIZE, Messaging};
pub use model::{ConnectionStatus, Instance, InstanceId, UserId};
pub use registry::InstanceRegistry;
pub use store::{ChatRecord, ChatStore, Delivery, DomainStores, PresenceStore, VoiceStore};

// Wire types consumers need without depending on chorus-api directly.
pub use chorus_api::{Envelope, Message, Reaction, TlsMode};

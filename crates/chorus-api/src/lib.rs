// chorus-api: Wire protocol, REST client, and WebSocket transport for Chorus instances

pub mod envelope;
pub mod error;
pub mod models;
pub mod rest;
pub mod socket;
pub mod transport;

pub use envelope::{Envelope, OutboundMessage, close_code, kind};
pub use error::Error;
pub use models::{Message, Reaction, TokenPair};
pub use rest::RestClient;
pub use socket::{CloseFrame, Dialer, SocketCommand, SocketEvent, SocketPeer, SocketSession, WsDialer};
pub use transport::{TlsMode, TransportConfig};

//! WebSocket session transport.
//!
//! A [`Dialer`] opens one authenticated session to an instance and hands
//! back a [`SocketSession`]: a pair of channels carrying text frames in
//! both directions plus a single terminal [`SocketEvent::Closed`]. The
//! production [`WsDialer`] spawns a pump task bridging a
//! `tokio-tungstenite` stream to those channels; [`SocketSession::pair`]
//! builds the same shape in memory for tests and embedders.
//!
//! Reconnect policy lives above this layer: a session ends
//! exactly once, and the caller decides what to do about it.
//!
//! # Example
//!
//! ```rust,ignore
//! use chorus_api::socket::{socket_url, Dialer, SocketEvent, WsDialer};
//!
//! let url = socket_url(&"https://chat.example.com".parse()?, "access-token")?;
//! let (outbound, mut inbound) = WsDialer.dial(url).await?.into_parts();
//!
//! while let Some(event) = inbound.recv().await {
//!     match event {
//!         SocketEvent::Text(text) => println!("{text}"),
//!         SocketEvent::Closed(frame) => { println!("closed: {}", frame.code); break; }
//!     }
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use url::Url;

use crate::envelope::close_code;
use crate::error::Error;

// ── Session types ────────────────────────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A transport failure with no close frame from the server.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(close_code::ABNORMAL, reason)
    }
}

/// Something the remote side did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    /// Terminal. No further events follow.
    Closed(CloseFrame),
}

/// Something the local side wants done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Text(String),
    Close(u16),
}

/// Local end of an open session.
#[derive(Debug)]
pub struct SocketSession {
    outbound: mpsc::UnboundedSender<SocketCommand>,
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Remote end of an in-memory session.
#[derive(Debug)]
pub struct SocketPeer {
    pub events: mpsc::UnboundedSender<SocketEvent>,
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
}

impl SocketSession {
    /// Build a connected in-memory session and its remote peer.
    pub fn pair() -> (Self, SocketPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: command_tx,
                inbound: event_rx,
            },
            SocketPeer {
                events: event_tx,
                commands: command_rx,
            },
        )
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<SocketCommand>,
        mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        (self.outbound, self.inbound)
    }
}

impl SocketPeer {
    /// Deliver a text frame to the local side.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(SocketEvent::Text(text.into())).is_ok()
    }

    /// End the session from the remote side.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.events
            .send(SocketEvent::Closed(CloseFrame::new(code, reason)))
            .is_ok()
    }
}

// ── Dialer ───────────────────────────────────────────────────────────

/// Opens sessions. Object-safe so connections can hold `Arc<dyn Dialer>`.
pub trait Dialer: Send + Sync {
    fn dial(&self, url: Url) -> BoxFuture<'static, Result<SocketSession, Error>>;
}

/// Production dialer backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&self, url: Url) -> BoxFuture<'static, Result<SocketSession, Error>> {
        Box::pin(connect(url))
    }
}

/// Derive the session URL for an instance: `{base}/ws?token=...` with the
/// scheme switched to `ws`/`wss`.
pub fn socket_url(base: &Url, token: &str) -> Result<Url, Error> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot derive socket URL from {base}")))?;
    url.path_segments_mut()
        .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push("ws");
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect(url: Url) -> Result<SocketSession, Error> {
    // The query string carries the bearer token -- log the host only.
    tracing::info!(host = url.host_str().unwrap_or(""), "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!("WebSocket transport open");

    let (session, peer) = SocketSession::pair();
    tokio::spawn(pump(ws_stream, peer));
    Ok(session)
}

/// Bridge the socket to the session channels until either side ends it.
async fn pump<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>, peer: SocketPeer)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let SocketPeer {
        events,
        mut commands,
    } = peer;
    let (mut write, mut read) = ws_stream.split();

    let close = loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(SocketCommand::Text(text)) => {
                    if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                        break CloseFrame::abnormal(e.to_string());
                    }
                }
                Some(SocketCommand::Close(code)) => {
                    let frame = tungstenite::protocol::CloseFrame {
                        code: code.into(),
                        reason: String::new().into(),
                    };
                    if let Err(e) = write.send(tungstenite::Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "WebSocket close frame not delivered");
                    }
                    return;
                }
                // Local side dropped the session without closing.
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite queues the pong; it is flushed on the next read/write
                    tracing::trace!("WebSocket ping");
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    break frame.map_or_else(
                        || CloseFrame::new(1005, "no status"),
                        |cf| CloseFrame::new(u16::from(cf.code), cf.reason.as_str()),
                    );
                }
                Some(Ok(_)) => {
                    // Binary, Pong, Frame -- ignore
                }
                Some(Err(e)) => break CloseFrame::abnormal(e.to_string()),
                None => break CloseFrame::abnormal("stream ended"),
            }
        }
    };

    tracing::info!(code = close.code, reason = %close.reason, "WebSocket session ended");
    let _ = events.send(SocketEvent::Closed(close));
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme_and_appends_token() {
        let base = Url::parse("https://chat.example.com").unwrap();
        let url = socket_url(&base, "abc").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/ws?token=abc");
    }

    #[test]
    fn socket_url_plain_http_becomes_ws() {
        let base = Url::parse("http://127.0.0.1:8080/chorus/").unwrap();
        let url = socket_url(&base, "a b").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/chorus/ws");
        assert_eq!(url.query(), Some("token=a+b"));
    }

    #[tokio::test]
    async fn pair_delivers_both_directions() {
        let (session, mut peer) = SocketSession::pair();
        let (outbound, mut inbound) = session.into_parts();

        assert!(peer.send_text("hello"));
        assert_eq!(inbound.recv().await, Some(SocketEvent::Text("hello".into())));

        outbound.send(SocketCommand::Text("pong".into())).unwrap();
        assert_eq!(peer.commands.recv().await, Some(SocketCommand::Text("pong".into())));

        assert!(peer.close(close_code::SESSION_SUPERSEDED, "replaced"));
        assert_eq!(
            inbound.recv().await,
            Some(SocketEvent::Closed(CloseFrame::new(4000, "replaced")))
        );
    }

    #[test]
    fn abnormal_close_uses_1006() {
        assert_eq!(CloseFrame::abnormal("boom").code, close_code::ABNORMAL);
    }
}

use thiserror::Error;

/// Top-level error type for the `chorus-api` crate.
///
/// Covers every failure mode across the REST and WebSocket surfaces.
/// `chorus-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The instance rejected the bearer token (expired, revoked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS or HTTP client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success response from the instance's REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the access token has expired
    /// and a refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } => *status == 401,
            _ => false,
        }
    }
}

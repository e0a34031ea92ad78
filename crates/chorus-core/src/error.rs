// ── Core error types ──
//
// User-facing errors from chorus-core. These are NOT wire-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<chorus_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

use crate::model::InstanceId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Fleet errors ─────────────────────────────────────────────────
    #[error("Unknown instance: {id}")]
    UnknownInstance { id: InstanceId },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to instance at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("No valid access token for instance {id}")]
    NotAuthenticated { id: InstanceId },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<chorus_api::Error> for CoreError {
    fn from(err: chorus_api::Error) -> Self {
        match err {
            chorus_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            chorus_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            chorus_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            chorus_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            chorus_api::Error::Api { status: 404, message } => CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: message,
            },
            chorus_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            chorus_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            chorus_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn api_404_becomes_not_found() {
        let err: CoreError = chorus_api::Error::Api {
            status: 404,
            message: "no such message".into(),
        }
        .into();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn authentication_is_preserved() {
        let err: CoreError = chorus_api::Error::Authentication {
            message: "expired".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { message } if message == "expired"));
    }
}

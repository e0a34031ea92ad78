// REST API client
//
// Wraps `reqwest::Client` with instance-scoped URL construction, bearer
// authentication, and error-body unwrapping. One `RestClient` talks to one
// instance; clients for different instances can share the same underlying
// `reqwest::Client` (and its connection pool).

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    ApiErrorBody, EditMessageRequest, Message, RefreshRequest, SendMessageRequest, TokenPair,
};
use crate::transport::TransportConfig;

/// HTTP client for one instance's REST API (`{base}/api/v1/...`).
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The instance base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Build `{base}/api/v1/{segments...}`, percent-encoding each segment.
    fn api_url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// List a page of messages, newest last.
    pub async fn list_messages(
        &self,
        token: &SecretString,
        channel_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, Error> {
        let mut url = self.api_url(&["channels", channel_id, "messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(before) = before {
                query.append_pair("before", before);
            }
        }
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        parse_json(resp).await
    }

    /// Send a message. `nonce` is echoed back on the created record and in
    /// the matching `message.created` event.
    pub async fn send_message(
        &self,
        token: &SecretString,
        channel_id: &str,
        content: &str,
        nonce: &str,
    ) -> Result<Message, Error> {
        let url = self.api_url(&["channels", channel_id, "messages"])?;
        self.send_json(reqwest::Method::POST, url, token, &SendMessageRequest { content, nonce })
            .await
    }

    /// Edit a message's content.
    pub async fn edit_message(
        &self,
        token: &SecretString,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message, Error> {
        let url = self.api_url(&["channels", channel_id, "messages", message_id])?;
        self.send_json(reqwest::Method::PATCH, url, token, &EditMessageRequest { content })
            .await
    }

    /// Delete a message.
    pub async fn delete_message(
        &self,
        token: &SecretString,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), Error> {
        let url = self.api_url(&["channels", channel_id, "messages", message_id])?;
        self.send_empty(reqwest::Method::DELETE, url, token).await
    }

    // ── Reactions ────────────────────────────────────────────────────

    /// Add the caller's reaction.
    pub async fn add_reaction(
        &self,
        token: &SecretString,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), Error> {
        let url = self.api_url(&["channels", channel_id, "messages", message_id, "reactions", emoji])?;
        self.send_empty(reqwest::Method::PUT, url, token).await
    }

    /// Remove the caller's reaction.
    pub async fn remove_reaction(
        &self,
        token: &SecretString,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), Error> {
        let url = self.api_url(&["channels", channel_id, "messages", message_id, "reactions", emoji])?;
        self.send_empty(reqwest::Method::DELETE, url, token).await
    }

    // ── Auth ─────────────────────────────────────────────────────────

    /// Exchange a refresh token for a new token pair. Unauthenticated.
    pub async fn refresh_token(&self, refresh_token: &SecretString) -> Result<TokenPair, Error> {
        let url = self.api_url(&["auth", "refresh"])?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await?;
        parse_json(resp).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        token: &SecretString,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("{} {}", method, url);

        let resp = self
            .http
            .request(method, url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;
        parse_json(resp).await
    }

    async fn send_empty(
        &self,
        method: reqwest::Method,
        url: Url,
        token: &SecretString,
    ) -> Result<(), Error> {
        debug!("{} {}", method, url);

        let resp = self
            .http
            .request(method, url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        check_status(resp).await.map(drop)
    }
}

// ── Response parsing ─────────────────────────────────────────────────

/// Map non-success statuses to errors, returning the body text otherwise.
async fn check_status(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "access token expired or invalid".into(),
        });
    }

    let body = resp.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| body.clone());
        return Err(Error::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = check_status(resp).await?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> RestClient {
        RestClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn api_url_appends_versioned_prefix() {
        let url = client("https://chat.example.com").api_url(&["channels", "c1", "messages"]).unwrap();
        assert_eq!(url.as_str(), "https://chat.example.com/api/v1/channels/c1/messages");
    }

    #[test]
    fn api_url_keeps_base_path() {
        let url = client("https://example.com/chorus/").api_url(&["auth", "refresh"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/chorus/api/v1/auth/refresh");
    }

    #[test]
    fn api_url_encodes_emoji_segment() {
        let url = client("https://example.com")
            .api_url(&["channels", "c1", "messages", "m1", "reactions", "👍"])
            .unwrap();
        assert_eq!(url.path(), "/api/v1/channels/c1/messages/m1/reactions/%F0%9F%91%8D");
    }
}

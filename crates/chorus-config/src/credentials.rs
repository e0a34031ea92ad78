// OS keyring credential storage.
//
// One keyring entry per instance under the `chorus` service, holding the
// token pair as JSON. Secrets only leave `SecretString` at the moment
// they're written to or read from the keyring.

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chorus_core::{CoreError, CredentialStore, Credentials, InstanceId};

/// Keyring service name shared by all entries.
pub const KEYRING_SERVICE: &str = "chorus";

/// The JSON shape stored in each keyring entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Credentials> for StoredCredentials {
    fn from(credentials: &Credentials) -> Self {
        Self {
            access_token: credentials.access_token.expose_secret().to_owned(),
            refresh_token: credentials.refresh_token.expose_secret().to_owned(),
            expires_at: credentials.expires_at,
        }
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self::new(stored.access_token, stored.refresh_token, stored.expires_at)
    }
}

/// [`CredentialStore`] backed by the platform keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, id: &InstanceId) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(&self.service, &format!("{id}/tokens")).map_err(keyring_error)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, id: &InstanceId) -> Result<Option<Credentials>, CoreError> {
        let raw = match self.entry(id)?.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(keyring_error(e)),
        };
        let stored: StoredCredentials =
            serde_json::from_str(&raw).map_err(|e| CoreError::Config {
                message: format!("corrupt keyring entry for '{id}': {e}"),
            })?;
        Ok(Some(stored.into()))
    }

    fn put(&self, id: &InstanceId, credentials: &Credentials) -> Result<(), CoreError> {
        let raw = serde_json::to_string(&StoredCredentials::from(credentials))?;
        self.entry(id)?.set_password(&raw).map_err(keyring_error)?;
        debug!(instance = %id, "stored credentials in keyring");
        Ok(())
    }

    fn remove(&self, id: &InstanceId) -> Result<(), CoreError> {
        match self.entry(id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn keyring_error(err: keyring::Error) -> CoreError {
    CoreError::Config {
        message: format!("keyring: {err}"),
    }
}

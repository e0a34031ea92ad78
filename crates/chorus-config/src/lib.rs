//! Configuration for the Chorus CLI and embedders.
//!
//! A TOML file of named instances plus session tuning, layered with
//! `CHORUS_*` environment overrides (nested keys split on `__`, e.g.
//! `CHORUS_DEFAULTS__TIMEOUT=10`), translated into
//! `chorus_core::ClientConfig` and `chorus_core::Instance` values.
//! Credentials live in the OS keyring, see [`KeyringCredentialStore`].

mod credentials;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chorus_core::{ClientConfig, Instance, SessionConfig, TlsMode};

pub use credentials::{KEYRING_SERVICE, KeyringCredentialStore, StoredCredentials};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no instance named '{name}' in config")]
    UnknownInstance { name: String },

    #[error("no instance given and no default_instance configured")]
    NoInstance,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Instance used when a command doesn't name one.
    pub default_instance: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub session: SessionSettings,

    /// Named instances, in file order.
    #[serde(default)]
    pub instances: IndexMap<String, InstanceProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// User id to connect as when the instance doesn't set one.
    pub user: Option<String>,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user: None,
            insecure: false,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Connection lifecycle tuning, in file-friendly units.
#[derive(Debug, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_backoff")]
    pub backoff_secs: Vec<u64>,

    #[serde(default = "default_grace")]
    pub unsubscribe_grace_ms: u64,

    #[serde(default = "default_skew")]
    pub token_skew_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
            unsubscribe_grace_ms: default_grace(),
            token_skew_secs: default_skew(),
        }
    }
}

fn default_backoff() -> Vec<u64> {
    chorus_core::DEFAULT_BACKOFF.iter().map(Duration::as_secs).collect()
}
fn default_grace() -> u64 {
    100
}
fn default_skew() -> u64 {
    30
}

/// A named chat instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceProfile {
    /// Base URL, e.g. "https://chat.example.com".
    pub url: String,

    /// Display name. Falls back to the instance id.
    pub name: Option<String>,

    /// User id to connect as.
    pub user: Option<String>,

    /// Override TLS verification for this instance.
    pub insecure: Option<bool>,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
}

impl InstanceProfile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            user: None,
            insecure: None,
            ca_cert: None,
        }
    }

    /// Validate and convert into the engine's instance record.
    pub fn to_instance(&self, id: &str) -> Result<Instance, ConfigError> {
        let url: url::Url = self.url.parse().map_err(|e| ConfigError::Validation {
            field: format!("instances.{id}.url"),
            reason: format!("invalid URL '{}': {e}", self.url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: format!("instances.{id}.url"),
                reason: format!("expected http or https, got '{}'", url.scheme()),
            });
        }
        let name = self.name.clone().unwrap_or_else(|| id.to_owned());
        Ok(Instance::new(id, url, name))
    }
}

// ── Derived runtime config ──────────────────────────────────────────

impl Config {
    /// Session and HTTP settings for `chorus_core::Client`.
    ///
    /// TLS comes from `defaults.insecure`; per-instance overrides apply
    /// through [`Config::client_config_for`].
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let session = self.session.to_session_config()?;
        let tls = if self.defaults.insecure {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        };
        Ok(ClientConfig {
            session,
            timeout: Duration::from_secs(self.defaults.timeout),
            tls,
            ..ClientConfig::default()
        })
    }

    /// Like [`Config::client_config`], with `name`'s TLS overrides.
    pub fn client_config_for(&self, name: &str) -> Result<ClientConfig, ConfigError> {
        let profile = self.instance(name)?;
        let mut config = self.client_config()?;
        if let Some(ref ca) = profile.ca_cert {
            config.tls = TlsMode::CustomCa(ca.clone());
        }
        match profile.insecure {
            Some(true) => config.tls = TlsMode::DangerAcceptInvalid,
            Some(false) if config.tls == TlsMode::DangerAcceptInvalid => config.tls = TlsMode::System,
            _ => {}
        }
        Ok(config)
    }

    pub fn instance(&self, name: &str) -> Result<&InstanceProfile, ConfigError> {
        self.instances
            .get(name)
            .ok_or_else(|| ConfigError::UnknownInstance { name: name.into() })
    }

    /// Pick the named instance, or the configured default.
    pub fn resolve_instance<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a InstanceProfile), ConfigError> {
        let name = name
            .or(self.default_instance.as_deref())
            .ok_or(ConfigError::NoInstance)?;
        Ok((name, self.instance(name)?))
    }

    /// Every configured instance, validated, in file order.
    pub fn to_instances(&self) -> Result<Vec<Instance>, ConfigError> {
        self.instances
            .iter()
            .map(|(id, profile)| profile.to_instance(id))
            .collect()
    }

    /// The user to connect to `name` as.
    pub fn user_for(&self, name: &str) -> Option<&str> {
        self.instances
            .get(name)
            .and_then(|p| p.user.as_deref())
            .or(self.defaults.user.as_deref())
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.backoff_secs.is_empty() {
            return Err(ConfigError::Validation {
                field: "session.backoff_secs".into(),
                reason: "must list at least one delay".into(),
            });
        }
        Ok(SessionConfig {
            backoff: self
                .backoff_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            unsubscribe_grace: Duration::from_millis(self.unsubscribe_grace_ms),
            token_skew: Duration::from_secs(self.token_skew_secs),
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "chorus", "chorus").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("chorus");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered over defaults, then `CHORUS_*` env vars.
/// A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CHORUS_").split("__"));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), instances = config.instances.len(), "loaded config");
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

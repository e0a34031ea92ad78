//! Subcommand handlers and the config plumbing they share.

pub mod instances;
pub mod listen;
pub mod login;
pub mod send;

use std::path::PathBuf;
use std::sync::Arc;

use chorus_config::{Config, ConfigError, InstanceProfile, KeyringCredentialStore};
use chorus_core::{Client, InstanceId, UserId};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the config from `--config` or the platform default.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => chorus_config::load_config_from(path)?,
        None => chorus_config::load_config()?,
    };
    Ok(cfg)
}

/// Write the config back where it was loaded from.
pub fn save(global: &GlobalOpts, cfg: &Config) -> Result<PathBuf, CliError> {
    let path = match &global.config {
        Some(path) => {
            chorus_config::save_config_to(cfg, path)?;
            path.clone()
        }
        None => chorus_config::save_config(cfg)?,
    };
    Ok(path)
}

/// Named instance, or the configured default.
pub fn resolve<'a>(
    cfg: &'a Config,
    name: Option<&'a str>,
) -> Result<(&'a str, &'a InstanceProfile), CliError> {
    cfg.resolve_instance(name).map_err(|e| match e {
        ConfigError::UnknownInstance { name } => CliError::UnknownInstance {
            name,
            available: available(cfg),
        },
        other => other.into(),
    })
}

fn available(cfg: &Config) -> String {
    if cfg.instances.is_empty() {
        "(none)".into()
    } else {
        cfg.instances.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

pub fn resolve_user(cfg: &Config, name: &str, flag: Option<&str>) -> Result<UserId, CliError> {
    flag.or_else(|| cfg.user_for(name))
        .map(UserId::new)
        .ok_or_else(|| CliError::NoUser {
            instance: name.into(),
        })
}

/// A keyring-backed client with `name` registered.
pub fn client_for(cfg: &Config, name: &str, profile: &InstanceProfile) -> Result<(Client, InstanceId), CliError> {
    let instance = profile.to_instance(name)?;
    let id = instance.id.clone();
    let client = Client::new(
        cfg.client_config_for(name)?,
        Arc::new(KeyringCredentialStore::default()),
    );
    client.add_instance(instance);
    Ok((client, id))
}

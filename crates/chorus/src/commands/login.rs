use chrono::Utc;

use chorus_config::KeyringCredentialStore;
use chorus_core::{CredentialStore, Credentials, InstanceId};

use crate::cli::{GlobalOpts, LoginArgs, LogoutArgs};
use crate::commands;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = commands::load(global)?;
    let (name, _) = commands::resolve(&cfg, args.instance.as_deref())?;

    let access = token_or_prompt(args.access_token.as_deref(), "Access token: ")?;
    let refresh = token_or_prompt(args.refresh_token.as_deref(), "Refresh token: ")?;
    let lifetime = chrono::Duration::from_std(args.expires_in).map_err(|e| CliError::Validation {
        field: "--expires-in".into(),
        reason: e.to_string(),
    })?;

    let credentials = Credentials::new(access, refresh, Utc::now() + lifetime);
    KeyringCredentialStore::default().put(&InstanceId::new(name), &credentials)?;
    tracing::info!(instance = name, expires_at = %credentials.expires_at, "stored credentials");

    output::print_output(&format!("Logged in to '{name}'"), global.quiet);
    Ok(())
}

pub fn logout(args: &LogoutArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = commands::load(global)?;
    let (name, _) = commands::resolve(&cfg, args.instance.as_deref())?;
    KeyringCredentialStore::default().remove(&InstanceId::new(name))?;
    output::print_output(&format!("Logged out of '{name}'"), global.quiet);
    Ok(())
}

fn token_or_prompt(flag: Option<&str>, prompt: &str) -> Result<String, CliError> {
    let token = match flag {
        Some(token) => token.to_owned(),
        None => rpassword::prompt_password(prompt)?,
    };
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: prompt.trim_end_matches(": ").to_lowercase(),
            reason: "must not be empty".into(),
        });
    }
    Ok(token)
}

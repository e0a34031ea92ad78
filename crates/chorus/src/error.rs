//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use chorus_config::ConfigError;
use chorus_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach {url}")]
    #[diagnostic(
        code(chorus::connection_failed),
        help("Check that the instance is running and the URL is right.")
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(chorus::auth_failed),
        help("Tokens may have been revoked. Run: chorus login {instance}")
    )]
    AuthFailed { instance: String, message: String },

    #[error("Not logged in to '{instance}'")]
    #[diagnostic(
        code(chorus::not_logged_in),
        help("Run: chorus login {instance}")
    )]
    NotLoggedIn { instance: String },

    #[error("No user configured for '{instance}'")]
    #[diagnostic(
        code(chorus::no_user),
        help("Pass --user, or set `user` under [instances.{instance}] or [defaults].")
    )]
    NoUser { instance: String },

    // ── Instances ────────────────────────────────────────────────────

    #[error("Instance '{name}' not found in configuration")]
    #[diagnostic(
        code(chorus::unknown_instance),
        help(
            "Available instances: {available}\n\
             Add one with: chorus instances add <id> <url>"
        )
    )]
    UnknownInstance { name: String, available: String },

    #[error("No instance given")]
    #[diagnostic(
        code(chorus::no_instance),
        help("Name an instance, or set `default_instance` in the config file.")
    )]
    NoInstance,

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(chorus::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    #[diagnostic(code(chorus::api_error))]
    ApiError { status: Option<u16>, message: String },

    // ── Validation / configuration ───────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(chorus::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(chorus::config),
        help("Check the config file, or pass a different one with --config.")
    )]
    Config(Box<ConfigError>),

    #[error("{0}")]
    #[diagnostic(code(chorus::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(chorus::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NotLoggedIn { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::UnknownInstance { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoInstance | Self::NoUser { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError ───────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownInstance { name } => CliError::UnknownInstance {
                name,
                available: "(see `chorus instances`)".into(),
            },
            ConfigError::NoInstance => CliError::NoInstance,
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError ─────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownInstance { id } => CliError::UnknownInstance {
                name: id.to_string(),
                available: "(see `chorus instances`)".into(),
            },
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },
            CoreError::NotAuthenticated { id } => CliError::NotLoggedIn {
                instance: id.to_string(),
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                instance: "<instance>".into(),
                message,
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type,
                identifier,
            },
            CoreError::Api { message, status } => CliError::ApiError { status, message },
            CoreError::Encode(e) => CliError::Json(e),
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

//! Clap derive structures for the `chorus` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// chorus -- talk to one or more self-hosted chat instances
#[derive(Debug, Parser)]
#[command(
    name = "chorus",
    version,
    about = "Connect to Chorus chat instances from the command line",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "CHORUS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', env = "CHORUS_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List and manage configured instances
    #[command(alias = "i")]
    Instances(InstancesArgs),

    /// Store tokens for an instance in the OS keyring
    Login(LoginArgs),

    /// Remove stored tokens for an instance
    Logout(LogoutArgs),

    /// Stay connected and print live events
    Listen(ListenArgs),

    /// Send a message to a channel
    Send(SendArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct InstancesArgs {
    #[command(subcommand)]
    pub command: Option<InstancesCommand>,
}

#[derive(Debug, Subcommand)]
pub enum InstancesCommand {
    /// List configured instances (default)
    #[command(alias = "ls")]
    List,

    /// Add or replace an instance
    Add {
        /// Instance id used on the command line
        id: String,
        /// Base URL, e.g. https://chat.example.com
        url: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// User id to connect as
        #[arg(long)]
        user: Option<String>,
        /// Make this the default instance
        #[arg(long)]
        default: bool,
    },

    /// Remove an instance from the config
    #[command(alias = "rm")]
    Remove { id: String },
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Instance id (defaults to default_instance)
    pub instance: Option<String>,

    /// Access token (prompted if omitted)
    #[arg(long, env = "CHORUS_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Refresh token (prompted if omitted)
    #[arg(long, env = "CHORUS_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Access token lifetime, e.g. "15m" or "1h"
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    pub expires_in: Duration,
}

#[derive(Debug, Args)]
pub struct LogoutArgs {
    /// Instance id (defaults to default_instance)
    pub instance: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Instance id (defaults to default_instance)
    pub instance: Option<String>,

    /// User id to connect as (overrides config)
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Only print chat events for this channel
    #[arg(long)]
    pub channel: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Instance id
    pub instance: String,

    /// Channel id
    pub channel: String,

    /// Message text
    pub content: String,

    /// User id to send as (overrides config)
    #[arg(long, short = 'u')]
    pub user: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}

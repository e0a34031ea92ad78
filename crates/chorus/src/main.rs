mod cli;
mod commands;
mod error;
mod output;

use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Command::Listen(args) => args.log_file.as_deref(),
        _ => None,
    };
    // Held until exit so buffered file logs are flushed.
    let _guard = init_tracing(cli.global.verbose, log_file);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file, guard) = match log_file.and_then(open_log_file) {
        Some((writer, guard)) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(stderr).with(file).init();
    guard
}

fn open_log_file(
    path: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name()?;
    Some(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name)))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = &cli.global;
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "chorus", &mut std::io::stdout());
            Ok(())
        }
        Command::Instances(args) => commands::instances::handle(args, global),
        Command::Login(args) => commands::login::handle(&args, global),
        Command::Logout(args) => commands::login::logout(&args, global),
        Command::Listen(args) => commands::listen::handle(args, global).await,
        Command::Send(args) => commands::send::handle(args, global).await,
    }
}

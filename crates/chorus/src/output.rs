//! Output formatting: table, JSON, plain.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use chorus_core::ConnectionStatus;

use crate::cli::{ColorMode, OutputFormat};

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Render a list in the chosen format. `plain` emits `id_fn` per line.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, serde_json::Error>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
    })
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print to stdout unless quiet.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

pub fn status_label(status: ConnectionStatus, color: bool) -> String {
    let label = match status {
        ConnectionStatus::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        other => other.to_string(),
    };
    if !color {
        return label;
    }
    match status {
        ConnectionStatus::Connected => label.green().to_string(),
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. } => {
            label.yellow().to_string()
        }
        ConnectionStatus::Error => label.red().to_string(),
        ConnectionStatus::Disconnected => label.dimmed().to_string(),
    }
}

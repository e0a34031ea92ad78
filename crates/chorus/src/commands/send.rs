use serde::Serialize;

use crate::cli::{GlobalOpts, OutputFormat, SendArgs};
use crate::commands;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Sent<'a> {
    instance: &'a str,
    channel: &'a str,
    id: &'a str,
    created_at: String,
}

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = commands::load(global)?;
    let (name, profile) = commands::resolve(&cfg, Some(&args.instance))?;
    let user = commands::resolve_user(&cfg, name, args.user.as_deref())?;
    let (client, id) = commands::client_for(&cfg, name, profile)?;

    let message = client
        .send_message(&id, &args.channel, &user, &args.content)
        .await?;

    let sent = Sent {
        instance: name,
        channel: &message.channel_id,
        id: &message.id,
        created_at: message.created_at.to_rfc3339(),
    };
    let rendered = match global.output {
        OutputFormat::Json => serde_json::to_string_pretty(&sent)?,
        OutputFormat::Plain => sent.id.to_owned(),
        OutputFormat::Table => format!("Sent {} to #{} on {}", sent.id, sent.channel, sent.instance),
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

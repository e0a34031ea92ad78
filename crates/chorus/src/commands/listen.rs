use owo_colors::OwoColorize;

use chorus_core::{ConnectionEvent, ConnectionStatus, Envelope, InboundEvent};

use crate::cli::{GlobalOpts, ListenArgs, OutputFormat};
use crate::commands;
use crate::error::CliError;
use crate::output;

/// Stream one instance's events to stdout until Ctrl-C or the server ends
/// the session.
pub async fn handle(args: ListenArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = commands::load(global)?;
    let (name, profile) = commands::resolve(&cfg, args.instance.as_deref())?;
    let user = commands::resolve_user(&cfg, name, args.user.as_deref())?;
    let (client, id) = commands::client_for(&cfg, name, profile)?;

    client.connect(&id, &user)?;
    let connection = client
        .coordinator()
        .connection(&id)
        .ok_or_else(|| CliError::Internal(format!("no connection for '{name}'")))?;
    let mut sub = connection.subscribe(user);

    let color = output::should_color(global.color);
    let filter = args.channel.as_deref();
    let mut was_connected = false;

    let result = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = sub.recv() => match event {
                Some(ConnectionEvent::Status(status)) => {
                    if global.output != OutputFormat::Json && !global.quiet {
                        let label = if color { name.bold().to_string() } else { name.to_owned() };
                        eprintln!("{label} {}", output::status_label(status, color));
                    }
                    match status {
                        ConnectionStatus::Connected => was_connected = true,
                        ConnectionStatus::Error => {
                            break Err(CliError::NotLoggedIn { instance: name.into() });
                        }
                        // Clean close or a superseded session.
                        ConnectionStatus::Disconnected if was_connected => break Ok(()),
                        _ => {}
                    }
                }
                Some(ConnectionEvent::Message(envelope)) => {
                    if let Some(line) = render(&envelope, global.output, filter, color)? {
                        output::print_output(&line, global.quiet);
                    }
                }
                None => break Ok(()),
            },
        }
    };

    sub.unsubscribe();
    client.disconnect(&id).await;
    result
}

fn render(
    envelope: &Envelope,
    format: OutputFormat,
    channel: Option<&str>,
    color: bool,
) -> Result<Option<String>, CliError> {
    let event = match InboundEvent::decode(envelope) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::debug!(kind = %envelope.kind, error = %e, "skipping undecodable event");
            return Ok(None);
        }
    };

    if let (Some(wanted), Some(actual)) = (channel, event_channel(&event)) {
        if wanted != actual {
            return Ok(None);
        }
    }

    if format == OutputFormat::Json {
        return Ok(Some(serde_json::to_string(envelope)?));
    }
    Ok(describe(&event).map(|text| {
        let stamp = if color {
            envelope.timestamp.dimmed().to_string()
        } else {
            envelope.timestamp.clone()
        };
        format!("{stamp} {text}")
    }))
}

fn event_channel(event: &InboundEvent) -> Option<&str> {
    match event {
        InboundEvent::MessageCreated(m) | InboundEvent::MessageUpdated(m) => Some(&m.channel_id),
        InboundEvent::MessageDeleted(d) => Some(&d.channel_id),
        InboundEvent::TypingStart(t) | InboundEvent::TypingStop(t) => Some(&t.channel_id),
        InboundEvent::ReactionAdded(r) | InboundEvent::ReactionRemoved(r) => Some(&r.channel_id),
        InboundEvent::ThreadUpdated(t) => Some(&t.channel_id),
        InboundEvent::VoiceJoined(v) | InboundEvent::VoiceLeft(v) => Some(&v.channel_id),
        InboundEvent::VoiceState(v) => v.channel_id.as_deref(),
        InboundEvent::Authenticated | InboundEvent::Ping | InboundEvent::Presence(_) => None,
    }
}

fn describe(event: &InboundEvent) -> Option<String> {
    let text = match event {
        InboundEvent::Authenticated | InboundEvent::Ping => return None,
        InboundEvent::Presence(p) => format!("{} is {}", p.user_id, p.status),
        InboundEvent::TypingStart(t) => format!("#{} {} is typing", t.channel_id, t.user_id),
        InboundEvent::TypingStop(_) => return None,
        InboundEvent::MessageCreated(m) => format!("#{} <{}> {}", m.channel_id, m.author_id, m.content),
        InboundEvent::MessageUpdated(m) => {
            format!("#{} <{}> {} (edited)", m.channel_id, m.author_id, m.content)
        }
        InboundEvent::MessageDeleted(d) => format!("#{} message {} deleted", d.channel_id, d.message_id),
        InboundEvent::ReactionAdded(r) => {
            format!("#{} {} reacted {} to {}", r.channel_id, r.user_id, r.emoji, r.message_id)
        }
        InboundEvent::ReactionRemoved(r) => {
            format!("#{} {} removed {} from {}", r.channel_id, r.user_id, r.emoji, r.message_id)
        }
        InboundEvent::ThreadUpdated(t) => {
            format!("#{} thread {} has {} replies", t.channel_id, t.message_id, t.reply_count)
        }
        InboundEvent::VoiceState(v) => {
            let mut flags = Vec::new();
            if v.muted {
                flags.push("muted");
            }
            if v.deafened {
                flags.push("deafened");
            }
            let flags = if flags.is_empty() { "unmuted".to_owned() } else { flags.join(", ") };
            format!("{} voice: {flags}", v.user_id)
        }
        InboundEvent::VoiceJoined(v) => format!("{} joined voice #{}", v.user_id, v.channel_id),
        InboundEvent::VoiceLeft(v) => format!("{} left voice #{}", v.user_id, v.channel_id),
    };
    Some(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> Envelope {
        Envelope::parse(json).unwrap()
    }

    const CREATED: &str = r##"{
        "type": "message.created",
        "timestamp": "2026-01-01T00:00:00Z",
        "payload": {
            "id": "m1",
            "channel_id": "general",
            "author_id": "u1",
            "content": "hello",
            "created_at": "2026-01-01T00:00:00Z"
        }
    }"##;

    #[test]
    fn message_renders_as_a_chat_line() {
        let line = render(&envelope(CREATED), OutputFormat::Plain, None, false).unwrap();
        assert_eq!(line.as_deref(), Some("2026-01-01T00:00:00Z #general <u1> hello"));
    }

    #[test]
    fn channel_filter_drops_other_channels() {
        let line = render(&envelope(CREATED), OutputFormat::Plain, Some("random"), false).unwrap();
        assert!(line.is_none());
    }

    #[test]
    fn channel_filter_keeps_channelless_events() {
        let presence = envelope(
            r#"{"type":"presence.update","timestamp":"t","payload":{"user_id":"u2","status":"idle"}}"#,
        );
        let line = render(&presence, OutputFormat::Plain, Some("general"), false).unwrap();
        assert_eq!(line.as_deref(), Some("t u2 is idle"));
    }

    #[test]
    fn json_output_is_the_raw_envelope() {
        let line = render(&envelope(CREATED), OutputFormat::Json, None, false)
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "message.created");
        assert_eq!(value["payload"]["content"], "hello");
    }

    #[test]
    fn pings_and_unknown_types_are_silent() {
        let ping = envelope(r#"{"type":"ping","timestamp":"t"}"#);
        assert!(render(&ping, OutputFormat::Plain, None, false).unwrap().is_none());
        let other = envelope(r#"{"type":"server.motd","timestamp":"t","payload":{}}"#);
        assert!(render(&other, OutputFormat::Plain, None, false).unwrap().is_none());
    }
}

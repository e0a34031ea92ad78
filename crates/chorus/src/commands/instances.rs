use serde::Serialize;
use tabled::Tabled;

use chorus_config::InstanceProfile;

use crate::cli::{GlobalOpts, InstancesArgs, InstancesCommand};
use crate::commands;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct InstanceView {
    id: String,
    name: String,
    url: String,
    user: Option<String>,
    default: bool,
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "User")]
    user: String,
}

fn row(v: &InstanceView) -> InstanceRow {
    InstanceRow {
        marker: if v.default { "*" } else { "" },
        id: v.id.clone(),
        name: v.name.clone(),
        url: v.url.clone(),
        user: v.user.clone().unwrap_or_else(|| "-".into()),
    }
}

pub fn handle(args: InstancesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command.unwrap_or(InstancesCommand::List) {
        InstancesCommand::List => list(global),
        InstancesCommand::Add {
            id,
            url,
            name,
            user,
            default,
        } => {
            let mut cfg = commands::load(global)?;
            let profile = InstanceProfile {
                name,
                user,
                ..InstanceProfile::new(url)
            };
            // Reject bad URLs before they reach the file.
            profile.to_instance(&id)?;
            if default || cfg.default_instance.is_none() {
                cfg.default_instance = Some(id.clone());
            }
            let replaced = cfg.instances.insert(id.clone(), profile).is_some();
            let path = commands::save(global, &cfg)?;
            let verb = if replaced { "Updated" } else { "Added" };
            output::print_output(&format!("{verb} instance '{id}' in {}", path.display()), global.quiet);
            Ok(())
        }
        InstancesCommand::Remove { id } => {
            let mut cfg = commands::load(global)?;
            commands::resolve(&cfg, Some(&id))?;
            cfg.instances.shift_remove(&id);
            if cfg.default_instance.as_deref() == Some(id.as_str()) {
                cfg.default_instance = cfg.instances.keys().next().cloned();
            }
            commands::save(global, &cfg)?;
            output::print_output(&format!("Removed instance '{id}'"), global.quiet);
            Ok(())
        }
    }
}

fn list(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = commands::load(global)?;
    let views: Vec<InstanceView> = cfg
        .instances
        .iter()
        .map(|(id, p)| InstanceView {
            id: id.clone(),
            name: p.name.clone().unwrap_or_else(|| id.clone()),
            url: p.url.clone(),
            user: cfg.user_for(id).map(str::to_owned),
            default: cfg.default_instance.as_deref() == Some(id.as_str()),
        })
        .collect();

    let rendered = output::render_list(global.output, &views, row, |v| v.id.clone())?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

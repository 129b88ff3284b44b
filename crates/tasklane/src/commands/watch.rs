//! `tasklane watch`: stream realtime changes until Ctrl-C, a count limit,
//! or the feed gives up reconnecting.

use std::time::Duration;

use chrono::Local;
use owo_colors::OwoColorize;
use tracing::{debug, info};

use tasklane_api::realtime::{RealtimeClient, RealtimeEvent};
use tasklane_config::ClientSettings;

use crate::cli::{OutputFormat, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::Render;

const LIVENESS_CHECK: Duration = Duration::from_secs(1);

pub async fn handle(
    mut settings: ClientSettings,
    args: WatchArgs,
    render: Render,
) -> Result<(), CliError> {
    config::override_topics(&mut settings, &args.topics)?;
    if args.count == Some(0) {
        return Ok(());
    }

    let tables = settings.realtime.tables.join(", ");
    let (client, mut events) = RealtimeClient::new(settings.realtime);
    client.connect().await?;
    info!(tables = %tables, "watching realtime changes");
    if !render.quiet && render.format == OutputFormat::Table {
        eprintln!("Watching {tables} (Ctrl-C to stop)");
    }

    let result = pump(&client, &mut events, &args, render).await;

    let dropped = client.dropped_events();
    if dropped > 0 && !render.quiet {
        eprintln!("{dropped} events dropped while output was falling behind");
    }
    client.disconnect();
    result
}

async fn pump(
    client: &RealtimeClient,
    events: &mut tokio::sync::mpsc::Receiver<RealtimeEvent>,
    args: &WatchArgs,
    render: Render,
) -> Result<(), CliError> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut liveness = tokio::time::interval(LIVENESS_CHECK);
    let mut seen: u64 = 0;
    let mut last_reason = String::from("connection lost");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("interrupted");
                return Ok(());
            }
            _ = liveness.tick() => {
                if !client.is_running() {
                    return Err(CliError::RealtimeLost { reason: last_reason });
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(CliError::RealtimeLost { reason: last_reason });
                };
                if let RealtimeEvent::Disconnected { ref reason } = event {
                    last_reason.clone_from(reason);
                }
                if event.is_lifecycle() && args.changes_only {
                    continue;
                }
                let line = render_event(&event, render)?;
                output::print_output(&line, render.quiet);

                if !event.is_lifecycle() {
                    seen += 1;
                    if args.count.is_some_and(|limit| seen >= limit) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// One event per line: a summary in table mode, a document otherwise.
fn render_event(event: &RealtimeEvent, render: Render) -> Result<String, CliError> {
    match render.format {
        OutputFormat::Json | OutputFormat::JsonCompact => Ok(serde_json::to_string(event)?),
        OutputFormat::Yaml => Ok(format!("---\n{}", serde_yaml::to_string(event)?)),
        OutputFormat::Plain => Ok(match subject(event) {
            Some(id) => format!("{} {id}", event.kind()),
            None => event.kind().to_owned(),
        }),
        OutputFormat::Table => Ok(summary(event, render.color)),
    }
}

fn subject(event: &RealtimeEvent) -> Option<&str> {
    match event {
        RealtimeEvent::TaskCreated { task } => Some(&task.id),
        RealtimeEvent::TaskUpdated { task_id, .. } | RealtimeEvent::TaskDeleted { task_id, .. } => {
            Some(task_id)
        }
        RealtimeEvent::ProjectCreated { project } => Some(&project.id),
        RealtimeEvent::ProjectUpdated { project_id, .. }
        | RealtimeEvent::ProjectDeleted { project_id, .. } => Some(project_id),
        RealtimeEvent::Connected | RealtimeEvent::Disconnected { .. } => None,
    }
}

fn summary(event: &RealtimeEvent, color: bool) -> String {
    let time = Local::now().format("%H:%M:%S").to_string();
    let label = format!("{:<16}", event.kind());
    let kind = match event {
        _ if !color => label,
        RealtimeEvent::Connected | RealtimeEvent::Disconnected { .. } => {
            label.dimmed().to_string()
        }
        RealtimeEvent::TaskDeleted { .. } | RealtimeEvent::ProjectDeleted { .. } => {
            label.red().to_string()
        }
        RealtimeEvent::TaskCreated { .. } | RealtimeEvent::ProjectCreated { .. } => {
            label.green().to_string()
        }
        RealtimeEvent::TaskUpdated { .. } | RealtimeEvent::ProjectUpdated { .. } => {
            label.yellow().to_string()
        }
    };

    let detail = match event {
        RealtimeEvent::TaskCreated { task } | RealtimeEvent::TaskDeleted { task, .. } => {
            format!("{}  {}", task.id, task.title)
        }
        RealtimeEvent::TaskUpdated { task_id, task, old } => {
            let status = match old {
                Some(prev) if prev.status != task.status => {
                    format!(" [{} -> {}]", prev.status, output::paint_status(task.status, color))
                }
                _ => format!(" [{}]", output::paint_status(task.status, color)),
            };
            format!("{task_id}  {}{status}", task.title)
        }
        RealtimeEvent::ProjectCreated { project }
        | RealtimeEvent::ProjectDeleted { project, .. }
        | RealtimeEvent::ProjectUpdated { project, .. } => {
            format!("{}  {}", project.id, project.name)
        }
        RealtimeEvent::Connected => String::new(),
        RealtimeEvent::Disconnected { reason } => reason.clone(),
    };

    format!("{time}  {kind}  {detail}").trim_end().to_owned()
}

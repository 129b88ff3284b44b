//! Task command handlers.

use tabled::Tabled;

use tasklane_api::{Task, TaskQuery, TaskUpdate};

use crate::cli::{TaskUpdateArgs, TasksArgs, TasksCommand};
use crate::error::CliError;
use crate::output;

use super::{Client, Render, or_dash};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Pri")]
    priority: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
    #[tabled(rename = "Project")]
    project: String,
}

impl TaskRow {
    fn new(t: &Task, color: bool) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            status: output::paint_status(t.status, color),
            priority: t.priority.map(|p| p.to_string()).unwrap_or_default(),
            assignee: or_dash(t.assignee.as_deref()),
            project: or_dash(t.project_id.as_deref()),
        }
    }
}

fn detail(t: &Task, color: bool) -> String {
    output::detail_lines(&[
        ("ID", t.id.clone()),
        ("Title", t.title.clone()),
        ("Status", output::paint_status(t.status, color)),
        ("Priority", t.priority.map(|p| p.to_string()).unwrap_or_default()),
        ("Assignee", or_dash(t.assignee.as_deref())),
        ("Project", or_dash(t.project_id.as_deref())),
        ("Description", or_dash(t.description.as_deref())),
        (
            "Updated",
            t.updated_at.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
        ),
    ])
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(client: &Client, args: TasksArgs, render: Render) -> Result<(), CliError> {
    match args.command {
        TasksCommand::List {
            project,
            status,
            all,
        } => {
            let query = TaskQuery {
                project_id: project,
                status,
                // An explicit closed-out status filter implies including them.
                include_closed: all || status.is_some_and(|s| s.is_closed()),
            };
            let tasks = client.list_tasks(&query).await?;
            let out = output::render_list(
                render.format,
                &tasks,
                |t| TaskRow::new(t, render.color),
                |t| t.id.clone(),
            )?;
            output::print_output(&out, render.quiet);
            Ok(())
        }

        TasksCommand::Get { id } => {
            let task = client.get_task(&id).await?;
            print_task(&task, render)
        }

        TasksCommand::Update(args) => {
            let (id, update) = into_update(args)?;
            let task = client.update_task(&id, &update).await?;
            print_task(&task, render)
        }

        TasksCommand::Delete { id } => {
            if !render.yes {
                return Err(CliError::NonInteractiveRequiresYes {
                    action: format!("delete task '{id}'"),
                });
            }
            client.delete_task(&id).await?;
            if !render.quiet {
                eprintln!("Task {id} deleted");
            }
            Ok(())
        }
    }
}

fn print_task(task: &Task, render: Render) -> Result<(), CliError> {
    let out = output::render_single(
        render.format,
        task,
        |t| detail(t, render.color),
        |t| t.id.clone(),
    )?;
    output::print_output(&out, render.quiet);
    Ok(())
}

fn into_update(args: TaskUpdateArgs) -> Result<(String, TaskUpdate), CliError> {
    let update = TaskUpdate {
        title: args.title,
        description: args.description,
        status: args.status,
        priority: args.priority,
        assignee: args.assignee,
    };
    if update.is_empty() {
        return Err(CliError::Validation {
            field: "update".into(),
            reason: "nothing to change; pass at least one of --title, --description, \
                     --status, --priority, --assignee"
                .into(),
        });
    }
    if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(CliError::Validation {
            field: "title".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok((args.id, update))
}

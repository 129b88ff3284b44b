//! Project command handlers.

use tabled::Tabled;

use tasklane_api::Project;

use crate::cli::{ProjectsArgs, ProjectsCommand};
use crate::error::CliError;
use crate::output;

use super::{Client, Render, or_dash};

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Archived")]
    archived: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&Project> for ProjectRow {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            archived: if p.archived { "yes".into() } else { String::new() },
            description: or_dash(p.description.as_deref()),
        }
    }
}

pub async fn handle(client: &Client, args: ProjectsArgs, render: Render) -> Result<(), CliError> {
    match args.command {
        ProjectsCommand::List => {
            let projects = client.list_projects().await?;
            let out = output::render_list(
                render.format,
                &projects,
                |p| ProjectRow::from(p),
                |p| p.id.clone(),
            )?;
            output::print_output(&out, render.quiet);
            Ok(())
        }

        ProjectsCommand::Get { id } => {
            let project = client.get_project(&id).await?;
            let out = output::render_single(
                render.format,
                &project,
                |p| {
                    output::detail_lines(&[
                        ("ID", p.id.clone()),
                        ("Name", p.name.clone()),
                        ("Archived", p.archived.to_string()),
                        ("Description", or_dash(p.description.as_deref())),
                        (
                            "Created",
                            p.created_at.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
                        ),
                    ])
                },
                |p| p.id.clone(),
            )?;
            output::print_output(&out, render.quiet);
            Ok(())
        }
    }
}

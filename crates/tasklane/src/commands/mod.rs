//! Command dispatch: bridges CLI args -> resilient client -> output formatting.

pub mod health;
pub mod metrics;
pub mod projects;
pub mod tasks;
pub mod watch;

use tasklane_api::HttpTransport;
use tasklane_config::ClientSettings;
use tasklane_core::ResilientClient;

use crate::cli::{Command, OutputFormat};
use crate::error::CliError;

/// Output choices resolved once from flags and config defaults.
#[derive(Debug, Clone, Copy)]
pub struct Render {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
    pub yes: bool,
}

pub type Client = ResilientClient<HttpTransport>;

/// Dispatch a service-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    settings: ClientSettings,
    render: Render,
) -> Result<(), CliError> {
    // The realtime feed does not go through the REST client.
    let cmd = match cmd {
        Command::Watch(args) => return watch::handle(settings, args, render).await,
        other => other,
    };

    let transport = settings.http_transport()?;
    let client = ResilientClient::new(transport, settings.resilience.clone());

    match cmd {
        Command::Tasks(args) => tasks::handle(&client, args, render).await,
        Command::Projects(args) => projects::handle(&client, args, render).await,
        Command::Health => health::handle(&client, &settings, render).await,
        Command::Metrics(args) => metrics::handle(&client, args, render).await,
        Command::Watch(_) | Command::Completions(_) => Ok(()),
    }
}

/// Text shown in a table cell for an absent value.
pub fn or_dash(value: Option<&str>) -> String {
    value.map_or_else(|| "-".into(), ToOwned::to_owned)
}

//! Clap derive structures for the `tasklane` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use tasklane_api::TaskStatus;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tasklane -- resilient command-line client for task tracking
#[derive(Debug, Parser)]
#[command(
    name = "tasklane",
    version,
    about = "Manage tasks and projects and follow changes in real time",
    long_about = "Command-line client for a tasklane service.\n\n\
        Requests go through a retry executor and circuit breaker; `watch`\n\
        follows the realtime change feed over a persistent WebSocket.",
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
    /// Profile to use
    #[arg(long, short = 'p', env = "TASKLANE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TASKLANE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Service URL (overrides profile)
    #[arg(long, short = 'u', env = "TASKLANE_URL", global = true)]
    pub url: Option<String>,

    /// API key (overrides profile credentials)
    #[arg(long, env = "TASKLANE_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "TASKLANE_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation for destructive commands
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "TASKLANE_INSECURE", global = true)]
    pub insecure: bool,

    /// HTTP timeout in seconds
    #[arg(long, env = "TASKLANE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Disable retries and the circuit breaker
    #[arg(long, global = true)]
    pub no_retry: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one identifier per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List, inspect, and edit tasks
    #[command(alias = "t")]
    Tasks(TasksArgs),

    /// List and inspect projects
    #[command(alias = "p")]
    Projects(ProjectsArgs),

    /// Check service health
    Health,

    /// Follow realtime task and project changes
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Probe the service and report resilience counters
    Metrics(MetricsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Tasks ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: TasksCommand,
}

#[derive(Debug, Subcommand)]
pub enum TasksCommand {
    /// List tasks
    #[command(alias = "ls")]
    List {
        /// Only tasks in this project
        #[arg(long)]
        project: Option<String>,

        /// Only tasks with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,

        /// Include done and closed tasks
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show one task
    Get { id: String },

    /// Change fields of a task
    Update(TaskUpdateArgs),

    /// Delete a task
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Debug, Args)]
pub struct TaskUpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, value_parser = parse_status)]
    pub status: Option<TaskStatus>,

    #[arg(long)]
    pub priority: Option<i32>,

    #[arg(long)]
    pub assignee: Option<String>,
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    match raw.parse::<TaskStatus>() {
        Ok(TaskStatus::Unknown) | Err(_) => Err(format!(
            "unknown status '{raw}' (expected open, in_progress, blocked, done, closed)"
        )),
        Ok(status) => Ok(status),
    }
}

// ── Projects ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProjectsArgs {
    #[command(subcommand)]
    pub command: ProjectsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProjectsCommand {
    /// List projects
    #[command(alias = "ls")]
    List,

    /// Show one project
    Get { id: String },
}

// ── Watch / Metrics ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Tables to follow (overrides the profile's realtime topics)
    #[arg(long, value_delimiter = ',')]
    pub topics: Vec<String>,

    /// Exit after this many change events
    #[arg(long, short = 'n')]
    pub count: Option<u64>,

    /// Hide connected / disconnected notices
    #[arg(long)]
    pub changes_only: bool,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    /// Number of health probes to send through the resilient client
    #[arg(long, default_value = "3")]
    pub probes: u32,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn status_parser_rejects_unknown() {
        assert_eq!(parse_status("IN_PROGRESS"), Ok(TaskStatus::InProgress));
        assert!(parse_status("unknown").is_err());
        assert!(parse_status("nonsense").is_err());
    }
}

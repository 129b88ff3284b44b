//! `tasklane health`: one probe through the resilient client.

use std::time::Instant;

use owo_colors::OwoColorize;
use serde::Serialize;

use tasklane_config::ClientSettings;
use tasklane_core::CircuitState;

use crate::error::CliError;
use crate::output;

use super::{Client, Render};

#[derive(Debug, Serialize)]
struct HealthReport {
    profile: String,
    url: String,
    healthy: bool,
    latency_ms: u64,
    circuit: CircuitState,
}

pub async fn handle(
    client: &Client,
    settings: &ClientSettings,
    render: Render,
) -> Result<(), CliError> {
    let started = Instant::now();
    client.health_check().await?;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let report = HealthReport {
        profile: settings.profile.clone(),
        url: settings.url.to_string(),
        healthy: true,
        latency_ms,
        circuit: client.circuit_state(),
    };

    let out = output::render_single(
        render.format,
        &report,
        |r| {
            let ok = if render.color {
                "ok".green().to_string()
            } else {
                "ok".into()
            };
            output::detail_lines(&[
                ("Service", r.url.clone()),
                ("Profile", r.profile.clone()),
                ("Status", ok),
                ("Latency", format!("{}ms", r.latency_ms)),
                ("Circuit", r.circuit.to_string()),
            ])
        },
        |_| "ok".into(),
    )?;
    output::print_output(&out, render.quiet);
    Ok(())
}

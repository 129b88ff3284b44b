//! `tasklane metrics`: send a few health probes, then report the
//! resilience counters and breaker state they produced.

use serde::Serialize;
use tracing::debug;

use tasklane_core::{CircuitMetrics, MetricsSnapshot};

use crate::cli::MetricsArgs;
use crate::error::CliError;
use crate::output;

use super::{Client, Render};

#[derive(Debug, Serialize)]
struct MetricsReport {
    probes: u32,
    requests: MetricsSnapshot,
    circuit: CircuitMetrics,
}

pub async fn handle(client: &Client, args: MetricsArgs, render: Render) -> Result<(), CliError> {
    if args.probes == 0 {
        return Err(CliError::Validation {
            field: "probes".into(),
            reason: "must be at least 1".into(),
        });
    }

    // Probe failures are the data being reported, not command failures.
    for n in 1..=args.probes {
        if let Err(e) = client.health_check().await {
            debug!(probe = n, error = %e, "health probe failed");
        }
    }

    let report = MetricsReport {
        probes: args.probes,
        requests: client.metrics(),
        circuit: client.circuit_metrics(),
    };

    let out = output::render_single(render.format, &report, detail, |r| {
        r.circuit.state.to_string()
    })?;
    output::print_output(&out, render.quiet);
    Ok(())
}

fn detail(r: &MetricsReport) -> String {
    let stamp = |ts: Option<chrono::DateTime<chrono::Utc>>| {
        ts.map_or_else(|| "-".into(), |t| t.to_rfc3339())
    };
    output::detail_lines(&[
        ("Probes", r.probes.to_string()),
        ("Requests", r.requests.total_requests.to_string()),
        ("Succeeded", r.requests.successful_requests.to_string()),
        ("Failed", r.requests.failed_requests.to_string()),
        ("Retried", r.requests.retried_requests.to_string()),
        ("Breaker trips", r.requests.circuit_breaker_trips.to_string()),
        ("Circuit", r.circuit.state.to_string()),
        ("Failures", r.circuit.failure_count.to_string()),
        ("Last failure", stamp(r.circuit.last_failure)),
        ("Last attempt", stamp(r.circuit.last_attempt)),
    ])
}

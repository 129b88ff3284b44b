// The request-path contract consumed by the resilience layer, plus the
// shared reqwest configuration used to build the HTTP implementation.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
use crate::model::{Project, ProjectList, Task, TaskList, TaskQuery, TaskUpdate};

// ── Transport contract ───────────────────────────────────────────────

/// A single-shot call into the task-tracking service.
///
/// Implementations perform exactly one request per call and never retry;
/// retries and circuit breaking are layered on top by `tasklane-core`.
/// Every failure surfaces as an [`Error`] whose `Display` text is what
/// message-pattern retry classification matches against.
pub trait Transport: Send + Sync + 'static {
    fn list_tasks(&self, query: &TaskQuery) -> impl Future<Output = Result<TaskList, Error>> + Send;

    fn get_task(&self, id: &str) -> impl Future<Output = Result<Task, Error>> + Send;

    fn update_task(
        &self,
        id: &str,
        update: &TaskUpdate,
    ) -> impl Future<Output = Result<Task, Error>> + Send;

    fn delete_task(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn list_projects(&self) -> impl Future<Output = Result<ProjectList, Error>> + Send;

    fn get_project(&self, id: &str) -> impl Future<Output = Result<Project, Error>> + Send;

    fn health_check(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

// ── reqwest configuration ────────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled web PKI roots.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-hosted instances with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` with the given default headers.
    pub fn build_client(
        &self,
        headers: reqwest::header::HeaderMap,
    ) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("tasklane/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

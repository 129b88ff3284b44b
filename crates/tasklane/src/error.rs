//! CLI error types with miette diagnostics.
//!
//! Maps transport, resilience, and config errors into user-facing errors
//! with actionable help text and a stable exit code.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use tasklane_config::ConfigError;
use tasklane_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(tasklane::connection_failed),
        help(
            "Check that the service is running and reachable.\n\
             Try: tasklane health --verbose"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("TLS setup failed: {message}")]
    #[diagnostic(
        code(tasklane::tls_error),
        help(
            "For a self-signed certificate use --insecure (-k),\n\
             or configure ca_cert in your profile."
        )
    )]
    TlsError { message: String },

    #[error("Service is failing fast: circuit breaker is {state}")]
    #[diagnostic(
        code(tasklane::circuit_open),
        help("Too many consecutive failures. Wait for the breaker timeout, or retry with --no-retry.")
    )]
    CircuitOpen { state: String },

    #[error("Realtime feed stopped: {reason}")]
    #[diagnostic(
        code(tasklane::realtime),
        help("Reconnection gave up. Check the service, or raise realtime.max_reconnects.")
    )]
    RealtimeLost { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tasklane::auth_failed),
        help("Verify the API key for this profile, or pass --api-key.")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(tasklane::no_credentials),
        help(
            "Set api_key_env or api_key in the profile, store a key in the\n\
             system keyring, or set TASKLANE_API_KEY."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(tasklane::not_found),
        help("Run: tasklane {resource_type}s list to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("Request conflicts with current state: {message}")]
    #[diagnostic(code(tasklane::conflict))]
    Conflict { message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({status}): {message}")]
    #[diagnostic(code(tasklane::api_error))]
    ApiError { status: u16, message: String },

    #[error("Unexpected response: {message}")]
    #[diagnostic(code(tasklane::protocol))]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tasklane::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tasklane::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No profile configured and no --url given")]
    #[diagnostic(
        code(tasklane::no_config),
        help(
            "Add a profile to {path}\n\
             or pass --url and --api-key (TASKLANE_URL / TASKLANE_API_KEY)."
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(tasklane::config))]
    Config { message: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(tasklane::confirmation_required),
        help("Use --yes (-y) to confirm.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Timeout / cancellation ───────────────────────────────────────
    #[error("Request timed out after {elapsed}")]
    #[diagnostic(
        code(tasklane::timeout),
        help("Increase the timeout with --timeout or resilience.request_timeout_ms.")
    )]
    Timeout { elapsed: String },

    #[error("Operation cancelled")]
    #[diagnostic(code(tasklane::cancelled))]
    Cancelled,

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(tasklane::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(tasklane::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::TlsError { .. }
            | Self::CircuitOpen { .. }
            | Self::RealtimeLost { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

fn format_elapsed(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

// ── tasklane_api::Error → CliError ───────────────────────────────────

impl From<tasklane_api::Error> for CliError {
    fn from(err: tasklane_api::Error) -> Self {
        use tasklane_api::Error as Api;

        match err {
            Api::Authentication { message } => Self::AuthFailed { message },
            Api::Transport(e) if e.is_timeout() => Self::Timeout {
                elapsed: "the HTTP timeout".into(),
            },
            Api::Transport(e) => Self::ConnectionFailed {
                url: e
                    .url()
                    .map_or_else(|| "(unknown)".into(), ToString::to_string),
                source: Box::new(e),
            },
            Api::InvalidUrl(e) => Self::Validation {
                field: "url".into(),
                reason: e.to_string(),
            },
            Api::Timeout { timeout_secs } => Self::Timeout {
                elapsed: format!("{timeout_secs}s"),
            },
            Api::Tls(message) => Self::TlsError { message },
            Api::NotFound { resource, id } => Self::NotFound {
                resource_type: resource.into(),
                identifier: id,
            },
            Api::Http {
                status: 401 | 403,
                message,
            } => Self::AuthFailed { message },
            Api::Http {
                status: 409,
                message,
            } => Self::Conflict { message },
            Api::Http { status, message } => Self::ApiError { status, message },
            Api::WebSocketConnect(reason) => Self::ConnectionFailed {
                url: "(realtime)".into(),
                source: reason.into(),
            },
            Api::WebSocketClosed { code, reason } => Self::RealtimeLost {
                reason: format!("closed with code {code}: {reason}"),
            },
            Api::Protocol(message) | Api::Deserialization { message, .. } => {
                Self::Protocol { message }
            }
        }
    }
}

// ── CoreError → CliError ─────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err.into_root() {
            CoreError::Api(api) => api.into(),
            CoreError::CircuitOpen { state } => Self::CircuitOpen {
                state: state.to_string(),
            },
            CoreError::DeadlineExceeded { timeout } => Self::Timeout {
                elapsed: format_elapsed(timeout),
            },
            CoreError::Cancelled => Self::Cancelled,
            // into_root never yields RetryExhausted
            CoreError::RetryExhausted { last_error, .. } => (*last_error).into(),
        }
    }
}

// ── ConfigError → CliError ───────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => Self::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

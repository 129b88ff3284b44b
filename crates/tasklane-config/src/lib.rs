//! Shared configuration for tasklane consumers.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to the runtime types of `tasklane-api` and
//! `tasklane-core`. The CLI layers its flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use tasklane_api::realtime::RealtimeConfig;
use tasklane_api::{HttpTransport, TlsMode, TransportConfig};
use tasklane_core::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};

const KEYRING_SERVICE: &str = "tasklane";
const ENV_PREFIX: &str = "TASKLANE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    ProfileNotFound { name: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    /// `table`, `json`, or `yaml`.
    #[serde(default = "default_output")]
    pub output: String,

    /// `auto`, `always`, or `never`.
    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named service profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Service base URL (e.g., "https://tasks.example.com").
    pub url: String,

    /// API key (plaintext, prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout override, in seconds.
    pub timeout: Option<u64>,

    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub realtime: RealtimeSettings,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            api_key_env: None,
            ca_cert: None,
            insecure: false,
            timeout: None,
            resilience: ResilienceSettings::default(),
            realtime: RealtimeSettings::default(),
        }
    }
}

/// `[profiles.<name>.resilience]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_patterns: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let defaults = ResilienceConfig::default();
        Self {
            enabled: defaults.enabled,
            failure_threshold: defaults.circuit_breaker.failure_threshold,
            success_threshold: defaults.circuit_breaker.success_threshold,
            open_timeout_ms: millis(defaults.circuit_breaker.timeout),
            max_attempts: defaults.retry.max_attempts,
            base_delay_ms: millis(defaults.retry.base_delay),
            max_delay_ms: millis(defaults.retry.max_delay),
            multiplier: defaults.retry.multiplier,
            jitter: defaults.retry.jitter,
            retryable_patterns: defaults.retry.retryable_patterns,
            request_timeout_ms: millis(defaults.request_timeout),
        }
    }
}

impl ResilienceSettings {
    pub fn to_config(&self) -> Result<ResilienceConfig, ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("resilience.failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(invalid("resilience.success_threshold", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("resilience.max_attempts", "must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid(
                "resilience.multiplier",
                format!("must be a finite number >= 1.0, got {}", self.multiplier),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid(
                "resilience.max_delay_ms",
                "must not be smaller than base_delay_ms",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("resilience.request_timeout_ms", "must be positive"));
        }

        Ok(ResilienceConfig {
            enabled: self.enabled,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                success_threshold: self.success_threshold,
                timeout: Duration::from_millis(self.open_timeout_ms),
            },
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                multiplier: self.multiplier,
                jitter: self.jitter,
                retryable_patterns: self.retryable_patterns.clone(),
            },
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        })
    }
}

/// `[profiles.<name>.realtime]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Tables to subscribe to.
    pub topics: Vec<String>,
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
    pub ping_interval_secs: u64,
    pub event_buffer: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            topics: vec!["tasks".into(), "projects".into()],
            max_reconnects: 5,
            reconnect_delay_ms: 2_000,
            ping_interval_secs: 30,
            event_buffer: 100,
        }
    }
}

impl RealtimeSettings {
    pub fn to_config(&self, url: Url, api_key: SecretString) -> Result<RealtimeConfig, ConfigError> {
        if self.topics.is_empty() {
            return Err(invalid("realtime.topics", "at least one topic is required"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("realtime.event_buffer", "must be at least 1"));
        }
        if self.ping_interval_secs == 0 {
            return Err(invalid("realtime.ping_interval_secs", "must be positive"));
        }

        let mut config = RealtimeConfig::new(url, api_key);
        config.tables.clone_from(&self.topics);
        config.max_reconnects = self.max_reconnects;
        config.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.ping_interval = Duration::from_secs(self.ping_interval_secs);
        config.event_buffer = self.event_buffer;
        Ok(config)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "tasklane", "tasklane").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tasklane");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. Missing files fall through to defaults;
/// `TASKLANE_` env vars override both (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve an API key: profile's `api_key_env` → keyring → plaintext.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store an API key in the system keyring for `profile_name`.
pub fn store_api_key(profile_name: &str, key: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key"))
        .and_then(|entry| entry.set_password(key))
        .map_err(|e| invalid("keyring", e.to_string()))
}

// ── Runtime settings ────────────────────────────────────────────────

/// Everything needed to build the HTTP transport, the resilient client,
/// and the realtime feed for one profile.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub profile: String,
    pub url: Url,
    pub api_key: SecretString,
    pub transport: TransportConfig,
    pub resilience: ResilienceConfig,
    pub realtime: RealtimeConfig,
}

impl ClientSettings {
    pub fn http_transport(&self) -> Result<HttpTransport, tasklane_api::Error> {
        HttpTransport::from_api_key(self.url.as_str(), &self.api_key, &self.transport)
    }
}

/// Build [`ClientSettings`] from a profile, with no CLI flag overrides.
pub fn profile_to_settings(
    profile: &Profile,
    profile_name: &str,
) -> Result<ClientSettings, ConfigError> {
    let url: Url = profile
        .url
        .parse()
        .map_err(|_| invalid("url", format!("invalid URL: {}", profile.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            "url",
            format!("expected an http(s) URL, got '{}'", url.scheme()),
        ));
    }

    let api_key = resolve_api_key(profile, profile_name)?;

    let tls = if profile.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let transport = TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or_else(default_timeout)),
    };

    Ok(ClientSettings {
        profile: profile_name.into(),
        resilience: profile.resilience.to_config()?,
        realtime: profile.realtime.to_config(url.clone(), api_key.clone())?,
        url,
        api_key,
        transport,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults, Defaults::default());
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn profile_sections_override_defaults() {
        let (_dir, path) = write_config(
            r#"
default_profile = "work"

[defaults]
output = "json"

[profiles.work]
url = "https://tasks.example.com"
api_key = "plain-key"

[profiles.work.resilience]
max_attempts = 5
multiplier = 3.0
retryable_patterns = ["gateway"]

[profiles.work.realtime]
topics = ["tasks"]
reconnect_delay_ms = 500
"#,
        );

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.defaults.output, "json");
        assert_eq!(config.defaults.color, "auto");

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "work");
        assert_eq!(profile.resilience.max_attempts, 5);
        assert_eq!(profile.resilience.failure_threshold, 5);
        assert_eq!(profile.realtime.max_reconnects, 5);

        let settings = profile_to_settings(profile, name).unwrap();
        assert_eq!(settings.api_key.expose_secret(), "plain-key");
        assert_eq!(settings.resilience.retry.max_attempts, 5);
        assert_eq!(settings.resilience.retry.retryable_patterns, vec!["gateway"]);
        assert_eq!(settings.realtime.tables, vec!["tasks"]);
        assert_eq!(settings.realtime.reconnect_delay, Duration::from_millis(500));
        assert_eq!(settings.transport.timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::ProfileNotFound { name }) if name == "nope"
        ));
    }

    #[test]
    fn resilience_defaults_match_runtime_defaults() {
        let settings = ResilienceSettings::default();
        assert_eq!(settings.to_config().unwrap(), ResilienceConfig::default());
        assert_eq!(settings.open_timeout_ms, 30_000);
        assert_eq!(settings.base_delay_ms, 100);
    }

    #[test]
    fn invalid_resilience_values_are_rejected() {
        let settings = ResilienceSettings {
            multiplier: 0.5,
            ..ResilienceSettings::default()
        };
        assert!(matches!(
            settings.to_config(),
            Err(ConfigError::Validation { field, .. }) if field == "resilience.multiplier"
        ));

        let settings = ResilienceSettings {
            base_delay_ms: 10_000,
            max_delay_ms: 100,
            ..ResilienceSettings::default()
        };
        assert!(settings.to_config().is_err());
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut profile = Profile::new("ftp://tasks.example.com");
        profile.api_key = Some("k".into());
        assert!(matches!(
            profile_to_settings(&profile, "default"),
            Err(ConfigError::Validation { field, .. }) if field == "url"
        ));
    }

    #[test]
    fn insecure_profile_selects_accept_invalid() {
        let mut profile = Profile::new("https://self-hosted.local");
        profile.api_key = Some("k".into());
        profile.insecure = true;
        profile.timeout = Some(5);

        let settings = profile_to_settings(&profile, "lab").unwrap();
        assert!(matches!(settings.transport.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(settings.transport.timeout, Duration::from_secs(5));
        assert_eq!(settings.profile, "lab");
    }

    #[test]
    fn save_then_load_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        let mut profile = Profile::new("https://tasks.example.com");
        profile.api_key_env = Some("TASKLANE_TEST_KEY".into());
        profile.realtime.event_buffer = 16;
        config.profiles.insert("default".into(), profile);

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}

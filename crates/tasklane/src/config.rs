//! Translation from config file + global flags to [`ClientSettings`].
//!
//! Flag precedence: `--url` / `--api-key` / `--insecure` / `--timeout`
//! override the selected profile. With no matching profile, `--url` plus
//! `--api-key` alone are enough.

use std::time::Duration;

use secrecy::SecretString;

use tasklane_api::TlsMode;
use tasklane_config::{ClientSettings, Config, ConfigError, Profile};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

/// Load the config file named by `--config`, or the platform default.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let config = match global.config {
        Some(ref path) => tasklane_config::load_config_from(path)?,
        None => tasklane_config::load_config()?,
    };
    Ok(config)
}

/// Resolve the settings every network command needs.
pub fn resolve_settings(global: &GlobalOpts, cfg: &Config) -> Result<ClientSettings, CliError> {
    match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => settings_from_profile(profile, name, global),
        Err(ConfigError::ProfileNotFound { name }) => {
            // An explicitly named profile must exist.
            if global.profile.is_some() {
                return Err(CliError::ProfileNotFound {
                    name,
                    available: available_profiles(cfg),
                });
            }
            let url = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
                path: global.config.clone().map_or_else(
                    || tasklane_config::config_path().display().to_string(),
                    |p| p.display().to_string(),
                ),
            })?;
            let api_key = global
                .api_key
                .clone()
                .ok_or_else(|| CliError::NoCredentials {
                    profile: name.clone(),
                })?;

            let mut profile = Profile::new(url);
            profile.api_key = Some(api_key);
            profile.timeout = Some(cfg.defaults.timeout);
            settings_from_profile(&profile, &name, global)
        }
        Err(other) => Err(other.into()),
    }
}

fn settings_from_profile(
    profile: &Profile,
    name: &str,
    global: &GlobalOpts,
) -> Result<ClientSettings, CliError> {
    let mut profile = profile.clone();
    if let Some(ref url) = global.url {
        profile.url.clone_from(url);
    }
    if global.insecure {
        profile.insecure = true;
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(secs);
    }
    if global.no_retry {
        profile.resilience.enabled = false;
    }

    if let Some(ref key) = global.api_key {
        profile.api_key = Some(key.clone());
    }
    let mut settings = tasklane_config::profile_to_settings(&profile, name)?;

    // A flag key wins over env and keyring.
    if let Some(ref key) = global.api_key {
        settings.api_key = SecretString::from(key.clone());
        settings.realtime.api_key = settings.api_key.clone();
    }

    if global.insecure {
        settings.transport.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        settings.transport.timeout = Duration::from_secs(secs);
    }
    Ok(settings)
}

/// Replace the realtime table list, e.g. from `watch --topics`.
pub fn override_topics(settings: &mut ClientSettings, topics: &[String]) -> Result<(), CliError> {
    if topics.iter().any(|t| t.trim().is_empty()) {
        return Err(CliError::Validation {
            field: "topics".into(),
            reason: "topic names must not be empty".into(),
        });
    }
    if !topics.is_empty() {
        settings.realtime.tables = topics.iter().map(|t| t.trim().to_owned()).collect();
    }
    Ok(())
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}

/// Output format: flag, then `defaults.output`, then table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global.output.unwrap_or(match cfg.defaults.output.as_str() {
        "json" => OutputFormat::Json,
        "json-compact" => OutputFormat::JsonCompact,
        "yaml" => OutputFormat::Yaml,
        "plain" => OutputFormat::Plain,
        _ => OutputFormat::Table,
    })
}

/// Color mode: flag, then `defaults.color`, then auto.
pub fn color_mode(global: &GlobalOpts, cfg: &Config) -> ColorMode {
    global.color.unwrap_or(match cfg.defaults.color.as_str() {
        "always" => ColorMode::Always,
        "never" => ColorMode::Never,
        _ => ColorMode::Auto,
    })
}

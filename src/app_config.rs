//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// TOML-backed file configuration. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Base URL of the JSON API.
    pub api_base: Option<String>,
    /// File holding the API key.
    pub key_file: Option<PathBuf>,
    /// Page size ceiling of the paged endpoint.
    pub page_size: Option<usize>,
    /// Items per batch round.
    pub batch_size: Option<usize>,
    /// Concurrent fetches per round.
    pub concurrency: Option<usize>,
    /// Minimum milliseconds between batch round starts.
    pub round_interval_ms: Option<u64>,
    /// Minimum milliseconds between page fetches.
    pub page_interval_ms: Option<u64>,
    /// Attempts per page fetch or entity.
    pub max_attempts: Option<u32>,
    /// Per-fetch time budget in seconds.
    pub fetch_timeout_secs: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP whole-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Base URL of the enrichment pages.
    pub enrich_base: Option<String>,
    /// `id` of the script element holding the enrichment JSON.
    pub enrich_script_id: Option<String>,
    /// Field read from the enrichment JSON and added to records.
    pub enrich_field: Option<String>,
    /// Default verbosity.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against the same ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        check_range("page_size", self.page_size, 1, 500)?;
        check_range("batch_size", self.batch_size, 1, 500)?;
        check_range("concurrency", self.concurrency, 1, 500)?;
        if let (Some(concurrency), Some(batch_size)) = (self.concurrency, self.batch_size)
            && concurrency > batch_size
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Must not exceed batch_size ({batch_size})"
            );
        }
        check_range("round_interval_ms", self.round_interval_ms, 0, 600_000)?;
        check_range("page_interval_ms", self.page_interval_ms, 0, 600_000)?;
        check_range("max_attempts", self.max_attempts, 1, 10)?;
        check_range("fetch_timeout_secs", self.fetch_timeout_secs, 1, 3600)?;
        check_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        check_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;

        for (field, value) in [
            ("api_base", &self.api_base),
            ("enrich_base", &self.enrich_base),
        ] {
            if let Some(value) = value
                && url::Url::parse(value).is_err()
            {
                bail!("Invalid config value for `{field}`: '{value}' is not a URL");
            }
        }
        for (field, value) in [
            ("enrich_script_id", &self.enrich_script_id),
            ("enrich_field", &self.enrich_field),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                bail!("Invalid config value for `{field}`: must not be empty");
            }
        }
        Ok(())
    }
}

fn check_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Ok(());
    };
    if value < min || value > max {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Config path that was consulted, if any.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional: when it does
/// not exist, no file config is used.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let cfg: FileConfig = toml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

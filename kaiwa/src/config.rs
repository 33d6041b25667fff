//! Configuration file handling.
//!
//! Configuration lives in a JSON file, `~/.kaiwa/config.json` unless another
//! path is given. Every field has a default, so a missing file or a partial
//! file is fine.
//!
//! ```json
//! {
//!   "sessions": { "ttl_secs": 86400, "sweep_interval_secs": 60 },
//!   "bus": { "inbound_capacity": 256, "broadcast_capacity": 64 },
//!   "channels": { "cli": { "enabled": true, "prompt": "> ", "user_id": "local" } }
//! }
//! ```

use crate::bus::{DEFAULT_BROADCAST_CAPACITY, DEFAULT_QUEUE_CAPACITY};
use crate::error::{ConfigError, ConfigResult};
use crate::session::DEFAULT_SESSION_TTL;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub use crate::util::config_path;

/// Sessions living longer than this draw a warning.
const LONG_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaiwaConfig {
    /// Session lifetime settings.
    pub sessions: SessionsConfig,
    /// Message bus settings.
    pub bus: BusConfig,
    /// Channel settings.
    pub channels: ChannelsConfig,
}

/// Session lifetime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Maximum session age in seconds.
    pub ttl_secs: u64,
    /// Interval of the background sweeper in seconds; `None` disables it.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            sweep_interval_secs: None,
        }
    }
}

impl SessionsConfig {
    /// The TTL as a duration.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The background sweep interval, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

/// Message bus capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Inbound queue capacity.
    pub inbound_capacity: usize,
    /// Outbound broadcast capacity.
    pub broadcast_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Terminal channel.
    pub cli: CliConfig,
}

/// Terminal channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Whether the terminal channel is started.
    pub enabled: bool,
    /// Prompt printed before each input line.
    pub prompt: String,
    /// User identifier attached to terminal messages.
    pub user_id: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt: "> ".to_string(),
            user_id: "local".to_string(),
        }
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The configuration works but is probably not what was intended.
    Warning,
    /// The configuration cannot be used.
    Error,
}

/// A problem found while checking a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field,
            message: message.into(),
        }
    }

    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "{level}: {}: {}", self.field, self.message)
    }
}

impl KaiwaConfig {
    /// Check the configuration and list everything worth reporting.
    #[must_use]
    pub fn check(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.sessions.ttl_secs == 0 {
            issues.push(ConfigIssue::error(
                "sessions.ttl_secs",
                "must be greater than zero",
            ));
        } else if self.sessions.ttl_secs > LONG_TTL_SECS {
            issues.push(ConfigIssue::warning(
                "sessions.ttl_secs",
                "sessions live longer than a week",
            ));
        }

        match self.sessions.sweep_interval_secs {
            Some(0) => issues.push(ConfigIssue::error(
                "sessions.sweep_interval_secs",
                "must be greater than zero",
            )),
            Some(_) => {}
            None => issues.push(ConfigIssue::warning(
                "sessions.sweep_interval_secs",
                "background sweeping is off; sessions only expire when messages arrive",
            )),
        }

        if self.bus.inbound_capacity == 0 {
            issues.push(ConfigIssue::error(
                "bus.inbound_capacity",
                "must be greater than zero",
            ));
        }
        if self.bus.broadcast_capacity == 0 {
            issues.push(ConfigIssue::error(
                "bus.broadcast_capacity",
                "must be greater than zero",
            ));
        }

        issues
    }

    /// Fail on the first error-level issue.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first error found.
    pub fn validate(&self) -> ConfigResult<()> {
        match self
            .check()
            .into_iter()
            .find(|issue| issue.level == IssueLevel::Error)
        {
            Some(issue) => Err(ConfigError::invalid(format!(
                "{}: {}",
                issue.field, issue.message
            ))),
            None => Ok(()),
        }
    }
}

/// Resolve an optional explicit path against the default location.
#[must_use]
pub fn resolve_path(path: Option<&Path>) -> PathBuf {
    path.map_or_else(config_path, Path::to_path_buf)
}

/// Load and validate the configuration at `path` (default location if
/// `None`). A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, or fails
/// validation.
pub async fn load_config(path: Option<&Path>) -> ConfigResult<KaiwaConfig> {
    let path = resolve_path(path);
    let config = match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            debug!(path = %path.display(), "loading config");
            serde_json::from_str::<KaiwaConfig>(&content)?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            KaiwaConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.validate()?;
    Ok(config)
}

/// Write `config` to `path` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file or its directory cannot be written.
pub async fn save_config(config: &KaiwaConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "config saved");
    Ok(())
}

/// Write a default configuration to `path` unless one exists.
///
/// Returns whether a file was written.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<bool> {
    if !force && tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    save_config(&KaiwaConfig::default(), path).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("kaiwa-test-{}", crate::util::generate_id(name)))
            .join("config.json")
    }

    #[test]
    fn test_defaults() {
        let config = KaiwaConfig::default();
        assert_eq!(config.sessions.ttl(), Duration::from_secs(24 * 60 * 60));
        assert!(config.sessions.sweep_interval().is_none());
        assert_eq!(config.bus.inbound_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.channels.cli.enabled);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: KaiwaConfig =
            serde_json::from_str(r#"{ "sessions": { "sweep_interval_secs": 30 } }"#).unwrap();

        assert_eq!(config.sessions.ttl_secs, 86_400);
        assert_eq!(
            config.sessions.sweep_interval(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.channels.cli.prompt, "> ");
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let mut config = KaiwaConfig::default();
        config.sessions.ttl_secs = 0;

        let err = assert_err!(config.validate());
        assert!(err.to_string().contains("sessions.ttl_secs"));
    }

    #[test]
    fn test_lazy_expiry_is_flagged() {
        let issues = KaiwaConfig::default().check();
        assert!(issues.iter().any(|i| {
            i.level == IssueLevel::Warning && i.field == "sessions.sweep_interval_secs"
        }));

        let mut config = KaiwaConfig::default();
        config.sessions.sweep_interval_secs = Some(60);
        assert!(config.check().is_empty());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut config = KaiwaConfig::default();
        config.bus.broadcast_capacity = 0;
        assert_err!(config.validate());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let path = temp_config_path("missing");
        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config, KaiwaConfig::default());
    }

    #[tokio::test]
    async fn test_init_save_and_load() {
        let path = temp_config_path("init");

        assert!(init_config(&path, false).await.unwrap());
        assert!(!init_config(&path, false).await.unwrap());

        let mut config = load_config(Some(&path)).await.unwrap();
        config.sessions.ttl_secs = 600;
        save_config(&config, &path).await.unwrap();

        let reloaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(reloaded.sessions.ttl(), Duration::from_secs(600));

        assert!(init_config(&path, true).await.unwrap());
        let reset = load_config(Some(&path)).await.unwrap();
        assert_eq!(reset, KaiwaConfig::default());

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_parse_error() {
        let path = temp_config_path("bad");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = load_config(Some(&path)).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}

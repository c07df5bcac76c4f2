//! TOML configuration for the support bundle service.
//!
//! Sources, first match wins: an explicit path, the `SUPPORTBUNDLES_CONFIG`
//! environment variable, `/etc/supportbundles/supportbundles.toml`, then the
//! compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SUPPORTBUNDLES_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/supportbundles/supportbundles.toml";

/// Upper bound for `retention_hours` (100 years).
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

/// Upper bound for the creation timeout and cleanup interval (one year).
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub support_bundles: SupportBundlesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded support bundle configuration");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicitly requested file must load; the fallbacks only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SUPPORTBUNDLES_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let sb = &self.support_bundles;
        anyhow::ensure!(
            (1..=MAX_RETENTION_HOURS).contains(&sb.retention_hours),
            "support_bundles.retention_hours must be between 1 and {}",
            MAX_RETENTION_HOURS
        );
        anyhow::ensure!(
            (1..=MAX_PERIOD_SECS).contains(&sb.creation_timeout_secs),
            "support_bundles.creation_timeout_secs must be between 1 and {}",
            MAX_PERIOD_SECS
        );
        anyhow::ensure!(
            (1..=MAX_PERIOD_SECS).contains(&sb.cleanup_interval_secs),
            "support_bundles.cleanup_interval_secs must be between 1 and {}",
            MAX_PERIOD_SECS
        );
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Support bundles
// ---------------------------------------------------------------------------

/// Bundle lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportBundlesConfig {
    /// When false the API is not mounted and the cleanup loop never starts.
    pub enabled: bool,
    /// Restrict the API to server administrators.
    pub server_admin_only: bool,
    /// How long a bundle is kept before the cleanup loop may remove it.
    pub retention_hours: u64,
    /// Hard deadline for one bundle creation job.
    pub creation_timeout_secs: u64,
    /// Period of the cleanup loop.
    pub cleanup_interval_secs: u64,
}

impl Default for SupportBundlesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_admin_only: true,
            retention_hours: 72,
            creation_timeout_secs: 20 * 60,
            cleanup_interval_secs: 24 * 60 * 60,
        }
    }
}

impl SupportBundlesConfig {
    /// Bundle lifetime. Clamped to `MAX_RETENTION_HOURS` for unvalidated settings.
    pub fn retention(&self) -> chrono::Duration {
        let hours = self.retention_hours.min(MAX_RETENTION_HOURS);
        // Bounded above, so the cast and the constructor cannot overflow.
        chrono::Duration::hours(hours as i64)
    }

    pub fn creation_timeout(&self) -> Duration {
        Duration::from_secs(self.creation_timeout_secs.min(MAX_PERIOD_SECS))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.min(MAX_PERIOD_SECS))
    }
}

// ---------------------------------------------------------------------------
// Server / storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP listener.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/supportbundles.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert!(cfg.support_bundles.enabled);
        assert!(cfg.support_bundles.server_admin_only);
        assert_eq!(cfg.support_bundles.retention(), chrono::Duration::hours(72));
        assert_eq!(cfg.support_bundles.creation_timeout(), Duration::from_secs(1200));
        assert_eq!(cfg.support_bundles.cleanup_interval(), Duration::from_secs(86_400));

        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.storage.db_path, "data/supportbundles.db");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);

        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg = Config::parse(
            r#"
            [support_bundles]
            enabled = false
            retention_hours = 24

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert!(!cfg.support_bundles.enabled);
        assert_eq!(cfg.support_bundles.retention_hours, 24);
        assert_eq!(cfg.support_bundles.creation_timeout_secs, 1200);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.server, ServerConfig::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::parse("[support_bundles]\ncreation_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("creation_timeout_secs"));
    }

    #[test]
    fn test_out_of_range_retention_rejected() {
        let err = Config::parse("[support_bundles]\nretention_hours = 9223372036854775807\n")
            .unwrap_err();
        assert!(err.to_string().contains("retention_hours"));

        let limit = format!("[support_bundles]\nretention_hours = {}\n", MAX_RETENTION_HOURS);
        let cfg = Config::parse(&limit).unwrap();
        assert_eq!(
            cfg.support_bundles.retention(),
            chrono::Duration::hours(MAX_RETENTION_HOURS as i64)
        );
    }

    #[test]
    fn test_unvalidated_settings_never_panic() {
        let sb = SupportBundlesConfig {
            retention_hours: u64::MAX,
            creation_timeout_secs: u64::MAX,
            cleanup_interval_secs: u64::MAX,
            ..SupportBundlesConfig::default()
        };
        assert_eq!(sb.retention(), chrono::Duration::hours(MAX_RETENTION_HOURS as i64));
        assert_eq!(sb.creation_timeout(), Duration::from_secs(MAX_PERIOD_SECS));
        assert_eq!(sb.cleanup_interval(), Duration::from_secs(MAX_PERIOD_SECS));
    }

    #[test]
    fn test_huge_cleanup_interval_rejected() {
        let err = Config::parse("[support_bundles]\ncleanup_interval_secs = 999999999999\n")
            .unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_secs"));
    }

    #[test]
    fn test_bad_bind_rejected() {
        assert!(Config::parse("[server]\nbind = \"not an address\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndb_path = \"/tmp/x.db\"").unwrap();

        let cfg = Config::resolve(Some(file.path())).unwrap();
        assert_eq!(cfg.storage.db_path, "/tmp/x.db");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::resolve(Some(Path::new("/nonexistent/supportbundles.toml"))).is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), cfg);
    }
}

//! Built-in collectors: host basics, effective settings, database facts.

use anyhow::{Context, Result};
use serde_json::json;

use super::{Collector, CollectorMeta, CollectorRegistry, RegistryError, SupportItem};
use crate::config::Config;
use crate::storage::{schema, Pool};

/// Register the collectors every deployment ships with.
pub fn register_builtin(
    registry: &mut CollectorRegistry,
    config: &Config,
    pool: Pool,
) -> Result<(), RegistryError> {
    registry.register(BasicCollector)?;
    registry.register(SettingsCollector::new(config.clone()))?;
    registry.register(DbCollector::new(pool))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// basic
// ---------------------------------------------------------------------------

/// Version and host facts. Always included.
pub struct BasicCollector;

#[async_trait::async_trait]
impl Collector for BasicCollector {
    fn meta(&self) -> CollectorMeta {
        CollectorMeta {
            uid: "basic".to_string(),
            display_name: "Basic information".to_string(),
            description: "Service version, operating system and architecture".to_string(),
            included_by_default: true,
            mandatory: true,
        }
    }

    async fn collect(&self) -> Result<SupportItem> {
        let info = json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "pid": std::process::id(),
            "hostname": hostname(),
            "collected_at": chrono::Utc::now().to_rfc3339(),
        });
        Ok(SupportItem::new("basic.json", serde_json::to_vec_pretty(&info)?))
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

// ---------------------------------------------------------------------------
// settings
// ---------------------------------------------------------------------------

/// The effective configuration, rendered back to TOML.
pub struct SettingsCollector {
    config: Config,
}

impl SettingsCollector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Collector for SettingsCollector {
    fn meta(&self) -> CollectorMeta {
        CollectorMeta {
            uid: "settings".to_string(),
            display_name: "Settings".to_string(),
            description: "Effective service configuration".to_string(),
            included_by_default: true,
            mandatory: false,
        }
    }

    async fn collect(&self) -> Result<SupportItem> {
        let text = toml::to_string_pretty(&self.config).context("failed to render settings")?;
        Ok(SupportItem::new("settings.toml", text.into_bytes()))
    }
}

// ---------------------------------------------------------------------------
// db
// ---------------------------------------------------------------------------

/// SQLite version and page statistics of the bundle database.
pub struct DbCollector {
    pool: Pool,
}

impl DbCollector {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Collector for DbCollector {
    fn meta(&self) -> CollectorMeta {
        CollectorMeta {
            uid: "db".to_string(),
            display_name: "Database information".to_string(),
            description: "SQLite version, size and bundle table statistics".to_string(),
            included_by_default: true,
            mandatory: false,
        }
    }

    async fn collect(&self) -> Result<SupportItem> {
        let pool = self.pool.clone();

        // Pool checkout and queries block; keep them off the async workers.
        let info = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
            let conn = pool.get()?;

            let sqlite_version: String =
                conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            let schema_version: Option<i64> =
                conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?;
            let bundles: i64 =
                conn.query_row("SELECT COUNT(*) FROM support_bundles", [], |r| r.get(0))?;

            Ok(json!({
                "sqlite_version": sqlite_version,
                "page_count": page_count,
                "page_size": page_size,
                "size_bytes": page_count * page_size,
                "journal_mode": journal_mode,
                "schema_version": schema_version,
                "expected_schema_version": schema::SCHEMA_VERSION,
                "support_bundles": bundles,
            }))
        })
        .await
        .context("database collector task failed")??;

        Ok(SupportItem::new("db.json", serde_json::to_vec_pretty(&info)?))
    }
}

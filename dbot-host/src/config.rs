//! Durable host configuration: the ordered list of application configs plus host settings.
//!
//! [`ConfigStore`] is the seam the lifecycle manager depends on; [`JsonConfigStore`] backs it with
//! a JSON file that is re-read on reload and rewritten (sorted keys, two-space indent) on persist.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use tracing_subscriber::filter::LevelFilter;

use crate::error::{HostError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// One hosted application as recorded in durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub id: String,
    /// `path[:TypeName]`, resolved by the registry.
    pub module: String,
    /// Credential handed to the bot client.
    #[serde(alias = "telegram_token")]
    pub token: String,
    #[serde(default)]
    pub auto_start: bool,
    /// Type-specific arguments; validated by the application type itself.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// The whole durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub app_configs: Vec<ApplicationConfig>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_global_log_level")]
    pub global_log_level: String,
    #[serde(default = "default_local_log_level")]
    pub local_log_level: String,
    #[serde(default = "default_local_log_level")]
    pub web_log_level: String,
    /// Free-form options for the process' server layer.
    #[serde(default)]
    pub server_args: Map<String, Value>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_global_log_level() -> String {
    "WARNING".to_string()
}

fn default_local_log_level() -> String {
    "INFO".to_string()
}

impl HostConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Ids must be unique; log levels must be known names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for app in &self.app_configs {
            if !seen.insert(app.id.as_str()) {
                return Err(HostError::Config(format!(
                    "duplicate application id '{}'",
                    app.id
                )));
            }
        }
        self.global_level()?;
        self.local_level()?;
        self.web_level()?;
        Ok(())
    }

    pub fn app_config(&self, id: &str) -> Option<&ApplicationConfig> {
        self.app_configs.iter().find(|app| app.id == id)
    }

    /// Replaces the record with the same id; false when no such record exists.
    pub fn set_app_config(&mut self, app: ApplicationConfig) -> bool {
        match self.app_configs.iter_mut().find(|existing| existing.id == app.id) {
            Some(slot) => {
                *slot = app;
                true
            }
            None => false,
        }
    }

    pub fn global_level(&self) -> Result<LevelFilter> {
        parse_log_level(&self.global_log_level)
    }

    pub fn local_level(&self) -> Result<LevelFilter> {
        parse_log_level(&self.local_log_level)
    }

    pub fn web_level(&self) -> Result<LevelFilter> {
        parse_log_level(&self.web_log_level)
    }

    /// Pretty JSON with sorted keys.
    pub fn to_json(&self) -> Result<String> {
        // serde_json::Map is ordered by key unless `preserve_order` is enabled.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Maps a level name (also the WARNING / CRITICAL spellings) to a tracing filter.
pub fn parse_log_level(name: &str) -> Result<LevelFilter> {
    let level = match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        "OFF" | "NOTSET" => LevelFilter::OFF,
        _ => {
            return Err(HostError::Config(format!("unknown log level '{}'", name)));
        }
    };
    Ok(level)
}

/// Configuration store the lifecycle manager reads from and the control plane writes to.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn app_config(&self, id: &str) -> Option<ApplicationConfig>;

    /// All application configs, in durable order.
    async fn app_configs(&self) -> Vec<ApplicationConfig>;

    /// Replaces the record with the same id in memory; false when unknown.
    async fn set_app_config(&self, app: ApplicationConfig) -> bool;

    /// Re-reads one record from durable storage; `NotFound` when it is gone there.
    async fn reload_app_config(&self, id: &str) -> Result<ApplicationConfig>;

    /// Re-reads the whole record from durable storage.
    async fn reload(&self) -> Result<()>;

    /// Writes the in-memory record to durable storage.
    async fn persist(&self) -> Result<()>;

    async fn snapshot(&self) -> HostConfig;
}

/// [`ConfigStore`] backed by a JSON file.
pub struct JsonConfigStore {
    path: PathBuf,
    config: RwLock<HostConfig>,
}

impl JsonConfigStore {
    /// Reads and validates `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = read_config(&path).await?;
        info!(
            path = %path.display(),
            apps = config.app_configs.len(),
            "Loaded host config"
        );
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_config(path: &Path) -> Result<HostConfig> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        HostError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    HostConfig::from_json(&text)
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn app_config(&self, id: &str) -> Option<ApplicationConfig> {
        self.config.read().await.app_config(id).cloned()
    }

    async fn app_configs(&self) -> Vec<ApplicationConfig> {
        self.config.read().await.app_configs.clone()
    }

    async fn set_app_config(&self, app: ApplicationConfig) -> bool {
        self.config.write().await.set_app_config(app)
    }

    #[instrument(skip(self))]
    async fn reload_app_config(&self, id: &str) -> Result<ApplicationConfig> {
        let fresh = read_config(&self.path).await?;
        let app = fresh
            .app_config(id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        let mut config = self.config.write().await;
        if !config.set_app_config(app.clone()) {
            // Added on disk since the last full reload; keep durable order.
            config.app_configs.push(app.clone());
        }
        debug!(app_id = %id, "Reloaded app config");
        Ok(app)
    }

    #[instrument(skip(self))]
    async fn reload(&self) -> Result<()> {
        let fresh = read_config(&self.path).await?;
        info!(apps = fresh.app_configs.len(), "Reloaded host config");
        *self.config.write().await = fresh;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn persist(&self) -> Result<()> {
        let text = self.config.read().await.to_json()?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        info!(path = %self.path.display(), "Persisted host config");
        Ok(())
    }

    async fn snapshot(&self) -> HostConfig {
        self.config.read().await.clone()
    }
}

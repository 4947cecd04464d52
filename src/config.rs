use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace};

use crate::monitoring::Severity;
use crate::notify::{Channel, DiscordNotifier, LogNotifier, NotificationSink, WebhookNotifier};
use crate::queue::QueueConfig;
use crate::storage::{FlushConfig, MemoryStorage, MonitoringStorage, StorageResult};

/// Storage backend configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[default]
    #[serde(rename = "none")]
    None,

    /// SQLite database file
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (events older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_retention_days() -> u32 {
    30
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }

    /// Open the configured backend
    pub async fn open(&self) -> StorageResult<Arc<dyn MonitoringStorage>> {
        match self {
            StorageConfig::None => {
                info!("using in-memory monitoring storage");
                Ok(Arc::new(MemoryStorage::new()))
            }
            StorageConfig::Sqlite { path, .. } => open_sqlite(path).await,
        }
    }
}

#[cfg(feature = "storage-sqlite")]
async fn open_sqlite(path: &Path) -> StorageResult<Arc<dyn MonitoringStorage>> {
    let storage = crate::storage::SqliteStorage::new(path).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "storage-sqlite"))]
async fn open_sqlite(path: &Path) -> StorageResult<Arc<dyn MonitoringStorage>> {
    Err(crate::storage::StorageError::InvalidConfig(format!(
        "cannot open {}: built without the storage-sqlite feature",
        path.display()
    )))
}

/// Where notifications of one channel go
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTarget {
    Log,
    Webhook(Webhook),
    Discord(Discord),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

impl NotificationTarget {
    pub fn sink(&self) -> Arc<dyn NotificationSink> {
        match self {
            NotificationTarget::Log => Arc::new(LogNotifier::new()),
            NotificationTarget::Webhook(webhook) => Arc::new(WebhookNotifier::new(&webhook.url)),
            NotificationTarget::Discord(discord) => Arc::new(DiscordNotifier::new(
                &discord.url,
                discord.user_id.clone(),
            )),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotificationConfig {
    pub channel: Channel,
    pub target: NotificationTarget,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct CounterConfig {
    /// Automatic counter refresh; `0` disables it
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
}

fn default_update_interval() -> u64 {
    1000
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval(),
        }
    }
}

impl CounterConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.update_interval_ms > 0).then(|| Duration::from_millis(self.update_interval_ms))
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_module")]
    pub module: String,

    /// Machine name; defaults to `MONITORING_MACHINE` or the host name
    pub machine: Option<String>,

    /// Severity threshold of the root node
    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub flush: FlushConfig,

    #[serde(default)]
    pub counters: CounterConfig,

    /// Storage configuration (optional - defaults to in-memory)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

fn default_module() -> String {
    "monitoring".to_string()
}

pub fn read_config_file(path: &str) -> anyhow::Result<MonitoringConfig> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<MonitoringConfig> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/*!
Configuration management for the morph tracker
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MorphConfig {
    /// Ledger persistence settings
    pub storage: StorageConfig,
    /// Death polling cadence
    pub polling: PollingConfig,
    /// Processed-marker bookkeeping
    pub dedup: DedupConfig,
    /// Model application and command behavior
    pub morph: MorphSettings,
    /// Extra unlock notification outputs
    pub notifications: Vec<NoticeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the ledger file, created on startup
    pub data_dir: PathBuf,
    /// Ledger file name inside `data_dir`
    pub file_name: String,
    /// Refuse to start when the data directory cannot be prepared
    pub require_persistence: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay before the first poll in milliseconds
    pub initial_delay_ms: u64,
    /// Poll period in milliseconds
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a processed marker is remembered after it was last observed.
    /// Zero keeps every marker forever.
    pub retention_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MorphSettings {
    /// Model applied when a player unmorphs
    pub default_model: String,
    /// Delay before the override is dropped and the skin resent after unmorphing
    pub skin_refresh_delay_ms: u64,
    /// Permission node required by `/morph unlock <id>`
    pub unlock_permission: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NoticeConfig {
    /// Output sink type
    pub sink: NoticeSinkKind,
    /// Whether this output is enabled
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum NoticeSinkKind {
    Journal { path: PathBuf, pretty: bool },
    Webhook { url: String, auth_token: Option<String> },
}

fn enabled_by_default() -> bool {
    true
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            polling: PollingConfig::default(),
            dedup: DedupConfig::default(),
            morph: MorphSettings::default(),
            notifications: vec![NoticeConfig {
                sink: NoticeSinkKind::Journal {
                    path: PathBuf::from("./morph-data/unlocks.jsonl"),
                    pretty: false,
                },
                enabled: false,
            }],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./morph-data"),
            file_name: "morphs.json".to_string(),
            require_persistence: false,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            interval_ms: 200,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { retention_ms: 60_000 }
    }
}

impl Default for MorphSettings {
    fn default() -> Self {
        Self {
            default_model: "player".to_string(),
            skin_refresh_delay_ms: 500,
            unlock_permission: "morph.unlock".to_string(),
        }
    }
}

impl MorphConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid("polling.interval_ms must be positive".into()));
        }
        if self.storage.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.file_name must not be empty".into()));
        }
        if self.morph.default_model.trim().is_empty() {
            return Err(ConfigError::Invalid("morph.default_model must not be empty".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl PollingConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl DedupConfig {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_ms > 0).then(|| Duration::from_millis(self.retention_ms))
    }
}

impl MorphSettings {
    pub fn skin_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.skin_refresh_delay_ms)
    }
}

/// Read and validate a TOML config file
pub async fn load_config<P: AsRef<Path>>(config_path: P) -> Result<MorphConfig, ConfigError> {
    let path = config_path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config: MorphConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

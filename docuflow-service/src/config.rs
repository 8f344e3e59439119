use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};

const ENV_PREFIX: &str = "DOCUFLOW";

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
/// These settings affect server binding, storage, or the AI client and require restart to change
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_ai")]
    pub ai: AiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Directory holding raw uploaded files
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }
}

/// AI service (Ollama) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-attempt timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Total attempts for transient failures, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles after each attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl AiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_transform")]
    pub transform: TransformConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,
}

/// Transform router tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Documents whose text exceeds this many characters are split into chunks
    #[serde(default = "default_chunk_threshold_chars")]
    pub chunk_threshold_chars: usize,

    /// Upper bound on summary-of-summaries rounds
    #[serde(default = "default_max_summary_depth")]
    pub max_summary_depth: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        default_transform()
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            transform: default_transform(),
            limits: default_limits(),
        }
    }
}

// ==================== DynamicConfig Settings Keys ====================

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &[
    "transform.chunk_threshold_chars",
    "transform.max_summary_depth",
    "limits.max_document_size_bytes",
];

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Smallest value a setting accepts
    pub fn min_setting_value(key: &str) -> u64 {
        match key {
            "transform.chunk_threshold_chars" => 1,
            _ => 0,
        }
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        map.insert(
            "transform.chunk_threshold_chars".to_string(),
            serde_json::json!(self.transform.chunk_threshold_chars),
        );
        map.insert(
            "transform.max_summary_depth".to_string(),
            serde_json::json!(self.transform.max_summary_depth),
        );
        map.insert(
            "limits.max_document_size_bytes".to_string(),
            serde_json::json!(self.limits.max_document_size_bytes),
        );

        map
    }

    /// Apply DB overrides on top of file/env values
    pub fn merge_from_db(&mut self, settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in settings {
            self.apply_setting(key, value);
        }
    }

    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            "transform.chunk_threshold_chars" => {
                if let Some(v) = value.as_u64().filter(|v| *v > 0) {
                    self.transform.chunk_threshold_chars = v as usize;
                }
            }
            "transform.max_summary_depth" => {
                if let Some(v) = value.as_u64() {
                    self.transform.max_summary_depth = v as u32;
                }
            }
            "limits.max_document_size_bytes" => {
                if let Some(v) = value.as_u64() {
                    self.limits.max_document_size_bytes = v;
                }
            }
            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    /// Build a runtime config directly from already-resolved parts
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load config from all sources with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);

        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn builder() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    builder()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    builder()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(crate) fn default_ai() -> AiConfig {
    AiConfig {
        base_url: default_ai_url(),
        model: default_model(),
        temperature: default_temperature(),
        request_timeout_secs: default_request_timeout_secs(),
        max_attempts: default_max_attempts(),
        retry_backoff_ms: default_retry_backoff_ms(),
    }
}

fn default_ai_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_transform() -> TransformConfig {
    TransformConfig {
        chunk_threshold_chars: default_chunk_threshold_chars(),
        max_summary_depth: default_max_summary_depth(),
    }
}

fn default_chunk_threshold_chars() -> usize {
    12_000
}

fn default_max_summary_depth() -> u32 {
    4
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
    }
}

fn default_max_document_size() -> u64 {
    52_428_800 // 50MB
}

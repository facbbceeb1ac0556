use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub nlu: Nlu,
    pub speech: Speech,
    pub cache: Cache,
    pub journal: Journal,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nlu {
    pub endpoint: String,
    pub bot_id: String,
    pub bot_alias_id: String,
    /// Bot language name, e.g. "English"; mapped to the engine's locale id.
    #[serde(default = "default_language")]
    pub language: String,
    pub timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speech {
    pub endpoint: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    pub timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    pub store: Store,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub jsonl_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

fn default_language() -> String {
    "English".to_string()
}

fn default_voice() -> String {
    "Ricardo".to_string()
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_retry_max_attempts() -> usize {
    1
}

fn default_cache_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    match cfg.cache.store.kind.as_str() {
        "memory" => {
            if cfg.cache.store.sqlite_path.is_some() || cfg.cache.store.dir.is_some() {
                return Err(ConfigError::UnsupportedConfig(
                    "cache.store.sqlite_path and cache.store.dir are not supported when cache.store.type=memory"
                        .to_string(),
                ));
            }
        }
        "sqlite" => {
            if is_blank(cfg.cache.store.sqlite_path.as_deref()) {
                return Err(ConfigError::UnsupportedConfig(
                    "cache.store.sqlite_path is required when cache.store.type=sqlite".to_string(),
                ));
            }
        }
        "fs" => {
            if is_blank(cfg.cache.store.dir.as_deref()) {
                return Err(ConfigError::UnsupportedConfig(
                    "cache.store.dir is required when cache.store.type=fs".to_string(),
                ));
            }
        }
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "cache.store.type={other} is not implemented; supported: memory, sqlite, fs"
            )));
        }
    }
    if cfg.nlu.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "nlu.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.speech.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "speech.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.nlu.timeout_ms == 0 || cfg.speech.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "nlu.timeout_ms and speech.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.speech.default_voice.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "speech.default_voice must not be empty".to_string(),
        ));
    }
    if cfg.journal.jsonl_path.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "journal.jsonl_path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

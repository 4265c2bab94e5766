use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "PLANTID_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/plantid.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    Env { key: String, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub identify: IdentifyConfig,
    pub batch: BatchConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-file upload limit.
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyConfig {
    pub default_topk: usize,
    pub max_topk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_files: usize,
    pub topk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Bearer token -> identity.
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub identify_per_minute: u32,
    pub batch_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 16 * 1024 * 1024,
            allowed_extensions: crate::imaging::ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
        }
    }
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            default_topk: 5,
            max_topk: 20,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            topk: 3,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let api_keys = [("demo_key", "demo_user"), ("test_key", "test_user")]
            .into_iter()
            .map(|(token, identity)| (token.to_string(), identity.to_string()))
            .collect();
        Self {
            enabled: true,
            api_keys,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            identify_per_minute: 10,
            batch_per_minute: 5,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/plantid.pt"),
            labels_path: PathBuf::from("models/labels.tsv"),
            input_size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl AppConfig {
    /// Reads the YAML file named by `PLANTID_CONFIG` (or the default path when
    /// it exists), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => {
                log::info!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading config from {}", path.display());
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(ttl) = lookup("PLANTID_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("PLANTID_CACHE_TTL_SECS", &ttl)?;
        }
        if let Some(path) = lookup("PLANTID_MODEL_PATH") {
            self.model.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("PLANTID_LABELS_PATH") {
            self.model.labels_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identify.max_topk == 0 {
            return Err(ConfigError::Invalid("identify.max_topk must be positive".into()));
        }
        if self.identify.default_topk == 0 || self.identify.default_topk > self.identify.max_topk {
            return Err(ConfigError::Invalid(format!(
                "identify.default_topk must be within 1..={}",
                self.identify.max_topk
            )));
        }
        if self.batch.max_files == 0 {
            return Err(ConfigError::Invalid("batch.max_files must be positive".into()));
        }
        if self.batch.topk == 0 || self.batch.topk > self.identify.max_topk {
            return Err(ConfigError::Invalid(format!(
                "batch.topk must be within 1..={}",
                self.identify.max_topk
            )));
        }
        if self.auth.enabled && self.auth.api_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "auth is enabled but no api_keys are configured".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let config = AppConfig::default();
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.batch.max_files, 10);
        assert_eq!(config.batch.topk, 3);
        assert_eq!(config.identify.default_topk, 5);
        assert_eq!(config.identify.max_topk, 20);
        assert_eq!(config.rate_limit.identify_per_minute, 10);
        assert_eq!(config.rate_limit.batch_per_minute, 5);
        assert_eq!(config.auth.api_keys.get("demo_key").map(String::as_str), Some("demo_user"));
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
server:
  port: 9100
cache:
  ttl_secs: 120
rate_limit:
  enabled: false
auth:
  api_keys:
    secret: alice
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cache.ttl_secs, 120);
        assert!(config.cache.enabled);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.batch_per_minute, 5);
        assert_eq!(config.auth.api_keys.len(), 1);
        assert!(config.auth.enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "PORT" => Some("8123".into()),
                "PLANTID_CACHE_TTL_SECS" => Some("5".into()),
                "PLANTID_MODEL_PATH" => Some("/opt/model.pt".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8123");
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.model.model_path, PathBuf::from("/opt/model.pt"));
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn validation_catches_bad_limits() {
        let mut config = AppConfig::default();
        config.batch.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.identify.default_topk = 50;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.api_keys.clear();
        assert!(config.validate().is_err());
        config.auth.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plantid.yaml");
        std::fs::write(&path, "batch:\n  max_files: 4\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.batch.max_files, 4);

        let missing = AppConfig::from_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}

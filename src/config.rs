//! Configuration loader and validator for the publishing pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub filehost: FileHost,
    pub storage: Storage,
    pub graph: Graph,
}

/// App-level settings for the batch runner and trigger endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub listen_addr: String,
    pub trigger_secret: String,
    pub batch_cap: u32,
    pub http_timeout_seconds: u64,
}

/// Third-party file host holding original upload binaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHost {
    pub base_url: String,
    pub api_key: String,
}

/// Durable object storage where resolved assets are materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub base_url: String,
    pub bucket: String,
    pub service_key: String,
}

/// Graph API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Graph {
    pub base_url: String,
    pub version: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.listen_addr must be non-empty"));
    }
    if cfg.app.trigger_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("app.trigger_secret must be non-empty"));
    }
    if cfg.app.batch_cap == 0 {
        return Err(ConfigError::Invalid("app.batch_cap must be > 0"));
    }
    if cfg.app.http_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_seconds must be > 0"));
    }

    if cfg.filehost.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("filehost.base_url must be non-empty"));
    }
    if cfg.filehost.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("filehost.api_key must be non-empty"));
    }

    if cfg.storage.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.base_url must be non-empty"));
    }
    if cfg.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.bucket must be non-empty"));
    }
    if cfg.storage.service_key.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.service_key must be non-empty"));
    }

    if cfg.graph.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.base_url must be non-empty"));
    }
    if cfg.graph.version.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.version must be non-empty"));
    }

    Ok(())
}

/// Returns a complete example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen_addr: "127.0.0.1:8080"
  trigger_secret: "CHANGE_ME_SHARED_SECRET"
  batch_cap: 10
  http_timeout_seconds: 30

filehost:
  base_url: "https://files.example.com"
  api_key: "YOUR_FILE_HOST_API_KEY"

storage:
  base_url: "https://storage.example.com"
  bucket: "social-media"
  service_key: "YOUR_STORAGE_SERVICE_KEY"

graph:
  base_url: "https://graph.facebook.com"
  version: "v19.0"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_trigger_secret() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.trigger_secret = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("trigger_secret")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_batch_cap() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.batch_cap = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_cap")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_collaborator_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.filehost.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("filehost.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.storage.bucket = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.graph.version = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.batch_cap, 10);
        assert_eq!(cfg.graph.version, "v19.0");
    }
}

//! Configuration loader and validator for the dashboard service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
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
    pub server: Server,
    pub covid: Covid,
    pub news: News,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// How often the scheduler re-reads the registry for new entries.
    pub poll_interval_ms: u64,
    /// Cap on the news rate-limit backoff.
    pub max_backoff_seconds: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub listen: String,
}

/// Which areas the COVID statistics queries target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Covid {
    pub local_area: String,
    pub local_area_type: String,
    pub nation: String,
}

/// News query settings. The API key lives in the dashboard document, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct News {
    pub search_terms: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Location of the dashboard document inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("dashboard.json")
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
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    // max_backoff_seconds is u64; it's inherently >= 0

    if cfg.server.listen.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("server.listen must be a host:port address"));
    }

    if cfg.covid.local_area.trim().is_empty() {
        return Err(ConfigError::Invalid("covid.local_area must be non-empty"));
    }
    if cfg.covid.local_area_type.trim().is_empty() {
        return Err(ConfigError::Invalid("covid.local_area_type must be non-empty"));
    }
    if cfg.covid.nation.trim().is_empty() {
        return Err(ConfigError::Invalid("covid.nation must be non-empty"));
    }

    if cfg.news.search_terms.trim().is_empty() {
        return Err(ConfigError::Invalid("news.search_terms must be non-empty"));
    }

    Ok(())
}

/// Canonical example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000
  max_backoff_seconds: 3600

server:
  listen: "127.0.0.1:8080"

covid:
  local_area: "Exeter"
  local_area_type: "ltla"
  nation: "England"

news:
  search_terms: "Covid COVID-19 coronavirus"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_poll_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_ms")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_listen_addr() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.server.listen = "not-an-addr".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("server.listen")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_areas() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.covid.local_area = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.covid.nation = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.news.search_terms = "".into();
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
        assert!(cfg.store_path().starts_with(&data_path));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.covid.local_area, "Exeter");
        assert_eq!(cfg.app.poll_interval_ms, 1000);
    }
}

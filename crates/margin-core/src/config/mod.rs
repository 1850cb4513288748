//! Client configuration for hosts embedding the sync queue.
//!
//! A JSON file supplies the base values; `MARGIN_*` environment variables
//! override them. Secrets (auth tokens) are never stored here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{normalize_http_url, normalize_text_option};

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

pub const ENV_API_BASE_URL: &str = "MARGIN_API_BASE_URL";
pub const ENV_QUEUE_PATH: &str = "MARGIN_QUEUE_PATH";
pub const ENV_STORAGE: &str = "MARGIN_STORAGE";
pub const ENV_FLUSH_INTERVAL_SECS: &str = "MARGIN_FLUSH_INTERVAL_SECS";
pub const ENV_PROBE_URL: &str = "MARGIN_PROBE_URL";

/// Backend used to persist the action queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Libsql,
    Json,
}

impl StorageBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Libsql => "libsql",
            Self::Json => "json",
        }
    }

    /// Default queue file name for this backend
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Libsql => "queue.db",
            Self::Json => "queue.json",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "libsql" | "sqlite" => Ok(Self::Libsql),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!(
                "unknown storage backend '{other}' (expected libsql or json)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the annotation REST API; offline-only when unset
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Queue file location; hosts pick a platform default when unset
    #[serde(default)]
    pub queue_path: Option<PathBuf>,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Health URL probed for connectivity; derived from the API URL when unset
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

const fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            storage: StorageBackend::default(),
            queue_path: None,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_url: None,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl ClientConfig {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!("failed to parse {}: {error}", path.display()))
        })?;
        config.validated()
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&self.clone().validated()?)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Apply `MARGIN_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| normalize_text_option(lookup(key));

        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = Some(url);
        }
        if let Some(path) = lookup(ENV_QUEUE_PATH) {
            self.queue_path = Some(PathBuf::from(path));
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        if let Some(secs) = lookup(ENV_FLUSH_INTERVAL_SECS) {
            self.flush_interval_secs = secs.parse().map_err(|_| {
                Error::Config(format!(
                    "{ENV_FLUSH_INTERVAL_SECS} must be a whole number of seconds, got '{secs}'"
                ))
            })?;
        }
        if let Some(url) = lookup(ENV_PROBE_URL) {
            self.probe_url = Some(url);
        }
        self.validated()
    }

    /// Normalize URLs and check numeric bounds
    pub fn validated(mut self) -> Result<Self> {
        self.api_base_url = normalize_url_field(self.api_base_url, "api_base_url")?;
        self.probe_url = normalize_url_field(self.probe_url, "probe_url")?;

        for (field, value) in [
            ("flush_interval_secs", self.flush_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("probe_interval_secs", self.probe_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }
        Ok(self)
    }

    /// Probe target: explicit `probe_url`, else the API base URL
    #[must_use]
    pub fn effective_probe_url(&self) -> Option<String> {
        self.probe_url.clone().or_else(|| self.api_base_url.clone())
    }

    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

fn normalize_url_field(value: Option<String>, field: &str) -> Result<Option<String>> {
    let Some(value) = normalize_text_option(value) else {
        return Ok(None);
    };
    normalize_http_url(&value)
        .map(Some)
        .ok_or_else(|| Error::Config(format!("{field} must include http:// or https://")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let config = ClientConfig::load_from_path(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
    }

    #[test]
    fn save_and_load_normalizes_urls() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("margin").join("config.json");
        let config = ClientConfig {
            api_base_url: Some(" https://api.example.com/ ".to_string()),
            storage: StorageBackend::Json,
            ..ClientConfig::default()
        };

        config.save_to_path(&path).unwrap();
        let loaded = ClientConfig::load_from_path(&path).unwrap();

        assert_eq!(loaded.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(loaded.storage, StorageBackend::Json);
    }

    #[test]
    fn rejects_unknown_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url":null,"turso_url":"x"}"#).unwrap();

        let error = ClientConfig::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let config = ClientConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..ClientConfig::default()
        }
        .with_overrides(lookup(&[
            (ENV_API_BASE_URL, "https://env.example.com/"),
            (ENV_STORAGE, "JSON"),
            (ENV_FLUSH_INTERVAL_SECS, "5"),
            (ENV_QUEUE_PATH, "/tmp/margin/queue.json"),
            (ENV_PROBE_URL, "   "),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.storage, StorageBackend::Json);
        assert_eq!(config.flush_interval_secs, 5);
        assert_eq!(
            config.queue_path.as_deref(),
            Some(Path::new("/tmp/margin/queue.json"))
        );
        assert_eq!(config.probe_url, None);
        assert_eq!(
            config.effective_probe_url().as_deref(),
            Some("https://env.example.com")
        );
    }

    #[test]
    fn invalid_overrides_are_errors() {
        let bad_interval = ClientConfig::default()
            .with_overrides(lookup(&[(ENV_FLUSH_INTERVAL_SECS, "soon")]))
            .unwrap_err();
        assert!(bad_interval.to_string().contains(ENV_FLUSH_INTERVAL_SECS));

        let bad_storage = ClientConfig::default()
            .with_overrides(lookup(&[(ENV_STORAGE, "postgres")]))
            .unwrap_err();
        assert!(bad_storage.to_string().contains("postgres"));

        let bad_url = ClientConfig::default()
            .with_overrides(lookup(&[(ENV_API_BASE_URL, "api.example.com")]))
            .unwrap_err();
        assert!(bad_url.to_string().contains("http://"));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = ClientConfig {
            flush_interval_secs: 0,
            ..ClientConfig::default()
        };
        assert!(config.validated().is_err());
    }
}

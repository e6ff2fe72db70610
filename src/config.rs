use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Directory holding the persisted session keys
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// Seconds subtracted from a token's expiry before judging liveness
    #[serde(default)]
    pub token_leeway_secs: u64,
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            storage_dir: None,
            token_leeway_secs: 0,
            event_log: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// A config file as read from disk; only the fields present override
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    api_url: Option<String>,
    storage_dir: Option<PathBuf>,
    token_leeway_secs: Option<u64>,
    event_log: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.acad/config.local.toml) > project (.acad/config.toml) > user (~/.acad/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".acad").join("config.toml");
            if user_config.exists() {
                config.merge(Self::read_layer(&user_config)?);
            }
        }

        let project_config = Path::new(".acad").join("config.toml");
        if project_config.exists() {
            config.merge(Self::read_layer(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(".acad").join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::read_layer(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge(Self::read_layer(path)?);
        Ok(config)
    }

    fn read_layer(path: &Path) -> Result<ConfigLayer> {
        let content = std::fs::read_to_string(path)?;
        let layer: ConfigLayer = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        Ok(layer)
    }

    /// Merge a layer into this config (layer takes priority where set)
    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(url) = layer.api_url {
            self.api_url = url;
        }
        if layer.storage_dir.is_some() {
            self.storage_dir = layer.storage_dir;
        }
        if let Some(leeway) = layer.token_leeway_secs {
            self.token_leeway_secs = leeway;
        }
        if layer.event_log.is_some() {
            self.event_log = layer.event_log;
        }
        if let Some(timeout) = layer.timeout_ms {
            self.timeout_ms = timeout;
        }
    }

    /// Directory of the session store, defaulting to ~/.acad/session
    pub fn storage_path(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".acad")
                .join("session")
        })
    }

    /// Event log file, defaulting to ~/.acad/events.jsonl
    pub fn event_log_path(&self) -> PathBuf {
        self.event_log.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".acad")
                .join("events.jsonl")
        })
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api_url".to_string(),
                message: format!(
                    "Invalid URL '{}', expected http:// or https://",
                    self.api_url
                ),
            });
        }

        if self.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

//! Application configuration
//!
//! One YAML document with a section per concern. Every field has a default,
//! so an empty or partial file is valid.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cdp_adapter::CdpConfig;
use extensions_bridge::BridgeConfig;
use flow_model::RunSettings;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

pub const GMAIL_TOKEN_ENV: &str = "FLOWPILOT_GMAIL_TOKEN";
const CONFIG_DIR_NAME: &str = "flowpilot";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub run: RunSettings,
    pub browser: CdpConfig,
    pub bridge: BridgeConfig,
    pub storage: StorageConfig,
    pub flow: FlowConfig,
    pub mail: MailConfig,
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Holds the progress mirror and the variables file
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".flowpilot"),
        }
    }
}

impl StorageConfig {
    pub fn mirror_path(&self) -> PathBuf {
        self.state_dir.join("progress.json")
    }

    pub fn variables_path(&self) -> PathBuf {
        self.state_dir.join("variables.json")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowConfig {
    /// Flow run by `run` and `POST /api/run`; the built-in flow when unset
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailConfig {
    /// Environment variable holding the Gmail OAuth access token
    pub token_env: String,
    pub base_url: String,
    /// Appended to the subject search, e.g. `newer_than:1h`
    pub query_suffix: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            token_env: GMAIL_TOKEN_ENV.to_string(),
            base_url: "https://gmail.googleapis.com/gmail/v1/users/me".to_string(),
            query_suffix: "newer_than:1d".to_string(),
        }
    }
}

impl MailConfig {
    pub fn token(&self) -> Option<String> {
        env::var(&self.token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub found: bool,
}

/// `--config`, then `./config/config.yaml`, then the user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("config/config.yaml");
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.yaml"))
}

pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let Some(path) = resolve_config_path(explicit) else {
        warn!("no config directory available; using defaults");
        return Ok(LoadedConfig {
            config: AppConfig::default(),
            path: PathBuf::from("config/config.yaml"),
            found: false,
        });
    };

    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        warn!("Config file not found, using defaults: {}", path.display());
        return Ok(LoadedConfig {
            config: AppConfig::default(),
            path,
            found: false,
        });
    }

    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(LoadedConfig {
        config,
        path,
        found: true,
    })
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    let config: AppConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

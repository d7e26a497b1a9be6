//! TOML configuration for the carelink binary

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use carelink_core::LiveConfig;

/// Top-level config file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub server: ServerSection,
    pub upstream: UpstreamSection,
    pub timeouts: LiveConfig,
    pub session: SessionSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub language_code: Option<String>,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            url: None,
            model: None,
            voice: None,
            language_code: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Where the resumption handle is persisted
    pub file: Option<PathBuf>,
}

impl CliConfig {
    /// Loads config from `path`, or from the default location. An explicit
    /// path must exist; a missing default file just yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => {
                let Some(path) = Self::default_path() else {
                    return Ok(Self::default());
                };
                if path.exists() {
                    Self::read(&path)
                        .with_context(|| format!("failed to load config from {}", path.display()))
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("carelink").join("config.toml"))
    }

    /// Where to persist the resumption handle
    pub fn session_file(&self) -> PathBuf {
        self.session.file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("carelink")
                .join("session.json")
        })
    }
}

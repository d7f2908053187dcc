//! Service configuration.
//!
//! Layered: `cla.toml` → environment → CLI flags. Every field has a default,
//! so running without a config file is fine.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! base_url = "https://cla.example.com"
//!
//! [github]
//! api_url = "https://api.github.com"
//! user_agent = "cla-assistant"
//! per_page = 100
//!
//! [database]
//! path = "cla.db"
//!
//! [logging]
//! format = "json"
//! filter = "cla_assistant=debug,tower_http=info"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cla::github::{DEFAULT_API_URL, DEFAULT_USER_AGENT, MAX_PER_PAGE};

pub const DEFAULT_CONFIG_FILE: &str = "cla.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public address of the CLA pages, used in status links and comments.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Page size for pull request listings (capped at 100).
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_per_page() -> u32 {
    MAX_PER_PAGE
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_agent: default_user_agent(),
            per_page: default_per_page(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cla.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "cla_assistant=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

/// Parsed `cla.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ClaConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cla.toml")
    }

    /// Load from `path`, or from `cla.toml` in the working directory when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::read(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Apply `CLA_*` / `GITHUB_API_URL` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CLA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CLA_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid CLA_PORT '{}'", port))?;
        }
        if let Some(base_url) = lookup("CLA_BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Some(path) = lookup("CLA_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(api_url) = lookup("GITHUB_API_URL") {
            self.github.api_url = api_url;
        }
        if let Some(format) = lookup("CLA_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.github.per_page == 0 || self.github.per_page > MAX_PER_PAGE {
            warnings.push(format!(
                "github.per_page {} is outside 1..={}, it will be clamped",
                self.github.per_page, MAX_PER_PAGE
            ));
        }
        if !self.server.base_url.starts_with("http://") && !self.server.base_url.starts_with("https://") {
            warnings.push(format!(
                "server.base_url '{}' is not an http(s) url; status links will be broken",
                self.server.base_url
            ));
        }
        warnings
    }
}

//! Application settings, loaded from YAML.
//!
//! ```yaml
//! title: Clipboard API
//! version: 1.2.0
//! path_schema: lowercase_underscore
//! log:
//!   verbose: true
//! ```
//!
//! Every key is optional.

use crate::path_schema::PathSchemaKind;
use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contact block of the OpenAPI `info` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// License block of the OpenAPI `info` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`
    pub level: String,
    /// Shorthand for `debug`
    pub verbose: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> LevelFilter {
        if self.verbose {
            return LevelFilter::Debug;
        }
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    pub version: String,
    pub description: String,
    pub contact: Option<ContactConfig>,
    pub license: Option<LicenseConfig>,
    /// Where the OpenAPI document is served
    pub openapi_url: String,
    pub docs_enabled: bool,
    pub path_schema: PathSchemaKind,
    pub disable_response_validation: bool,
    pub shutdown_timeout_secs: u64,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "FastApi Reflect".to_string(),
            version: "0.1.0".to_string(),
            description: String::new(),
            contact: None,
            license: None,
            openapi_url: "/openapi.json".to_string(),
            docs_enabled: true,
            path_schema: PathSchemaKind::default(),
            disable_response_validation: false,
            shutdown_timeout_secs: 10,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse application config")
    }

    /// Load settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML for this
    /// structure.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Initialise `env_logger` at the configured level.
///
/// `RUST_LOG` still applies on top. Initialising twice is a no-op.
pub fn init_logging(config: &LogConfig) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(config.level_filter())
        .try_init();
}

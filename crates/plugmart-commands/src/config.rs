//! Operator configuration for the plugin market.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use plugmart_catalog::CATALOG_FETCH_TIMEOUT_MS_DEFAULT;
use plugmart_installer::{DOWNLOAD_TIMEOUT_MS_DEFAULT, MIRROR_PROBE_TIMEOUT_MS_DEFAULT};

pub const RELEASE_LOOKUP_TIMEOUT_MS_DEFAULT: u64 =
    plugmart_installer::source::RELEASE_LOOKUP_TIMEOUT_MS_DEFAULT;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Market settings: catalog endpoints tried in order, mirror prefixes
/// ranked per install, the live plugins directory, and per-stage network
/// timeouts. Every field has a default so a missing config file works.
pub struct MarketConfig {
    #[serde(default = "default_api_endpoints")]
    pub api_endpoints: Vec<String>,
    #[serde(default)]
    pub mirror_prefixes: Vec<String>,
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
    #[serde(default = "default_catalog_timeout_ms")]
    pub catalog_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            api_endpoints: default_api_endpoints(),
            mirror_prefixes: Vec::new(),
            plugins_dir: default_plugins_dir(),
            catalog_timeout_ms: default_catalog_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            download_timeout_ms: default_download_timeout_ms(),
            release_timeout_ms: default_release_timeout_ms(),
        }
    }
}

fn default_api_endpoints() -> Vec<String> {
    vec!["https://api.plugmart.dev/plugins".to_string()]
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("./data/plugins")
}

fn default_catalog_timeout_ms() -> u64 {
    CATALOG_FETCH_TIMEOUT_MS_DEFAULT
}

fn default_probe_timeout_ms() -> u64 {
    MIRROR_PROBE_TIMEOUT_MS_DEFAULT
}

fn default_download_timeout_ms() -> u64 {
    DOWNLOAD_TIMEOUT_MS_DEFAULT
}

fn default_release_timeout_ms() -> u64 {
    RELEASE_LOOKUP_TIMEOUT_MS_DEFAULT
}

pub fn default_market_config_path() -> Result<PathBuf> {
    Ok(std::env::current_dir()
        .context("failed to resolve current working directory")?
        .join(".plugmart")
        .join("market.json"))
}

/// Loads the market config; an absent file yields the defaults.
pub fn load_market_config(path: &Path) -> Result<MarketConfig> {
    if !path.exists() {
        return Ok(MarketConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read market config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse market config {}", path.display()))
}

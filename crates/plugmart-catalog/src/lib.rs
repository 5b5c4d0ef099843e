//! Plugin catalog fetch, search, and resolution.
//!
//! The catalog is always handled as an immutable [`CatalogSnapshot`]
//! fetched on demand from an ordered list of API endpoints; concurrent
//! readers never observe a half-updated listing. Entries lacking a
//! repository URL are dropped at parse time because they cannot be
//! installed.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use plugmart_core::current_unix_timestamp_ms;

pub mod render;

pub use render::{render_market_page, render_search_results};

pub const CATALOG_PAGE_SIZE: usize = 10;
pub const CATALOG_FETCH_TIMEOUT_MS_DEFAULT: u64 = 15_000;
pub const CATALOG_USER_AGENT: &str = "plugmart/catalog-fetch";

#[derive(Debug, Clone, Deserialize)]
struct RawCatalogEntry {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    stars: Option<u64>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// One installable catalog row. `key` doubles as the plugin's installed
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: String,
    pub repo: String,
    pub desc: Option<String>,
    pub author: Option<String>,
    pub stars: Option<u64>,
    pub updated_at: Option<String>,
}

/// Immutable catalog listing sorted by key, stamped with its fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    fetched_at_unix_ms: u64,
    entries: Vec<CatalogEntry>,
}

impl CatalogSnapshot {
    pub fn from_entries(mut entries: Vec<CatalogEntry>, fetched_at_unix_ms: u64) -> Self {
        entries.sort_by(|left, right| left.key.cmp(&right.key));
        Self {
            fetched_at_unix_ms,
            entries,
        }
    }

    pub fn fetched_at_unix_ms(&self) -> u64 {
        self.fetched_at_unix_ms
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_pages(&self) -> usize {
        self.entries.len().div_ceil(CATALOG_PAGE_SIZE).max(1)
    }

    /// Resolves a 1-based listing index or an exact key to its entry.
    pub fn resolve(&self, key_or_index: &str) -> Result<&CatalogEntry> {
        if let Ok(index) = key_or_index.parse::<usize>() {
            if index >= 1 && index <= self.entries.len() {
                return Ok(&self.entries[index - 1]);
            }
        }
        self.entries
            .iter()
            .find(|entry| entry.key == key_or_index)
            .ok_or_else(|| anyhow!("plugin '{}' not found in catalog", key_or_index))
    }

    /// Case-insensitive substring search over key, description, and
    /// author. Each hit keeps its 1-based position in the full listing so
    /// install hints stay valid.
    pub fn search(&self, term: &str) -> Vec<(usize, &CatalogEntry)> {
        let needle = term.to_lowercase();
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.key.to_lowercase().contains(&needle)
                    || entry
                        .desc
                        .as_deref()
                        .is_some_and(|desc| desc.to_lowercase().contains(&needle))
                    || entry
                        .author
                        .as_deref()
                        .is_some_and(|author| author.to_lowercase().contains(&needle))
            })
            .map(|(index, entry)| (index + 1, entry))
            .collect()
    }
}

/// Parses a catalog payload: a JSON object mapping plugin key to metadata.
/// Rows that are not objects or that lack a `repo` field are skipped.
pub fn parse_catalog_snapshot(raw: &str, fetched_at_unix_ms: u64) -> Result<CatalogSnapshot> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("catalog payload is not valid JSON")?;
    let map = value
        .as_object()
        .ok_or_else(|| anyhow!("catalog payload is not a JSON object"))?;

    let mut entries = Vec::with_capacity(map.len());
    for (key, row) in map {
        let Ok(raw_entry) = serde_json::from_value::<RawCatalogEntry>(row.clone()) else {
            tracing::debug!(key = key.as_str(), "skipping malformed catalog row");
            continue;
        };
        let Some(repo) = raw_entry.repo.filter(|repo| !repo.is_empty()) else {
            tracing::debug!(key = key.as_str(), "skipping catalog row without repo");
            continue;
        };
        entries.push(CatalogEntry {
            key: key.clone(),
            repo,
            desc: raw_entry.desc,
            author: raw_entry.author,
            stars: raw_entry.stars,
            updated_at: raw_entry.updated_at,
        });
    }
    Ok(CatalogSnapshot::from_entries(entries, fetched_at_unix_ms))
}

/// Fetches a fresh snapshot, trying each endpoint in order and returning
/// the first parseable response. Fails only when every endpoint failed,
/// carrying the last cause.
pub async fn fetch_catalog_snapshot(
    http: &reqwest::Client,
    endpoints: &[String],
    timeout: Duration,
) -> Result<CatalogSnapshot> {
    if endpoints.is_empty() {
        bail!("no catalog endpoints configured");
    }

    let mut last_error = None;
    for endpoint in endpoints {
        match fetch_catalog_payload(http, endpoint, timeout).await {
            Ok(raw) => match parse_catalog_snapshot(&raw, current_unix_timestamp_ms()) {
                Ok(snapshot) => {
                    tracing::info!(
                        endpoint = endpoint.as_str(),
                        plugins = snapshot.len(),
                        "fetched plugin catalog"
                    );
                    return Ok(snapshot);
                }
                Err(error) => {
                    tracing::warn!(
                        endpoint = endpoint.as_str(),
                        error = format!("{error:#}"),
                        "catalog endpoint returned unparseable payload"
                    );
                    last_error = Some(error);
                }
            },
            Err(error) => {
                tracing::warn!(
                    endpoint = endpoint.as_str(),
                    error = format!("{error:#}"),
                    "catalog endpoint unreachable"
                );
                last_error = Some(error);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("no catalog endpoints configured"))
        .context("all catalog endpoints failed"))
}

async fn fetch_catalog_payload(
    http: &reqwest::Client,
    endpoint: &str,
    timeout: Duration,
) -> Result<String> {
    let response = http
        .get(endpoint)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("failed to fetch catalog from '{endpoint}'"))?;
    if !response.status().is_success() {
        bail!(
            "catalog request to '{}' returned status {}",
            endpoint,
            response.status()
        );
    }
    response
        .text()
        .await
        .with_context(|| format!("failed to read catalog body from '{endpoint}'"))
}

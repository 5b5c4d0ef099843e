//! Resolves a repository reference to a concrete archive URL.
//!
//! Prefers the most recent published release's zipball; every lookup
//! failure falls back to the deterministic default-branch archive URL
//! (guessing `master`, which the downloader may rewrite to `main` on a
//! not-found response).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::error::InstallError;

pub const RELEASE_API_BASE_DEFAULT: &str = "https://api.github.com";
pub const ARCHIVE_BASE_DEFAULT: &str = "https://github.com";
pub const RELEASE_LOOKUP_TIMEOUT_MS_DEFAULT: u64 = 15_000;
pub const DEFAULT_BRANCH_GUESS: &str = "master";
pub const ALTERNATE_BRANCH_NAME: &str = "main";

/// Owner + name pair identifying a remote repository. Immutable once
/// parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses a repository URL (or bare `owner/name`) into its identity.
    /// The last two non-empty path segments are taken as owner and name; a
    /// trailing `.git` suffix is ignored. This is the only fatal
    /// resolve-stage check and it runs before any network I/O.
    pub fn parse(reference: &str) -> Result<Self, InstallError> {
        let malformed = |reason: &str| InstallError::Resolve {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        if !trimmed.contains('/') {
            return Err(malformed(
                "expected a repository URL of the form https://<host>/<owner>/<name>",
            ));
        }

        let mut segments = trimmed.split('/').rev().filter(|part| !part.is_empty());
        let name = segments.next().unwrap_or_default();
        let owner = segments.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() {
            return Err(malformed("missing owner or repository name segment"));
        }
        if !is_valid_segment(owner) || !is_valid_segment(name) {
            return Err(malformed(
                "owner and repository name may only contain alphanumerics, '.', '_', and '-'",
            ));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    segment
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseRecord {
    #[serde(default)]
    zipball_url: Option<String>,
}

/// A resolved base archive URL plus enough repository identity to retry
/// with the alternate branch name later. `branch_guess` is set only when
/// the URL came from the default-branch fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub archive_url: String,
    pub repo: RepoRef,
    pub branch_guess: Option<String>,
}

/// Queries the release-listing endpoint for the repository's most recent
/// release and uses its zipball URL when present. Any failure (non-success
/// status, timeout, missing field, empty list) falls back to the
/// default-branch archive URL; this function never fails.
pub async fn resolve_archive_source(
    http: &reqwest::Client,
    repo: &RepoRef,
    api_base: &str,
    archive_base: &str,
    timeout: Duration,
) -> ResolvedSource {
    match fetch_latest_zipball_url(http, repo, api_base, timeout).await {
        Ok(Some(zipball_url)) => ResolvedSource {
            archive_url: zipball_url,
            repo: repo.clone(),
            branch_guess: None,
        },
        Ok(None) => {
            tracing::debug!(
                repo = %repo.slug(),
                "no release zipball available; falling back to default-branch archive"
            );
            branch_guess_source(repo, archive_base)
        }
        Err(error) => {
            tracing::debug!(
                repo = %repo.slug(),
                error = format!("{error:#}"),
                "release lookup failed; falling back to default-branch archive"
            );
            branch_guess_source(repo, archive_base)
        }
    }
}

fn branch_guess_source(repo: &RepoRef, archive_base: &str) -> ResolvedSource {
    ResolvedSource {
        archive_url: branch_archive_url(archive_base, repo, DEFAULT_BRANCH_GUESS),
        repo: repo.clone(),
        branch_guess: Some(DEFAULT_BRANCH_GUESS.to_string()),
    }
}

pub(crate) fn branch_archive_url(archive_base: &str, repo: &RepoRef, branch: &str) -> String {
    format!(
        "{}/{}/{}/archive/refs/heads/{}.zip",
        archive_base.trim_end_matches('/'),
        repo.owner,
        repo.name,
        branch
    )
}

async fn fetch_latest_zipball_url(
    http: &reqwest::Client,
    repo: &RepoRef,
    api_base: &str,
    timeout: Duration,
) -> Result<Option<String>> {
    let url = format!(
        "{}/repos/{}/{}/releases",
        api_base.trim_end_matches('/'),
        repo.owner,
        repo.name
    );
    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("failed to fetch release listing from '{url}'"))?;
    if !response.status().is_success() {
        bail!(
            "release listing request to '{}' returned status {}",
            url,
            response.status()
        );
    }
    let releases = response
        .json::<Vec<ReleaseRecord>>()
        .await
        .with_context(|| format!("failed to parse release listing from '{url}'"))?;
    Ok(releases
        .into_iter()
        .next()
        .and_then(|release| release.zipball_url)
        .filter(|zipball_url| !zipball_url.is_empty()))
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;

    fn test_client() -> reqwest::Client {
        reqwest::Client::new()
    }

    fn repo() -> RepoRef {
        RepoRef {
            owner: "zgojin".to_string(),
            name: "weather".to_string(),
        }
    }

    #[test]
    fn unit_repo_ref_parse_accepts_repository_url_shapes() {
        let parsed = RepoRef::parse("https://github.com/zgojin/weather").expect("url");
        assert_eq!(parsed.owner, "zgojin");
        assert_eq!(parsed.name, "weather");

        let parsed = RepoRef::parse("https://github.com/zgojin/weather.git/").expect("git suffix");
        assert_eq!(parsed.slug(), "zgojin/weather");

        let parsed = RepoRef::parse("zgojin/weather").expect("bare slug");
        assert_eq!(parsed.name, "weather");
    }

    #[test]
    fn unit_repo_ref_parse_rejects_malformed_references() {
        let error = RepoRef::parse("weather").expect_err("no owner");
        assert!(matches!(error, InstallError::Resolve { .. }));

        let error = RepoRef::parse("https://github.com/zgojin/bad name").expect_err("space");
        assert!(error.to_string().contains("alphanumerics"));

        assert!(RepoRef::parse("").is_err());
        assert!(RepoRef::parse("///").is_err());
    }

    #[tokio::test]
    async fn functional_resolver_prefers_latest_release_zipball() {
        let server = MockServer::start();
        let releases = server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/repos/zgojin/weather/releases");
            then.status(200).json_body(json!([
                { "zipball_url": "https://api.github.com/repos/zgojin/weather/zipball/v2" },
                { "zipball_url": "https://api.github.com/repos/zgojin/weather/zipball/v1" }
            ]));
        });

        let source = resolve_archive_source(
            &test_client(),
            &repo(),
            &server.base_url(),
            ARCHIVE_BASE_DEFAULT,
            Duration::from_secs(5),
        )
        .await;

        releases.assert();
        assert_eq!(
            source.archive_url,
            "https://api.github.com/repos/zgojin/weather/zipball/v2"
        );
        assert_eq!(source.branch_guess, None);
    }

    #[tokio::test]
    async fn functional_resolver_falls_back_to_branch_guess_on_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/repos/zgojin/weather/releases");
            then.status(404);
        });

        let source = resolve_archive_source(
            &test_client(),
            &repo(),
            &server.base_url(),
            "https://github.com",
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(
            source.archive_url,
            "https://github.com/zgojin/weather/archive/refs/heads/master.zip"
        );
        assert_eq!(source.branch_guess.as_deref(), Some("master"));
    }

    #[tokio::test]
    async fn unit_resolver_falls_back_when_release_list_is_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/repos/zgojin/weather/releases");
            then.status(200).json_body(json!([]));
        });

        let source = resolve_archive_source(
            &test_client(),
            &repo(),
            &server.base_url(),
            "https://github.com",
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(source.branch_guess.as_deref(), Some("master"));
    }
}

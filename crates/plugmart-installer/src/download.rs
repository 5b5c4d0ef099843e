//! Ordered-fallback archive download.
//!
//! Candidates are attempted in plan order until one yields a complete
//! payload. The only in-place retry is the documented default-branch
//! special case: a `master` branch guess answered with 404 is rewritten to
//! `main` and tried once before advancing.

use std::time::Duration;

use crate::error::InstallError;
use crate::mirror::{prefixed_url, MirrorCandidate};
use crate::source::{ResolvedSource, ALTERNATE_BRANCH_NAME, DEFAULT_BRANCH_GUESS};

pub const DOWNLOAD_TIMEOUT_MS_DEFAULT: u64 = 60_000;

/// Builds the ordered candidate list: mirror-routed URLs fastest first,
/// then the direct URL. The plan is never empty and its last entry is
/// always the direct URL.
pub fn build_download_plan(source: &ResolvedSource, mirrors: &[MirrorCandidate]) -> Vec<String> {
    let mut plan: Vec<String> = mirrors
        .iter()
        .map(|mirror| prefixed_url(&mirror.prefix, &source.archive_url))
        .collect();
    plan.push(source.archive_url.clone());
    plan
}

/// Attempts each candidate in order and returns the first complete payload.
/// Failures are recorded and the next candidate tried; exhausting the plan
/// yields a download-stage error carrying the last observed cause.
pub async fn download_archive(
    http: &reqwest::Client,
    source: &ResolvedSource,
    plan: &[String],
    timeout: Duration,
) -> Result<Vec<u8>, InstallError> {
    let mut attempts = 0_usize;
    let mut last_error = "download plan was empty".to_string();

    for candidate in plan {
        attempts += 1;
        match fetch_candidate(http, candidate, timeout).await {
            Ok(bytes) => return Ok(bytes),
            Err(failure) => {
                if failure.is_not_found() && is_master_branch_guess(source, candidate) {
                    let alternate = candidate.replace(
                        &branch_segment(DEFAULT_BRANCH_GUESS),
                        &branch_segment(ALTERNATE_BRANCH_NAME),
                    );
                    tracing::info!(
                        url = alternate.as_str(),
                        "default-branch guess returned not-found; retrying with 'main'"
                    );
                    attempts += 1;
                    match fetch_candidate(http, &alternate, timeout).await {
                        Ok(bytes) => return Ok(bytes),
                        Err(alternate_failure) => {
                            tracing::warn!(
                                url = alternate.as_str(),
                                error = alternate_failure.describe().as_str(),
                                "download candidate failed"
                            );
                            last_error =
                                format!("'{}': {}", alternate, alternate_failure.describe());
                        }
                    }
                } else {
                    tracing::warn!(
                        url = candidate.as_str(),
                        error = failure.describe().as_str(),
                        "download candidate failed"
                    );
                    last_error = format!("'{}': {}", candidate, failure.describe());
                }
            }
        }
    }

    Err(InstallError::Download {
        attempts,
        last_error,
    })
}

enum CandidateFailure {
    Status(reqwest::StatusCode),
    Transport(String),
}

impl CandidateFailure {
    fn is_not_found(&self) -> bool {
        matches!(self, CandidateFailure::Status(status) if *status == reqwest::StatusCode::NOT_FOUND)
    }

    fn describe(&self) -> String {
        match self {
            CandidateFailure::Status(status) => format!("returned status {status}"),
            CandidateFailure::Transport(error) => format!("transport error: {error}"),
        }
    }
}

async fn fetch_candidate(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, CandidateFailure> {
    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|error| CandidateFailure::Transport(error.to_string()))?;
    if !response.status().is_success() {
        return Err(CandidateFailure::Status(response.status()));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|error| CandidateFailure::Transport(error.to_string()))?;
    Ok(bytes.to_vec())
}

fn branch_segment(branch: &str) -> String {
    format!("archive/refs/heads/{branch}.zip")
}

fn is_master_branch_guess(source: &ResolvedSource, candidate: &str) -> bool {
    source.branch_guess.as_deref() == Some(DEFAULT_BRANCH_GUESS)
        && candidate.ends_with(&branch_segment(DEFAULT_BRANCH_GUESS))
}

//! Concurrent reachability probing for configured mirror prefixes.
//!
//! All probes run at once and are joined (full ranking, not race-to-first);
//! each carries its own timeout so one dead mirror never delays the others'
//! measurements. The result is advisory: an empty list just means the
//! downloader attempts the direct URL only.

use std::time::{Duration, Instant};

use futures_util::future::join_all;

pub const MIRROR_PROBE_TARGET_DEFAULT: &str = "https://api.github.com";
pub const MIRROR_PROBE_TIMEOUT_MS_DEFAULT: u64 = 10_000;

/// One reachable mirror with its measured probe latency. Produced fresh per
/// install attempt; never cached across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorCandidate {
    pub prefix: String,
    pub latency: Duration,
}

/// Probes every configured prefix against `probe_target` concurrently and
/// returns the reachable subset sorted ascending by latency. Unreachable
/// mirrors (transport error, timeout, or non-success status) are logged and
/// excluded.
pub async fn race_mirrors(
    http: &reqwest::Client,
    prefixes: &[String],
    probe_target: &str,
    timeout: Duration,
) -> Vec<MirrorCandidate> {
    let probes = prefixes.iter().map(|prefix| {
        let url = prefixed_url(prefix, probe_target);
        async move {
            let started = Instant::now();
            match http.get(&url).timeout(timeout).send().await {
                Ok(response) if response.status().is_success() => Some(MirrorCandidate {
                    prefix: prefix.clone(),
                    latency: started.elapsed(),
                }),
                Ok(response) => {
                    tracing::warn!(
                        mirror = prefix.as_str(),
                        status = %response.status(),
                        "mirror probe answered with non-success status"
                    );
                    None
                }
                Err(error) => {
                    tracing::warn!(
                        mirror = prefix.as_str(),
                        error = %error,
                        "mirror probe unreachable"
                    );
                    None
                }
            }
        }
    });

    let mut reachable: Vec<MirrorCandidate> =
        join_all(probes).await.into_iter().flatten().collect();
    reachable.sort_by_key(|candidate| candidate.latency);
    tracing::info!(
        probed = prefixes.len(),
        reachable = reachable.len(),
        "mirror probe complete"
    );
    reachable
}

/// Routes `url` through a mirror by prepending the prefix, matching the
/// `<prefix>/<full-url>` convention mirror proxies expect.
pub(crate) fn prefixed_url(prefix: &str, url: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), url)
}

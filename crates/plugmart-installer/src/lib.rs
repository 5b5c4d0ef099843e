//! Plugin acquisition and installation pipeline.
//!
//! Sequences source resolution, mirror probing, ordered-fallback download,
//! archive extraction with backup/rollback, and host-runtime activation
//! into one [`InstallOutcome`] per request. Stages are strictly sequential;
//! only the mirror probe fans out concurrently.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use plugmart_runtime::{activate_plugin, HostRuntime};

pub mod archive;
pub mod download;
pub mod error;
pub mod lock;
pub mod mirror;
pub mod source;


pub use archive::{install_archive, InstallationTarget};
pub use download::{build_download_plan, download_archive, DOWNLOAD_TIMEOUT_MS_DEFAULT};
pub use error::{InstallError, InstallOutcome, InstallStage, RollbackStatus};
pub use lock::TargetLockRegistry;
pub use mirror::{race_mirrors, MirrorCandidate, MIRROR_PROBE_TIMEOUT_MS_DEFAULT};
pub use source::{resolve_archive_source, RepoRef, ResolvedSource};

pub const INSTALLER_USER_AGENT: &str = "plugmart/plugin-installer";

/// Installer tunables. Endpoint bases are overridable so tests can point
/// the pipeline at local servers.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub plugins_dir: PathBuf,
    pub mirror_prefixes: Vec<String>,
    pub release_api_base: String,
    pub archive_base: String,
    pub probe_target: String,
    pub release_timeout: Duration,
    pub probe_timeout: Duration,
    pub download_timeout: Duration,
}

impl InstallerConfig {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self {
            plugins_dir,
            mirror_prefixes: Vec::new(),
            release_api_base: source::RELEASE_API_BASE_DEFAULT.to_string(),
            archive_base: source::ARCHIVE_BASE_DEFAULT.to_string(),
            probe_target: mirror::MIRROR_PROBE_TARGET_DEFAULT.to_string(),
            release_timeout: Duration::from_millis(source::RELEASE_LOOKUP_TIMEOUT_MS_DEFAULT),
            probe_timeout: Duration::from_millis(MIRROR_PROBE_TIMEOUT_MS_DEFAULT),
            download_timeout: Duration::from_millis(DOWNLOAD_TIMEOUT_MS_DEFAULT),
        }
    }
}

/// One shared pipeline instance. Each install request owns its own mirror
/// ranking and download plan; the only cross-request state is the
/// per-target lock registry.
pub struct Installer {
    http: reqwest::Client,
    config: InstallerConfig,
    target_locks: TargetLockRegistry,
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(INSTALLER_USER_AGENT)
            .build()
            .context("failed to construct installer HTTP client")?;
        Ok(Self {
            http,
            config,
            target_locks: TargetLockRegistry::new(),
        })
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Runs the full pipeline for one plugin. `name` becomes the installed
    /// directory name and the name handed to the host runtime; `repo_url`
    /// is the repository reference to acquire.
    pub async fn install(
        &self,
        runtime: &dyn HostRuntime,
        name: &str,
        repo_url: &str,
        is_update: bool,
    ) -> InstallOutcome {
        match self.run_pipeline(runtime, name, repo_url, is_update).await {
            Ok(activated_name) => {
                tracing::info!(plugin = name, "plugin installed and activated");
                InstallOutcome::Success { activated_name }
            }
            Err(error) => {
                tracing::warn!(
                    plugin = name,
                    stage = error.stage().as_str(),
                    error = %error,
                    "plugin install failed"
                );
                InstallOutcome::from(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        runtime: &dyn HostRuntime,
        name: &str,
        repo_url: &str,
        is_update: bool,
    ) -> Result<String, InstallError> {
        let repo = RepoRef::parse(repo_url)?;
        let source = resolve_archive_source(
            &self.http,
            &repo,
            &self.config.release_api_base,
            &self.config.archive_base,
            self.config.release_timeout,
        )
        .await;
        tracing::info!(
            plugin = name,
            url = source.archive_url.as_str(),
            "resolved archive source"
        );

        let mirrors = race_mirrors(
            &self.http,
            &self.config.mirror_prefixes,
            &self.config.probe_target,
            self.config.probe_timeout,
        )
        .await;
        let plan = build_download_plan(&source, &mirrors);
        let bytes = download_archive(&self.http, &source, &plan, self.config.download_timeout)
            .await?;
        tracing::info!(plugin = name, bytes = bytes.len(), "downloaded plugin archive");

        if let Err(error) = std::fs::create_dir_all(&self.config.plugins_dir) {
            return Err(InstallError::Swap {
                cause: format!(
                    "failed to create plugins directory '{}': {error}",
                    self.config.plugins_dir.display()
                ),
                rollback: RollbackStatus::NotApplicable,
            });
        }
        let target = InstallationTarget::for_plugin(&self.config.plugins_dir, name);

        // Exclusive per-target scope: held through activation (or rollback)
        // so concurrent requests cannot interleave backup/restore steps.
        let _guard = self.target_locks.acquire(&target.target_path).await;
        install_archive(&bytes, &target, is_update)?;
        activate_plugin(runtime, name).await.map_err(InstallError::from)?;
        Ok(name.to_string())
    }
}

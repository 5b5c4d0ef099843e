//! Host-runtime seam for plugin activation.
//!
//! The installer hands a freshly installed directory to the host process
//! through [`HostRuntime`]; [`activate_plugin`] performs the single
//! load-then-reload fallback and reports a combined error when both paths
//! fail.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Entry points the host process exposes for making installed plugin
/// directories live. `load` registers a plugin by its on-disk directory
/// name; `reload` re-initializes one already registered under `name`.
#[async_trait]
pub trait HostRuntime: Send + Sync {
    async fn load(&self, directory_name: &str) -> Result<()>;

    async fn reload(&self, registered_name: &str) -> Result<()>;
}

/// Both the direct load and the reload fallback failed. Carries both
/// diagnostics; remediation usually depends on which one is structural.
#[derive(Debug, Error)]
#[error("failed to load plugin '{name}': {load_error}; reload attempt also failed: {reload_error}")]
pub struct ActivationError {
    pub name: String,
    pub load_error: String,
    pub reload_error: String,
}

/// Asks the host runtime to load the directory named `name`; on failure,
/// retries once through the reload path with the same name. No further
/// retries: activation failures are usually structural, not transient.
pub async fn activate_plugin(
    runtime: &dyn HostRuntime,
    name: &str,
) -> Result<(), ActivationError> {
    let load_error = match runtime.load(name).await {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };
    tracing::warn!(
        plugin = name,
        error = %load_error,
        "plugin load failed; attempting reload"
    );
    match runtime.reload(name).await {
        Ok(()) => Ok(()),
        Err(reload_error) => Err(ActivationError {
            name: name.to_string(),
            load_error: load_error.to_string(),
            reload_error: reload_error.to_string(),
        }),
    }
}

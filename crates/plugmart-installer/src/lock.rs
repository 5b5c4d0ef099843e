//! Per-target-path exclusion for concurrent install requests.
//!
//! Two requests for the same target would race on the shared backup path,
//! so the orchestrator holds a keyed lock from the first filesystem
//! mutation through activation (or rollback). Requests for different
//! targets proceed fully concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct TargetLockRegistry {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl TargetLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of `target`. The returned guard is
    /// owned so it can be held across await points for the rest of the
    /// pipeline.
    pub async fn acquire(&self, target: &Path) -> OwnedMutexGuard<()> {
        let cell = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(target.to_path_buf()).or_default().clone()
        };
        cell.lock_owned().await
    }
}

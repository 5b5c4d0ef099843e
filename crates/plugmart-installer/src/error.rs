//! Stage-tagged error taxonomy for the install pipeline.
//!
//! Every fatal pipeline error maps to exactly one [`InstallStage`]; the
//! filesystem stages additionally report whether the pre-existing
//! installation was rolled back.

use thiserror::Error;

use plugmart_runtime::ActivationError;

/// Enumerates the pipeline stages used to tag install failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Resolve,
    Probe,
    Download,
    Extract,
    Swap,
    Activate,
}

impl InstallStage {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStage::Resolve => "resolve",
            InstallStage::Probe => "probe",
            InstallStage::Download => "download",
            InstallStage::Extract => "extract",
            InstallStage::Swap => "swap",
            InstallStage::Activate => "activate",
        }
    }
}

impl std::fmt::Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the backup-restore path that runs when extraction or the
/// swap fails. `Failed` is the only urgent condition: the target directory
/// may be absent or partially written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    NotApplicable,
    Restored,
    Failed(String),
}

impl RollbackStatus {
    pub fn is_urgent(&self) -> bool {
        matches!(self, RollbackStatus::Failed(_))
    }
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStatus::NotApplicable => f.write_str("not-applicable"),
            RollbackStatus::Restored => f.write_str("restored"),
            RollbackStatus::Failed(cause) => write!(f, "rollback also failed: {cause}"),
        }
    }
}

/// One variant per fatal pipeline stage. Probe failures never surface here;
/// they only degrade the download plan to direct-only.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid repository reference '{reference}': {reason}")]
    Resolve { reference: String, reason: String },

    #[error("all {attempts} download candidates failed; last error: {last_error}")]
    Download { attempts: usize, last_error: String },

    #[error("archive extraction failed: {cause} (rollback: {rollback})")]
    Extract {
        cause: String,
        rollback: RollbackStatus,
    },

    #[error("installation swap failed: {cause} (rollback: {rollback})")]
    Swap {
        cause: String,
        rollback: RollbackStatus,
    },

    #[error("activation failed; load error: {load_error}; reload error: {reload_error}")]
    Activate {
        load_error: String,
        reload_error: String,
    },
}

impl InstallError {
    pub fn stage(&self) -> InstallStage {
        match self {
            InstallError::Resolve { .. } => InstallStage::Resolve,
            InstallError::Download { .. } => InstallStage::Download,
            InstallError::Extract { .. } => InstallStage::Extract,
            InstallError::Swap { .. } => InstallStage::Swap,
            InstallError::Activate { .. } => InstallStage::Activate,
        }
    }

    /// Rollback status for the filesystem stages; `None` elsewhere.
    pub fn rollback(&self) -> Option<&RollbackStatus> {
        match self {
            InstallError::Extract { rollback, .. } | InstallError::Swap { rollback, .. } => {
                Some(rollback)
            }
            _ => None,
        }
    }
}

impl From<ActivationError> for InstallError {
    fn from(error: ActivationError) -> Self {
        InstallError::Activate {
            load_error: error.load_error,
            reload_error: error.reload_error,
        }
    }
}

/// Terminal result of one install/update request.
#[derive(Debug)]
pub enum InstallOutcome {
    Success { activated_name: String },
    Failed { stage: InstallStage, error: InstallError },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Success { .. })
    }
}

impl From<InstallError> for InstallOutcome {
    fn from(error: InstallError) -> Self {
        InstallOutcome::Failed {
            stage: error.stage(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_install_error_maps_to_expected_stage() {
        let resolve = InstallError::Resolve {
            reference: "nonsense".to_string(),
            reason: "no owner segment".to_string(),
        };
        assert_eq!(resolve.stage(), InstallStage::Resolve);
        assert!(resolve.rollback().is_none());

        let swap = InstallError::Swap {
            cause: "rename failed".to_string(),
            rollback: RollbackStatus::Restored,
        };
        assert_eq!(swap.stage(), InstallStage::Swap);
        assert_eq!(swap.rollback(), Some(&RollbackStatus::Restored));
    }

    #[test]
    fn unit_rollback_status_urgency_and_display() {
        assert!(!RollbackStatus::NotApplicable.is_urgent());
        assert!(!RollbackStatus::Restored.is_urgent());
        let failed = RollbackStatus::Failed("disk full".to_string());
        assert!(failed.is_urgent());
        assert_eq!(failed.to_string(), "rollback also failed: disk full");
    }

    #[test]
    fn unit_outcome_from_error_carries_stage() {
        let outcome = InstallOutcome::from(InstallError::Download {
            attempts: 3,
            last_error: "status 502".to_string(),
        });
        match outcome {
            InstallOutcome::Failed { stage, .. } => assert_eq!(stage, InstallStage::Download),
            InstallOutcome::Success { .. } => panic!("expected failure"),
        }
    }
}

//! Archive validation, extraction, and atomic directory replacement.
//!
//! Updates take a full recursive backup before any destructive change; the
//! backup is the sole recovery checkpoint and never outlives the attempt.
//! Extraction happens in a process-unique scratch directory so the target
//! is only ever replaced by a fully extracted tree.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use plugmart_core::fs_ops::{copy_dir_recursive, move_dir, remove_dir_if_exists};

use crate::error::{InstallError, RollbackStatus};

/// Target directory plus its transient backup sibling (`<target>_backup`).
/// The backup exists only while an update attempt is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationTarget {
    pub target_path: PathBuf,
    pub backup_path: PathBuf,
}

impl InstallationTarget {
    pub fn for_plugin(plugins_dir: &Path, name: &str) -> Self {
        let target_path = plugins_dir.join(name);
        let mut backup = target_path.clone().into_os_string();
        backup.push("_backup");
        Self {
            target_path,
            backup_path: PathBuf::from(backup),
        }
    }
}

/// Installs `bytes` (a zip archive wrapping its content in a single root
/// directory) at the target. For updates, the previous installation is
/// backed up first and restored when any later step fails; fresh-install
/// failures remove the partial target. The scratch directory is removed on
/// every exit path.
pub fn install_archive(
    bytes: &[u8],
    target: &InstallationTarget,
    is_update: bool,
) -> Result<(), InstallError> {
    if is_update && !target.target_path.exists() {
        return Err(InstallError::Extract {
            cause: format!(
                "'{}' is not installed; cannot update",
                target.target_path.display()
            ),
            rollback: RollbackStatus::NotApplicable,
        });
    }

    let mut backup_taken = false;
    if is_update {
        if let Err(error) = take_backup(target) {
            return Err(InstallError::Swap {
                cause: format!("failed to back up previous installation: {error:#}"),
                rollback: RollbackStatus::NotApplicable,
            });
        }
        backup_taken = true;
    }

    match extract_and_swap(bytes, target) {
        Ok(()) => {
            if backup_taken {
                if let Err(error) = remove_dir_if_exists(&target.backup_path) {
                    tracing::warn!(
                        backup = %target.backup_path.display(),
                        error = format!("{error:#}"),
                        "failed to remove backup after successful install"
                    );
                }
            }
            Ok(())
        }
        Err(failure) => {
            let rollback = rollback_target(target, backup_taken, failure.target_mutated);
            if failure.is_swap {
                Err(InstallError::Swap {
                    cause: failure.cause,
                    rollback,
                })
            } else {
                Err(InstallError::Extract {
                    cause: failure.cause,
                    rollback,
                })
            }
        }
    }
}

fn take_backup(target: &InstallationTarget) -> Result<()> {
    remove_dir_if_exists(&target.backup_path).context("failed to clear stale backup")?;
    copy_dir_recursive(&target.target_path, &target.backup_path)
}

struct StageFailure {
    is_swap: bool,
    cause: String,
    target_mutated: bool,
}

impl StageFailure {
    fn extract(cause: impl Into<String>) -> Self {
        Self {
            is_swap: false,
            cause: cause.into(),
            target_mutated: false,
        }
    }

    fn swap(cause: impl Into<String>) -> Self {
        Self {
            is_swap: true,
            cause: cause.into(),
            target_mutated: true,
        }
    }
}

fn extract_and_swap(bytes: &[u8], target: &InstallationTarget) -> Result<(), StageFailure> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| StageFailure::extract(format!("failed to open archive: {error}")))?;
    if archive.len() == 0 {
        return Err(StageFailure::extract("archive contains no entries"));
    }

    // Repository-archive services wrap all content in one root directory;
    // its name is the first path segment of the first entry.
    let first_entry_name = archive
        .file_names()
        .next()
        .map(str::to_string)
        .unwrap_or_default();
    let root_entry = Path::new(&first_entry_name)
        .components()
        .find_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .unwrap_or_default();
    if root_entry.is_empty() {
        return Err(StageFailure::extract(format!(
            "archive entry '{first_entry_name}' has no usable root directory"
        )));
    }

    let scratch = tempfile::tempdir().map_err(|error| {
        StageFailure::extract(format!("failed to create scratch directory: {error}"))
    })?;
    extract_entries(&mut archive, scratch.path())
        .map_err(|error| StageFailure::extract(format!("{error:#}")))?;

    let scratch_root = scratch.path().join(&root_entry);
    if !scratch_root.is_dir() {
        return Err(StageFailure::extract(format!(
            "archive root directory '{root_entry}' missing after extraction"
        )));
    }

    // The only destructive mutation of the target; extraction has already
    // fully succeeded in the scratch area by this point.
    remove_dir_if_exists(&target.target_path)
        .map_err(|error| StageFailure::swap(format!("{error:#}")))?;
    move_dir(&scratch_root, &target.target_path).map_err(|error| {
        StageFailure::swap(format!(
            "failed to move extracted tree into '{}': {error:#}",
            target.target_path.display()
        ))
    })?;
    Ok(())
}

fn extract_entries(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    scratch: &Path,
) -> Result<()> {
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .with_context(|| format!("failed to read archive entry {index}"))?;
        let Some(relative) = file.enclosed_name().map(Path::to_path_buf) else {
            // entries escaping the scratch root are skipped, not fatal
            tracing::warn!(entry = file.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let out_path = scratch.join(relative);
        if file.name().ends_with('/') {
            std::fs::create_dir_all(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out_file = std::fs::File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        std::io::copy(&mut file, &mut out_file)
            .with_context(|| format!("failed to extract {}", out_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))
                    .with_context(|| {
                        format!("failed to set permissions on {}", out_path.display())
                    })?;
            }
        }
    }
    Ok(())
}

/// Restores the pre-attempt state after a failure. With a backup: remove
/// any partial target and move the backup into place (or just drop the
/// backup when the target was never touched). Without one: remove any
/// partial target. The result is logged and reported but never changes the
/// failing stage.
fn rollback_target(
    target: &InstallationTarget,
    backup_taken: bool,
    target_mutated: bool,
) -> RollbackStatus {
    if !backup_taken {
        if target_mutated {
            if let Err(error) = remove_dir_if_exists(&target.target_path) {
                tracing::warn!(
                    target = %target.target_path.display(),
                    error = format!("{error:#}"),
                    "failed to remove partial fresh install"
                );
                return RollbackStatus::Failed(format!("{error:#}"));
            }
        }
        return RollbackStatus::NotApplicable;
    }

    let restore = || -> Result<()> {
        if target_mutated {
            remove_dir_if_exists(&target.target_path)?;
            move_dir(&target.backup_path, &target.target_path)?;
        } else {
            remove_dir_if_exists(&target.backup_path)?;
        }
        Ok(())
    };
    match restore() {
        Ok(()) => {
            tracing::info!(
                target = %target.target_path.display(),
                "previous installation restored after failed update"
            );
            RollbackStatus::Restored
        }
        Err(error) => {
            tracing::warn!(
                target = %target.target_path.display(),
                error = format!("{error:#}"),
                "rollback failed; target may be absent or partial"
            );
            RollbackStatus::Failed(format!("{error:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn zip_archive(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, body) in entries {
                match body {
                    Some(body) => {
                        writer.start_file(*name, options).expect("start file");
                        writer.write_all(body.as_bytes()).expect("write body");
                    }
                    None => {
                        writer.add_directory(*name, options).expect("add dir");
                    }
                }
            }
            writer.finish().expect("finish zip");
        }
        cursor.into_inner()
    }

    fn repo_archive(root: &str) -> Vec<u8> {
        zip_archive(&[
            (&format!("{root}/"), None),
            (&format!("{root}/main.py"), Some("print('hi')")),
            (&format!("{root}/metadata.yaml"), Some("name: weather")),
        ])
    }

    #[test]
    fn functional_fresh_install_places_root_contents_at_target() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");

        install_archive(&repo_archive("zgojin-weather-sha1234"), &target, false)
            .expect("install");

        assert!(target.target_path.join("main.py").exists());
        assert!(target.target_path.join("metadata.yaml").exists());
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn functional_update_replaces_contents_and_drops_backup() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");
        std::fs::create_dir_all(&target.target_path).expect("mkdir");
        std::fs::write(target.target_path.join("main.py"), "old version").expect("write");

        install_archive(&repo_archive("zgojin-weather-sha5678"), &target, true)
            .expect("update");

        assert_eq!(
            std::fs::read_to_string(target.target_path.join("main.py")).expect("read"),
            "print('hi')"
        );
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn unit_update_of_missing_target_fails_before_any_mutation() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");

        let error = install_archive(&repo_archive("root"), &target, true)
            .expect_err("nothing to update");
        assert!(matches!(
            error,
            InstallError::Extract {
                rollback: RollbackStatus::NotApplicable,
                ..
            }
        ));
        assert!(!target.target_path.exists());
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn regression_empty_archive_fails_and_removes_backup() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");
        std::fs::create_dir_all(&target.target_path).expect("mkdir");
        std::fs::write(target.target_path.join("main.py"), "v1").expect("write");

        let error = install_archive(&zip_archive(&[]), &target, true).expect_err("empty archive");
        match error {
            InstallError::Extract { cause, rollback } => {
                assert!(cause.contains("no entries"));
                assert_eq!(rollback, RollbackStatus::Restored);
            }
            other => panic!("expected extract error, got {other:?}"),
        }
        // target untouched, backup not left behind as a second copy
        assert_eq!(
            std::fs::read_to_string(target.target_path.join("main.py")).expect("read"),
            "v1"
        );
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn regression_failed_update_restores_previous_contents_byte_for_byte() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");
        std::fs::create_dir_all(target.target_path.join("data")).expect("mkdir");
        std::fs::write(target.target_path.join("main.py"), "original body").expect("write");
        std::fs::write(target.target_path.join("data").join("state.json"), "{}").expect("write");

        // flat archive with no root directory: fails after the backup
        let flat = zip_archive(&[("main.py", Some("new body"))]);
        let error = install_archive(&flat, &target, true).expect_err("missing root");
        match error {
            InstallError::Extract { cause, rollback } => {
                assert!(cause.contains("missing after extraction"), "cause: {cause}");
                assert_eq!(rollback, RollbackStatus::Restored);
            }
            other => panic!("expected extract error, got {other:?}"),
        }

        assert_eq!(
            std::fs::read_to_string(target.target_path.join("main.py")).expect("read"),
            "original body"
        );
        assert_eq!(
            std::fs::read_to_string(target.target_path.join("data").join("state.json"))
                .expect("read"),
            "{}"
        );
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn unit_fresh_install_failure_leaves_no_partial_target() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");

        let error = install_archive(b"not a zip archive", &target, false)
            .expect_err("corrupt archive");
        assert!(matches!(error, InstallError::Extract { .. }));
        assert!(!target.target_path.exists());
        assert!(!target.backup_path.exists());
    }

    #[test]
    fn functional_fresh_install_overwrites_existing_target_only_after_extraction() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");
        std::fs::create_dir_all(&target.target_path).expect("mkdir");
        std::fs::write(target.target_path.join("main.py"), "previous").expect("write");

        // corrupt archive: the existing installation must survive
        let error = install_archive(b"garbage", &target, false).expect_err("corrupt");
        assert!(matches!(error, InstallError::Extract { .. }));
        assert_eq!(
            std::fs::read_to_string(target.target_path.join("main.py")).expect("read"),
            "previous"
        );

        // valid archive: overwrite succeeds
        install_archive(&repo_archive("zgojin-weather-sha9999"), &target, false)
            .expect("overwrite");
        assert_eq!(
            std::fs::read_to_string(target.target_path.join("main.py")).expect("read"),
            "print('hi')"
        );
    }

    #[test]
    fn unit_stale_backup_is_replaced_before_update() {
        let plugins = tempfile::tempdir().expect("tempdir");
        let target = InstallationTarget::for_plugin(plugins.path(), "weather");
        std::fs::create_dir_all(&target.target_path).expect("mkdir");
        std::fs::write(target.target_path.join("main.py"), "current").expect("write");
        std::fs::create_dir_all(&target.backup_path).expect("mkdir stale backup");
        std::fs::write(target.backup_path.join("stale.txt"), "stale").expect("write");

        install_archive(&repo_archive("zgojin-weather-shaabcd"), &target, true)
            .expect("update");
        assert!(!target.backup_path.exists());
    }
}

//! Recursive directory operations used by backup, swap, and rollback.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Recursively copies `src` into `dst`, creating `dst` and any intermediate
/// directories. File permissions are preserved where the platform supports it.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("copy source '{}' is not a directory", src.display());
    }
    std::fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory {}", dst.display()))?;

    for entry in std::fs::read_dir(src)
        .with_context(|| format!("failed to read directory {}", src.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let metadata = std::fs::metadata(&src_path)
                    .with_context(|| format!("failed to stat {}", src_path.display()))?;
                let mode = metadata.permissions().mode();
                if mode & 0o111 != 0 {
                    std::fs::set_permissions(&dst_path, std::fs::Permissions::from_mode(mode))
                        .with_context(|| {
                            format!("failed to set permissions on {}", dst_path.display())
                        })?;
                }
            }
        }
    }
    Ok(())
}

/// Moves the directory at `src` to `dst`. Falls back to copy + remove when a
/// plain rename is rejected (for example across filesystems).
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_recursive(src, dst)?;
            std::fs::remove_dir_all(src)
                .with_context(|| format!("failed to remove {} after copy", src.display()))?;
            Ok(())
        }
    }
}

/// Removes the directory tree at `path` when present; absent paths are not an
/// error.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_copy_dir_recursive_preserves_nested_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).expect("mkdir");
        std::fs::write(src.join("top.txt"), "top").expect("write");
        std::fs::write(src.join("nested").join("inner.txt"), "inner").expect("write");

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).expect("copy");

        assert_eq!(
            std::fs::read_to_string(dst.join("top.txt")).expect("read"),
            "top"
        );
        assert_eq!(
            std::fs::read_to_string(dst.join("nested").join("inner.txt")).expect("read"),
            "inner"
        );
    }

    #[test]
    fn unit_copy_dir_recursive_rejects_file_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("plain.txt");
        std::fs::write(&file, "data").expect("write");

        let error = copy_dir_recursive(&file, &temp.path().join("out")).expect_err("must fail");
        assert!(error.to_string().contains("is not a directory"));
    }

    #[test]
    fn unit_move_dir_relocates_contents_and_removes_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).expect("mkdir");
        std::fs::write(src.join("payload.txt"), "payload").expect("write");

        let dst = temp.path().join("dst");
        move_dir(&src, &dst).expect("move");

        assert!(!src.exists());
        assert_eq!(
            std::fs::read_to_string(dst.join("payload.txt")).expect("read"),
            "payload"
        );
    }

    #[test]
    fn unit_remove_dir_if_exists_ignores_missing_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        remove_dir_if_exists(&temp.path().join("absent")).expect("missing path is fine");

        let present = temp.path().join("present");
        std::fs::create_dir_all(&present).expect("mkdir");
        remove_dir_if_exists(&present).expect("remove");
        assert!(!present.exists());
    }
}

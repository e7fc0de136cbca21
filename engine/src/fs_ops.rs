//! Filesystem operations module.
//!
//! This module provides the low-level operations jobs are built from:
//! - Enumerating a source directory tree
//! - Fingerprinting sources so changes during a transfer are noticed
//! - Locating the volume a destination lives on
//! - Checking that this process may create entries in a directory
//! - Best-effort cleanup and metadata preservation

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One entry of an enumerated source tree, relative to the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub relative_path: PathBuf,
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Size and modification time captured at preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl Fingerprint {
    pub fn of(metadata: &fs::Metadata) -> Self {
        Fingerprint {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    /// Read the fingerprint of `path` without following a final symlink.
    pub fn read(path: &Path) -> io::Result<Self> {
        fs::symlink_metadata(path).map(|m| Self::of(&m))
    }
}

/// Enumerate the directory tree under `root` in pre-order.
///
/// Parents always appear before their children. Symbolic links are
/// refused rather than followed, since following them can escape the tree
/// or loop.
pub fn enumerate_tree(root: &Path) -> io::Result<Vec<TreeEntry>> {
    let mut items = Vec::new();

    fn recurse(path: &Path, rel_path: &Path, items: &mut Vec<TreeEntry>) -> io::Result<()> {
        let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
        // Stable order keeps event streams and tests reproducible
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let metadata = fs::symlink_metadata(entry.path())?;
            let rel_full_path = rel_path.join(entry.file_name());

            if metadata.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("symbolic link '{}' is not transferred", entry.path().display()),
                ));
            }

            if metadata.is_dir() {
                items.push(TreeEntry {
                    relative_path: rel_full_path.clone(),
                    is_dir: true,
                    len: 0,
                    modified: metadata.modified().ok(),
                });
                recurse(&entry.path(), &rel_full_path, items)?;
            } else {
                items.push(TreeEntry {
                    relative_path: rel_full_path,
                    is_dir: false,
                    len: metadata.len(),
                    modified: metadata.modified().ok(),
                });
            }
        }
        Ok(())
    }

    recurse(root, Path::new(""), &mut items)?;
    Ok(items)
}

/// Walk up from `path` to the first ancestor (or itself) that exists.
pub fn nearest_existing_ancestor(path: &Path) -> Option<(PathBuf, fs::Metadata)> {
    path.ancestors()
        .find_map(|p| fs::metadata(p).ok().map(|m| (p.to_path_buf(), m)))
}

/// Whether this process may create entries in `dir`.
///
/// Asks the kernel with the effective credentials, so ownership and ACLs
/// count, not just the permission bits.
#[cfg(unix)]
pub fn check_writable(dir: &Path) -> io::Result<()> {
    use rustix::fs::{access, Access};

    access(dir, Access::WRITE_OK | Access::EXEC_OK).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn check_writable(dir: &Path) -> io::Result<()> {
    if fs::metadata(dir)?.permissions().readonly() {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"))
    } else {
        Ok(())
    }
}

/// Identifies the filesystem volume a path lives on.
///
/// Two paths with the same key can be renamed into each other atomically
/// and compete for the same disk bandwidth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeKey {
    Device(u64),
    Prefix(PathBuf),
}

#[cfg(unix)]
pub fn volume_key(path: &Path) -> VolumeKey {
    use std::os::unix::fs::MetadataExt;

    match nearest_existing_ancestor(path) {
        Some((_, metadata)) => VolumeKey::Device(metadata.dev()),
        None => VolumeKey::Prefix(root_prefix(path)),
    }
}

#[cfg(not(unix))]
pub fn volume_key(path: &Path) -> VolumeKey {
    VolumeKey::Prefix(root_prefix(path))
}

fn root_prefix(path: &Path) -> PathBuf {
    path.components()
        .take_while(|c| {
            matches!(
                c,
                std::path::Component::Prefix(_) | std::path::Component::RootDir
            )
        })
        .collect()
}

/// Whether two existing paths name the same file.
#[cfg(unix)]
pub fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Whether `path` is `ancestor` or lies somewhere beneath it.
///
/// `path` may not exist yet; its nearest existing ancestor is canonicalized
/// and the missing tail re-attached.
pub fn is_within(path: &Path, ancestor: &Path) -> bool {
    let Ok(ancestor) = fs::canonicalize(ancestor) else {
        return false;
    };
    let Some((existing, _)) = nearest_existing_ancestor(path) else {
        return false;
    };
    let Ok(mut resolved) = fs::canonicalize(&existing) else {
        return false;
    };
    if let Ok(tail) = path.strip_prefix(&existing) {
        resolved.push(tail);
    }
    resolved.starts_with(&ancestor)
}

/// Remove a staged file or directory, logging instead of failing.
///
/// Cleanup runs on an already failing path; its own errors must not mask
/// the original failure.
pub async fn remove_best_effort(path: &Path, is_dir: bool) {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => log::debug!("removed staged data at {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to clean up {}: {}", path.display(), e),
    }
}

/// Stamp `mtime` onto `path`. Failure is logged and otherwise ignored.
pub fn preserve_mtime(path: &Path, mtime: Option<SystemTime>) {
    if let Some(mtime) = mtime {
        if let Err(e) = filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)) {
            log::warn!("could not preserve modification time on {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_enumerate_nested_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let subdir = src.join("subdir");
        fs::create_dir_all(&subdir).expect("Failed to create subdir");

        let mut file1 = fs::File::create(src.join("file1.txt")).expect("Failed to create file1");
        file1.write_all(b"data1").expect("Failed to write file1");
        fs::write(subdir.join("file2.txt"), b"data22").expect("Failed to write file2");

        let items = enumerate_tree(&src).expect("Failed to enumerate");

        let dirs: Vec<_> = items.iter().filter(|f| f.is_dir).collect();
        let files: Vec<_> = items.iter().filter(|f| !f.is_dir).collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(files.len(), 2);
        assert_eq!(files.iter().map(|f| f.len).sum::<u64>(), 11);

        // Parent directory is listed before its child
        let dir_pos = items.iter().position(|e| e.relative_path == Path::new("subdir"));
        let child_pos = items
            .iter()
            .position(|e| e.relative_path == Path::new("subdir").join("file2.txt"));
        assert!(dir_pos < child_pos);
    }

    #[test]
    fn test_enumerate_nonexistent_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(enumerate_tree(&temp_dir.path().join("nonexistent")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_refuses_symlinks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        std::os::unix::fs::symlink(temp_dir.path(), src.join("loop")).expect("Failed to symlink");

        let err = enumerate_tree(&src).expect_err("symlink should be refused");
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[cfg(unix)]
    #[test]
    fn test_check_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).expect("Failed to create dir");
        assert!(check_writable(&locked).is_ok());

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("Failed to chmod");
        let privileged = fs::write(locked.join("probe"), b"x").is_ok();
        let result = check_writable(&locked);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("Failed to chmod");

        // Privileged users bypass permission bits; the kernel agrees with them
        assert_eq!(result.is_ok(), privileged);
        if let Err(e) = result {
            assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
        }
    }

    #[test]
    fn test_is_within_handles_missing_tail() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        assert!(is_within(&src.join("not").join("yet"), &src));
        assert!(is_within(&src, &src));
        assert!(!is_within(&temp_dir.path().join("elsewhere"), &src));
    }

    #[test]
    fn test_same_file_and_volume_key() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, b"a").expect("Failed to write a");
        fs::write(&b, b"b").expect("Failed to write b");

        assert!(same_file(&a, &a));
        assert!(!same_file(&a, &b));
        assert!(!same_file(&a, &temp_dir.path().join("missing")));
        assert_eq!(
            volume_key(&a),
            volume_key(&temp_dir.path().join("missing").join("deeper"))
        );
    }

    #[test]
    fn test_fingerprint_notices_changes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("f.txt");
        fs::write(&path, b"1234").expect("Failed to write file");

        let before = Fingerprint::read(&path).expect("Failed to fingerprint");
        assert_eq!(before.len, 4);
        fs::write(&path, b"123456").expect("Failed to rewrite file");
        assert_ne!(Fingerprint::read(&path).expect("Failed to fingerprint"), before);
    }

    #[tokio::test]
    async fn test_remove_best_effort_tolerates_missing_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let staged = temp_dir.path().join(".x.part");
        fs::write(&staged, b"partial").expect("Failed to write staged file");

        remove_best_effort(&staged, false).await;
        assert!(!staged.exists());
        remove_best_effort(&staged, false).await;
    }
}

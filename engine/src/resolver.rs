//! Path resolution and preflight checks.
//!
//! `resolve` turns a (source, destination directory) pair into a
//! `ResolvedTransfer`: a complete plan naming the final path, the staging
//! path and everything the job needs to know about the source. It only reads
//! metadata; nothing on disk is created or modified here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::TransferError;
use crate::fs_ops::{self, Fingerprint, TreeEntry};
use crate::model::CollisionPolicy;

/// Suffix of staging names; never used for finished files.
pub const STAGING_SUFFIX: &str = "ssm-part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    File,
    /// Directory tree, enumerated in pre-order relative to the source root
    Directory { entries: Vec<TreeEntry> },
}

/// Output of a successful preflight.
#[derive(Debug, Clone)]
pub struct ResolvedTransfer {
    pub source: PathBuf,
    pub kind: SourceKind,
    pub source_fingerprint: Fingerprint,
    pub total_bytes: u64,
    pub destination_dir: PathBuf,
    /// Destination directory does not exist yet and must be created first
    pub create_destination: bool,
    pub final_path: PathBuf,
    /// Same directory as `final_path`, so the final rename never crosses volumes
    pub staging_path: PathBuf,
    /// `final_path` currently holds a file the rename will replace
    pub replaces_existing: bool,
}

impl ResolvedTransfer {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, SourceKind::Directory { .. })
    }
}

/// Resolve with the default collision policy (`Fail`).
pub fn resolve(source: &Path, destination_dir: &Path) -> Result<ResolvedTransfer, TransferError> {
    resolve_with(source, destination_dir, CollisionPolicy::Fail)
}

/// Validate `source` and `destination_dir` and plan the transfer.
pub fn resolve_with(
    source: &Path,
    destination_dir: &Path,
    policy: CollisionPolicy,
) -> Result<ResolvedTransfer, TransferError> {
    check_syntax(source)?;
    check_syntax(destination_dir)?;

    let file_name = source
        .file_name()
        .ok_or_else(|| TransferError::invalid(source, "path has no final file name component"))?;

    let (kind, source_fingerprint, total_bytes) = inspect_source(source)?;
    let create_destination = inspect_destination(destination_dir)?;

    if let SourceKind::Directory { .. } = kind {
        if fs_ops::is_within(destination_dir, source) {
            return Err(TransferError::invalid(
                destination_dir,
                "destination lies inside the source directory",
            ));
        }
    }

    let candidate = destination_dir.join(file_name);
    if fs_ops::same_file(source, &candidate) {
        return Err(TransferError::invalid(
            source,
            "source and destination are the same file",
        ));
    }

    let (final_path, replaces_existing) = match fs::symlink_metadata(&candidate) {
        Ok(existing) => match policy {
            CollisionPolicy::Fail => {
                return Err(TransferError::DestinationExists { path: candidate })
            }
            CollisionPolicy::Overwrite => {
                // Only a file can be swapped out by a single rename
                if existing.is_dir() || matches!(kind, SourceKind::Directory { .. }) {
                    return Err(TransferError::DestinationExists { path: candidate });
                }
                (candidate, true)
            }
            CollisionPolicy::Rename => (unique_name(&candidate), false),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => (candidate, false),
        Err(e) => {
            return Err(TransferError::inaccessible(&candidate, e.to_string()));
        }
    };

    let staging_path = staging_path_for(&final_path);

    Ok(ResolvedTransfer {
        source: source.to_path_buf(),
        kind,
        source_fingerprint,
        total_bytes,
        destination_dir: destination_dir.to_path_buf(),
        create_destination,
        final_path,
        staging_path,
        replaces_existing,
    })
}

fn check_syntax(path: &Path) -> Result<(), TransferError> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(TransferError::invalid(path, "path is empty"));
    }
    if raw.to_string_lossy().contains('\0') {
        return Err(TransferError::invalid(path, "path contains a NUL byte"));
    }
    if !path.is_absolute() {
        return Err(TransferError::invalid(path, "path must be absolute"));
    }
    Ok(())
}

fn inspect_source(source: &Path) -> Result<(SourceKind, Fingerprint, u64), TransferError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TransferError::unreadable(source, "source does not exist"),
        _ => TransferError::unreadable(source, e.to_string()),
    })?;

    if metadata.file_type().is_symlink() {
        return Err(TransferError::unreadable(
            source,
            "symbolic links are not transferred",
        ));
    }

    if metadata.is_dir() {
        let entries =
            fs_ops::enumerate_tree(source).map_err(|e| TransferError::unreadable(source, e.to_string()))?;
        let total = entries.iter().filter(|e| !e.is_dir).map(|e| e.len).sum();
        Ok((SourceKind::Directory { entries }, Fingerprint::of(&metadata), total))
    } else if metadata.is_file() {
        // Opening read-only proves readability without touching anything
        fs::File::open(source).map_err(|e| TransferError::unreadable(source, e.to_string()))?;
        Ok((SourceKind::File, Fingerprint::of(&metadata), metadata.len()))
    } else {
        Err(TransferError::unreadable(
            source,
            "not a regular file or directory",
        ))
    }
}

/// Returns whether the directory still has to be created.
fn inspect_destination(dir: &Path) -> Result<bool, TransferError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => {
            fs_ops::check_writable(dir)
                .map_err(|e| TransferError::inaccessible(dir, format!("directory is not writable: {e}")))?;
            Ok(false)
        }
        Ok(_) => Err(TransferError::inaccessible(dir, "not a directory")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            match fs_ops::nearest_existing_ancestor(dir) {
                Some((ancestor, metadata)) if !metadata.is_dir() => Err(TransferError::inaccessible(
                    dir,
                    format!("'{}' is not a directory", ancestor.display()),
                )),
                Some((ancestor, _)) => {
                    fs_ops::check_writable(&ancestor).map_err(|e| {
                        TransferError::inaccessible(
                            dir,
                            format!("cannot create under '{}': {e}", ancestor.display()),
                        )
                    })?;
                    Ok(true)
                }
                None => Err(TransferError::inaccessible(dir, "no existing ancestor directory")),
            }
        }
        Err(e) => Err(TransferError::inaccessible(dir, e.to_string())),
    }
}

/// First free `stem (N).ext` next to `taken`.
pub fn unique_name(taken: &Path) -> PathBuf {
    let parent = taken.parent().unwrap_or_else(|| Path::new(""));
    let stem = taken
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = taken.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            parent.join(name)
        })
        .find(|candidate| fs::symlink_metadata(candidate).is_err())
        .unwrap_or_else(|| taken.to_path_buf())
}

/// The name `path` and all of its `stem (N).ext` variants share.
///
/// `x.txt`, `x (1).txt` and `x (1) (1).txt` all map to `x.txt`, so any name
/// [`unique_name`] can produce stays within its input's family.
pub fn name_family(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let mut stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    while let Some(base) = strip_counter(&stem) {
        stem = base.to_string();
    }
    match path.extension() {
        Some(ext) => parent.join(format!("{stem}.{}", ext.to_string_lossy())),
        None => parent.join(stem),
    }
}

/// `"x (12)"` -> `"x"`.
fn strip_counter(stem: &str) -> Option<&str> {
    let inner = stem.strip_suffix(')')?;
    let open = inner.rfind(" (")?;
    let digits = &inner[open + 2..];
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(&inner[..open])
    } else {
        None
    }
}

/// Hidden sibling of `final_path` carrying a unique token.
pub fn staging_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token = Uuid::new_v4().simple();
    let parent = final_path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!(".{name}.{token}.{STAGING_SUFFIX}"))
}

/// Whether `name` follows the staging naming convention.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(&format!(".{STAGING_SUFFIX}"))
}

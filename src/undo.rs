//! Single-slot undo log.
//!
//! Exactly one operation is retained. Recording a new one drops the previous
//! entry, and with it any backup directory it owned.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::error::{FsError, Result};
use crate::sync::IgnorePoison;

// ============================================================================
// Backups
// ============================================================================

/// A copy of deleted content, held in a temporary directory outside the
/// sandbox. The directory is removed when the backup is dropped.
#[derive(Debug)]
pub struct Backup {
    dir: TempDir,
    path: PathBuf,
}

impl Backup {
    /// Copies `source` (file, symlink or whole tree) into a fresh directory under `base`.
    pub fn create(source: &Path, base: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("undo-").tempdir_in(base)?;
        let name = source
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "backup source has no name"))?;
        let path = dir.path().join(name);

        copy_entry(source, &path)?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the backup on disk past this value's lifetime.
    pub fn retain(self) -> PathBuf {
        let Backup { dir, path } = self;
        let _ = dir.keep();
        path
    }
}

/// Copies a file, a symlink (as a link, never its target) or a whole tree.
pub fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(src)?.file_type();
    if file_type.is_symlink() {
        copy_link(src, dst)
    } else if file_type.is_dir() {
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

/// Recursive copy. Symlinks inside the tree are recreated as symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            copy_link(&src_path, &dst_path)?;
        } else if file_type.is_dir() {
            copy_tree(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(windows)]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    // Dangling links have no kind to inspect; recreate them as file links.
    if fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}

#[cfg(not(any(unix, windows)))]
fn copy_link(_src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"))
}

/// Copies back whatever under `src` is missing from `dst`, leaving present
/// entries alone.
pub fn restore_missing(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dst).is_err() {
        return copy_entry(src, dst);
    }
    let src_is_tree = fs::symlink_metadata(src)?.is_dir();
    let dst_is_tree = fs::symlink_metadata(dst)?.is_dir();
    if src_is_tree && dst_is_tree {
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            restore_missing(&entry.path(), &dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug)]
pub enum Operation {
    Upload {
        created_paths: Vec<PathBuf>,
    },
    CreateFolder {
        created_path: PathBuf,
    },
    Delete {
        original_path: PathBuf,
        backup: Backup,
        was_directory: bool,
    },
    Rename {
        old_path: PathBuf,
        new_path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    CreateFolder,
    Delete,
    Rename,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Upload { .. } => OperationKind::Upload,
            Operation::CreateFolder { .. } => OperationKind::CreateFolder,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Rename { .. } => OperationKind::Rename,
        }
    }
}

/// An operation plus the sandbox-relative directory whose listing it changed.
#[derive(Debug)]
pub struct LoggedOperation {
    pub operation: Operation,
    pub directory: String,
    pub recorded_at: DateTime<Utc>,
}

impl LoggedOperation {
    pub fn new(operation: Operation, directory: impl Into<String>) -> Self {
        Self {
            operation,
            directory: directory.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUndo {
    pub kind: OperationKind,
    pub directory: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Undo log
// ============================================================================

#[derive(Debug, Default)]
pub struct UndoLog {
    slot: Mutex<Option<LoggedOperation>>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `entry`, superseding the previous one.
    pub fn record(&self, entry: LoggedOperation) {
        let previous = self.slot.lock_ignore_poison().replace(entry);
        // Dropped outside the lock: a superseded backup may be a large tree.
        drop(previous);
    }

    pub fn pending(&self) -> Option<PendingUndo> {
        self.slot.lock_ignore_poison().as_ref().map(|entry| PendingUndo {
            kind: entry.operation.kind(),
            directory: entry.directory.clone(),
            recorded_at: entry.recorded_at,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock_ignore_poison().is_none()
    }

    /// Reverses the pending operation and returns the directory it affected.
    ///
    /// The slot is cleared whether or not the reversal succeeds. The lock is
    /// held for the whole reversal so a concurrent `record` lands strictly
    /// before or after it.
    pub fn undo(&self) -> Result<String> {
        let mut slot = self.slot.lock_ignore_poison();
        let entry = slot.take().ok_or(FsError::NothingToUndo)?;
        let kind = entry.operation.kind();
        let directory = entry.directory;

        reverse(entry.operation)?;
        info!("Undid {kind:?} in '{directory}'");
        Ok(directory)
    }
}

fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn reverse(operation: Operation) -> Result<()> {
    match operation {
        Operation::Upload { created_paths } => {
            for path in created_paths.iter().filter(|p| occupied(p)) {
                fs::remove_file(path).map_err(|e| {
                    FsError::UndoFailed(format!("cannot remove {}: {e}", path.display()))
                })?;
            }
            Ok(())
        }

        Operation::CreateFolder { created_path } => {
            if !occupied(&created_path) {
                return Ok(());
            }
            let mut contents = fs::read_dir(&created_path).map_err(|e| {
                FsError::UndoFailed(format!("cannot read {}: {e}", created_path.display()))
            })?;
            if contents.next().is_some() {
                return Err(FsError::UndoFailed(format!(
                    "folder {} is no longer empty",
                    created_path.display()
                )));
            }
            fs::remove_dir(&created_path).map_err(|e| {
                FsError::UndoFailed(format!("cannot remove {}: {e}", created_path.display()))
            })
        }

        Operation::Delete {
            original_path,
            backup,
            was_directory,
        } => {
            if !occupied(backup.path()) {
                return Err(FsError::UndoFailed("backup no longer exists".to_string()));
            }
            if occupied(&original_path) {
                let kept = backup.retain();
                warn!("Restore target exists, backup kept at {}", kept.display());
                return Err(FsError::UndoFailed(format!(
                    "{} already exists; backup kept at {}",
                    original_path.display(),
                    kept.display()
                )));
            }

            if let Err(err) = copy_entry(backup.path(), &original_path) {
                let kept = backup.retain();
                warn!("Restore of {} failed, backup kept at {}", original_path.display(), kept.display());
                return Err(FsError::UndoFailed(format!(
                    "cannot restore {}: {err}; backup kept at {}",
                    original_path.display(),
                    kept.display()
                )));
            }
            let kind = if was_directory { "folder" } else { "file" };
            info!("Restored {kind} {}", original_path.display());
            Ok(())
        }

        Operation::Rename { old_path, new_path } => {
            if !occupied(&new_path) {
                return Err(FsError::UndoFailed(format!(
                    "{} no longer exists",
                    new_path.display()
                )));
            }
            if occupied(&old_path) {
                return Err(FsError::UndoFailed(format!(
                    "{} already exists",
                    old_path.display()
                )));
            }
            fs::rename(&new_path, &old_path).map_err(|e| {
                FsError::UndoFailed(format!("cannot rename back to {}: {e}", old_path.display()))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_log_has_nothing_to_undo() {
        let log = UndoLog::new();
        assert!(log.is_empty());
        assert!(matches!(log.undo(), Err(FsError::NothingToUndo)));
    }

    #[test]
    fn superseded_backup_is_removed() {
        let tmp = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let file = tmp.path().join("gone.txt");
        fs::write(&file, "bye").unwrap();

        let backup = Backup::create(&file, backups.path()).unwrap();
        let backup_path = backup.path().to_path_buf();
        assert_eq!(fs::read_to_string(&backup_path).unwrap(), "bye");

        let log = UndoLog::new();
        log.record(LoggedOperation::new(
            Operation::Delete {
                original_path: file.clone(),
                backup,
                was_directory: false,
            },
            "",
        ));
        log.record(LoggedOperation::new(
            Operation::CreateFolder {
                created_path: tmp.path().join("new"),
            },
            "",
        ));

        assert!(!backup_path.exists());
        assert_eq!(log.pending().unwrap().kind, OperationKind::CreateFolder);
    }

    #[test]
    fn failed_restore_keeps_backup() {
        let tmp = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let file = tmp.path().join("doc.txt");
        fs::write(&file, "v1").unwrap();

        let backup = Backup::create(&file, backups.path()).unwrap();
        let backup_path = backup.path().to_path_buf();
        fs::write(&file, "v2").unwrap();

        let log = UndoLog::new();
        log.record(LoggedOperation::new(
            Operation::Delete {
                original_path: file.clone(),
                backup,
                was_directory: false,
            },
            "",
        ));

        assert!(matches!(log.undo(), Err(FsError::UndoFailed(_))));
        assert_eq!(fs::read_to_string(&file).unwrap(), "v2");
        assert_eq!(fs::read_to_string(&backup_path).unwrap(), "v1");
        assert!(log.is_empty());

        fs::remove_dir_all(backup_path.parent().unwrap()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn backup_copies_symlinks_as_links() {
        let tmp = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("real.txt"), "r").unwrap();
        std::os::unix::fs::symlink("real.txt", dir.join("link")).unwrap();
        std::os::unix::fs::symlink("missing.txt", dir.join("broken")).unwrap();

        let backup = Backup::create(&dir, backups.path()).unwrap();

        for name in ["link", "broken"] {
            let copied = backup.path().join(name);
            assert!(fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        }
        assert_eq!(fs::read_link(backup.path().join("broken")).unwrap(), Path::new("missing.txt"));
        assert_eq!(fs::read_to_string(backup.path().join("real.txt")).unwrap(), "r");
    }

    #[test]
    fn restore_missing_fills_gaps_only() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("sub/b.txt"), "b").unwrap();
        fs::create_dir(&dst).unwrap();
        fs::write(dst.join("a.txt"), "changed").unwrap();

        restore_missing(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "changed");
        assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "b");
    }
}

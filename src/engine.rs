//! Mutating file operations over the sandbox, plus the read-only helpers the
//! HTTP layer needs.
//!
//! Every mutation checks the caller's privilege, resolves its paths through
//! the sandbox, records itself in the undo log and returns the notification
//! the caller should broadcast.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{self, Archive};
use crate::error::{FsError, Result};
use crate::listing::{self, DirectoryEntry, ListOptions};
use crate::metadata;
use crate::notify::Notification;
use crate::sandbox::{Sandbox, SandboxPath};
use crate::sanitize::{self, NameDecision};
use crate::undo::{self, Backup, LoggedOperation, Operation, PendingUndo, UndoLog};

/// Bytes shown by a text preview.
pub const PREVIEW_LIMIT: usize = 10_000;

/// A successful mutation and the notification describing it.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub notification: Notification,
}

#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFailure {
    pub name: String,
    pub code: &'static str,
    pub message: String,
}

pub struct FileEngine {
    sandbox: Sandbox,
    undo: Arc<UndoLog>,
    backup_dir: PathBuf,
}

impl FileEngine {
    /// `backup_dir` holds delete backups and must lie outside the sandbox.
    pub fn new(sandbox: Sandbox, undo: Arc<UndoLog>, backup_dir: impl AsRef<Path>) -> io::Result<Self> {
        let backup_dir = fs::canonicalize(backup_dir.as_ref())?;
        if backup_dir.starts_with(sandbox.root()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "backup directory {} is inside the sandbox root",
                    backup_dir.display()
                ),
            ));
        }
        Ok(Self {
            sandbox,
            undo,
            backup_dir,
        })
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn pending_undo(&self) -> Option<PendingUndo> {
        self.undo.pending()
    }

    fn require(privileged: bool) -> Result<()> {
        if privileged {
            Ok(())
        } else {
            Err(FsError::Forbidden)
        }
    }

    /// Resolves `relative` and requires an existing directory there.
    fn directory(&self, relative: &str) -> Result<SandboxPath> {
        let dir = self.sandbox.resolve(relative)?;
        let meta = fs::metadata(dir.absolute())
            .map_err(|_| FsError::NotFound(dir.relative().to_string()))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(dir.relative().to_string()));
        }
        Ok(dir)
    }

    /// Name policy for folders and renames: there is no placeholder fallback.
    fn pick_name(&self, dir: &SandboxPath, requested: &str) -> Result<String> {
        match sanitize::decide_name(requested, |c| self.sandbox.child(dir, c).is_ok()) {
            NameDecision::UseGenerated(_) => Err(FsError::NameRequired),
            decision => Ok(decision.into_name()),
        }
    }

    // ========================================================================
    // Browsing
    // ========================================================================

    pub fn list(&self, relative: &str, options: &ListOptions) -> Result<Vec<DirectoryEntry>> {
        listing::list(&self.sandbox, relative, options)
    }

    pub fn build_archive(&self, relative: &str) -> Result<Archive> {
        archive::build_archive(&self.sandbox, relative)
    }

    /// Absolute path of a regular file for download.
    pub fn download_path(&self, relative: &str) -> Result<PathBuf> {
        let target = self.sandbox.resolve(relative)?;
        let meta = fs::metadata(target.absolute())
            .map_err(|_| FsError::NotFound(target.relative().to_string()))?;
        if !meta.is_file() {
            return Err(FsError::NotAFile(target.relative().to_string()));
        }
        Ok(target.absolute().to_path_buf())
    }

    /// The first `limit` bytes of a text file, cut at a character boundary.
    pub fn preview(&self, relative: &str, limit: usize) -> Result<String> {
        let path = self.download_path(relative)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if metadata::classify(&name).is_binary_media() {
            return Err(FsError::NotText(name));
        }

        let mut buf = Vec::with_capacity(limit.min(64 * 1024));
        File::open(&path)?.take(limit as u64).read_to_end(&mut buf)?;
        if buf.contains(&0) {
            return Err(FsError::NotText(name));
        }

        let valid = match std::str::from_utf8(&buf) {
            Ok(_) => buf.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => buf.len(),
        };
        let text = String::from_utf8_lossy(&buf[..valid]);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Writes each named file into `target_dir`. Per-file failures are
    /// reported without aborting the rest of the batch.
    pub fn upload(
        &self,
        privileged: bool,
        target_dir: &str,
        files: Vec<IncomingFile>,
    ) -> Result<Outcome<UploadReport>> {
        Self::require(privileged)?;
        let dir = self.directory(target_dir)?;

        let mut report = UploadReport::default();
        let mut created = Vec::new();
        for file in files {
            if file.name.is_empty() {
                continue;
            }
            let decision =
                sanitize::decide_name(&file.name, |c| self.sandbox.child(&dir, c).is_ok());

            match self.write_unique(&dir, decision.name(), &file.contents) {
                Ok(target) => {
                    report.uploaded.push(target.name().to_string());
                    created.push(target.absolute().to_path_buf());
                }
                Err(err) => {
                    warn!("Upload of '{}' failed: {err}", file.name);
                    report.failed.push(UploadFailure {
                        name: file.name,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if !created.is_empty() {
            self.undo.record(LoggedOperation::new(
                Operation::Upload {
                    created_paths: created,
                },
                dir.relative(),
            ));
        }
        info!(
            "Uploaded {} file(s) into '{}' ({} failed)",
            report.uploaded.len(),
            dir.relative(),
            report.failed.len()
        );

        Ok(Outcome {
            value: report,
            notification: Notification::directory_changed(dir.relative()),
        })
    }

    /// Creates `name` in `dir`, appending `_1`, `_2`, ... until the name is free.
    fn write_unique(&self, dir: &SandboxPath, name: &str, contents: &[u8]) -> Result<SandboxPath> {
        let mut candidate = name.to_string();
        let mut counter = 1;
        loop {
            let target = self.sandbox.child(dir, &candidate).map_err(|err| match err {
                FsError::Io(source) => FsError::WriteFailure {
                    name: candidate.clone(),
                    source,
                },
                other => other,
            })?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(target.absolute())
            {
                Ok(mut file) => {
                    if let Err(source) = file.write_all(contents) {
                        drop(file);
                        let _ = fs::remove_file(target.absolute());
                        return Err(FsError::WriteFailure {
                            name: candidate,
                            source,
                        });
                    }
                    return Ok(target);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = sanitize::with_suffix(name, counter);
                    counter += 1;
                }
                Err(source) => {
                    return Err(FsError::WriteFailure {
                        name: candidate,
                        source,
                    })
                }
            }
        }
    }

    /// Creates one directory level; missing parents are not created.
    pub fn create_folder(&self, privileged: bool, parent: &str, name: &str) -> Result<Outcome<String>> {
        Self::require(privileged)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(FsError::NameRequired);
        }
        let parent = self.directory(parent)?;
        let folder_name = self.pick_name(&parent, name)?;
        let target = self.sandbox.child(&parent, &folder_name)?;
        if target.exists() {
            return Err(FsError::AlreadyExists(target.relative().to_string()));
        }

        fs::create_dir(target.absolute()).map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(target.relative().to_string()),
            _ => FsError::Io(err),
        })?;

        self.undo.record(LoggedOperation::new(
            Operation::CreateFolder {
                created_path: target.absolute().to_path_buf(),
            },
            parent.relative(),
        ));
        info!("Created folder '{}'", target.relative());

        Ok(Outcome {
            value: target.relative().to_string(),
            notification: Notification::directory_changed(parent.relative()),
        })
    }

    /// Backs the target up outside the sandbox, then removes it.
    pub fn delete(&self, privileged: bool, path: &str) -> Result<Outcome<String>> {
        Self::require(privileged)?;
        let target = self.sandbox.resolve(path)?;
        if target.is_root() {
            return Err(FsError::rejected("cannot delete the sandbox root"));
        }
        let meta = fs::symlink_metadata(target.absolute())
            .map_err(|_| FsError::NotFound(target.relative().to_string()))?;
        let was_directory = meta.is_dir();

        let backup = Backup::create(target.absolute(), &self.backup_dir).map_err(|source| {
            FsError::BackupFailure {
                path: target.absolute().to_path_buf(),
                source,
            }
        })?;

        let removed = if was_directory {
            fs::remove_dir_all(target.absolute())
        } else {
            fs::remove_file(target.absolute())
        };
        if let Err(err) = removed {
            if was_directory {
                if let Err(restore_err) = undo::restore_missing(backup.path(), target.absolute()) {
                    let kept = backup.retain();
                    warn!(
                        "Partial delete of '{}' could not be rolled back ({restore_err}); backup kept at {}",
                        target.relative(),
                        kept.display()
                    );
                }
            }
            return Err(FsError::Io(err));
        }

        let parent = target.parent_relative();
        self.undo.record(LoggedOperation::new(
            Operation::Delete {
                original_path: target.absolute().to_path_buf(),
                backup,
                was_directory,
            },
            parent.as_str(),
        ));
        info!("Deleted '{}'", target.relative());

        Ok(Outcome {
            value: target.relative().to_string(),
            notification: Notification::directory_changed(&parent),
        })
    }

    /// Renames within the same parent directory. Returns the new relative path.
    pub fn rename(&self, privileged: bool, path: &str, new_name: &str) -> Result<Outcome<String>> {
        Self::require(privileged)?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(FsError::NameRequired);
        }
        let source = self.sandbox.resolve(path)?;
        if source.is_root() {
            return Err(FsError::rejected("cannot rename the sandbox root"));
        }
        if !source.exists() {
            return Err(FsError::NotFound(source.relative().to_string()));
        }

        let parent = self.sandbox.resolve(&source.parent_relative())?;
        let name = self.pick_name(&parent, new_name)?;
        let dest = self.sandbox.child(&parent, &name)?;
        if dest.exists() {
            return Err(FsError::AlreadyExists(dest.relative().to_string()));
        }

        fs::rename(source.absolute(), dest.absolute())?;

        self.undo.record(LoggedOperation::new(
            Operation::Rename {
                old_path: source.absolute().to_path_buf(),
                new_path: dest.absolute().to_path_buf(),
            },
            parent.relative(),
        ));
        info!("Renamed '{}' to '{}'", source.relative(), dest.relative());

        Ok(Outcome {
            value: dest.relative().to_string(),
            notification: Notification::directory_changed(parent.relative()),
        })
    }

    /// Reverses the last recorded mutation. Returns the affected directory.
    pub fn undo(&self, privileged: bool) -> Result<Outcome<String>> {
        Self::require(privileged)?;
        let directory = self.undo.undo()?;
        let notification = Notification::directory_changed(&directory);
        Ok(Outcome {
            value: directory,
            notification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (TempDir, TempDir, FileEngine) {
        let root = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let sandbox = Sandbox::new(root.path()).unwrap();
        let engine = FileEngine::new(sandbox, Arc::new(UndoLog::new()), backups.path()).unwrap();
        (root, backups, engine)
    }

    #[test]
    fn backup_dir_inside_root_is_refused() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("bak")).unwrap();
        let sandbox = Sandbox::new(root.path()).unwrap();
        assert!(FileEngine::new(sandbox, Arc::new(UndoLog::new()), root.path().join("bak")).is_err());
    }

    #[test]
    fn mutations_require_privilege() {
        let (root, _b, engine) = engine();
        fs::write(root.path().join("f.txt"), "x").unwrap();

        assert!(matches!(engine.create_folder(false, "", "x"), Err(FsError::Forbidden)));
        assert!(matches!(engine.delete(false, "f.txt"), Err(FsError::Forbidden)));
        assert!(matches!(engine.rename(false, "f.txt", "g.txt"), Err(FsError::Forbidden)));
        assert!(matches!(engine.upload(false, "", Vec::new()), Err(FsError::Forbidden)));
        assert!(matches!(engine.undo(false), Err(FsError::Forbidden)));
        assert!(root.path().join("f.txt").exists());
    }

    #[test]
    fn root_cannot_be_deleted_or_renamed() {
        let (_root, _b, engine) = engine();
        assert!(matches!(engine.delete(true, ""), Err(FsError::Rejected { .. })));
        assert!(matches!(engine.rename(true, "/", "x"), Err(FsError::Rejected { .. })));
    }

    #[test]
    fn preview_reads_text_and_refuses_media() {
        let (root, _b, engine) = engine();
        fs::write(root.path().join("notes.txt"), "\u{feff}hello world").unwrap();
        fs::write(root.path().join("pic.png"), "not really").unwrap();
        fs::write(root.path().join("blob.bin"), [0u8, 1, 2]).unwrap();

        assert_eq!(engine.preview("notes.txt", PREVIEW_LIMIT).unwrap(), "hello world");
        assert_eq!(engine.preview("notes.txt", 8).unwrap(), "hello");
        assert!(matches!(engine.preview("pic.png", PREVIEW_LIMIT), Err(FsError::NotText(_))));
        assert!(matches!(engine.preview("blob.bin", PREVIEW_LIMIT), Err(FsError::NotText(_))));
    }

    #[test]
    fn preview_cuts_at_character_boundary() {
        let (root, _b, engine) = engine();
        fs::write(root.path().join("ru.txt"), "\u{43f}\u{440}\u{438}").unwrap();
        // Each character is two bytes; three bytes ends mid-character.
        assert_eq!(engine.preview("ru.txt", 3).unwrap(), "\u{43f}");
    }

    #[test]
    fn download_path_requires_a_file() {
        let (root, _b, engine) = engine();
        fs::create_dir(root.path().join("dir")).unwrap();
        fs::write(root.path().join("file.txt"), "x").unwrap();

        assert!(engine.download_path("file.txt").is_ok());
        assert!(matches!(engine.download_path("dir"), Err(FsError::NotAFile(_))));
        assert!(matches!(engine.download_path("nope"), Err(FsError::NotFound(_))));
    }
}

//! Error taxonomy for the file-operation engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Every failure the engine can report to a caller.
#[derive(Error, Debug)]
pub enum FsError {
    /// The request touched something outside the sandbox, or the sandbox root itself.
    #[error("{reason}")]
    Rejected { reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a text file: {0}")]
    NotText(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("name required")]
    NameRequired,

    #[error("admin access required")]
    Forbidden,

    #[error("failed to write {name}: {source}")]
    WriteFailure {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The pre-delete copy failed; the original was left untouched.
    #[error("failed to back up {}: {source}", path.display())]
    BackupFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("no operation to undo")]
    NothingToUndo,

    #[error("undo failed: {0}")]
    UndoFailed(String),
}

impl FsError {
    pub fn escapes_sandbox() -> Self {
        FsError::Rejected {
            reason: "path escapes sandbox".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        FsError::Rejected {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::Rejected { .. } => "PATH_REJECTED",
            FsError::NotFound(_) => "NOT_FOUND",
            FsError::NotADirectory(_) => "NOT_A_DIRECTORY",
            FsError::NotAFile(_) => "NOT_A_FILE",
            FsError::NotText(_) => "NOT_TEXT",
            FsError::AlreadyExists(_) => "ALREADY_EXISTS",
            FsError::NameRequired => "NAME_REQUIRED",
            FsError::Forbidden => "FORBIDDEN",
            FsError::WriteFailure { .. } => "WRITE_FAILURE",
            FsError::BackupFailure { .. } => "BACKUP_FAILURE",
            FsError::Io(_) => "IO_FAILURE",
            FsError::NothingToUndo => "NOTHING_TO_UNDO",
            FsError::UndoFailed(_) => "UNDO_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};

// ============================================================================
// Sandboxed paths
// ============================================================================

/// A location under the sandbox root, kept in both absolute and normalized
/// relative form. Two values are equal iff their normalized forms match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPath {
    absolute: PathBuf,
    relative: String,
}

impl SandboxPath {
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Normalized `/`-separated path relative to the root; empty for the root itself.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    pub fn name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent_relative(&self) -> String {
        match self.relative.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        }
    }

    /// True when something (including a dangling symlink) occupies the path.
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.absolute).is_ok()
    }
}

// ============================================================================
// Sandbox
// ============================================================================

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("sandbox root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a client-supplied path against the root.
    ///
    /// The path is normalized lexically first, then the deepest existing
    /// ancestor is canonicalized (following symlinks) and must still lie under
    /// the root. The returned absolute path is the lexical one, so a symlink
    /// inside the sandbox is operated on as itself rather than its target.
    pub fn resolve(&self, relative: &str) -> Result<SandboxPath> {
        let relative = normalize_relative(relative)?;
        let absolute = relative
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(self.root.clone(), |path, component| path.join(component));

        // A file used as a directory (`a.txt/b`) means the path cannot exist.
        let canonical = canonicalize_existing(&absolute).map_err(|err| match err.kind() {
            io::ErrorKind::NotADirectory => FsError::NotFound(relative.clone()),
            _ => FsError::Io(err),
        })?;
        if !canonical.starts_with(&self.root) {
            return Err(FsError::escapes_sandbox());
        }

        Ok(SandboxPath { absolute, relative })
    }

    /// Resolves a single name inside `dir`. Names carrying separators or
    /// traversal components are rejected outright.
    pub fn child(&self, dir: &SandboxPath, name: &str) -> Result<SandboxPath> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(FsError::escapes_sandbox());
        }
        self.resolve(&join_relative(dir.relative(), name))
    }
}

/// Normalizes separators and `.`/`..` components. Popping past the root is a
/// sandbox escape; a leading `/` is read as root-relative.
pub fn normalize_relative(relative: &str) -> Result<String> {
    if relative.contains('\0') {
        return Err(FsError::rejected("path contains a NUL byte"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in relative.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::escapes_sandbox());
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn canonicalize_existing(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => {
                return Ok(tail
                    .iter()
                    .rev()
                    .fold(canonical, |acc, component| acc.join(component)));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

//! Directory listings: hidden-entry filtering, name search and sorting.

use std::cmp::Ordering;
use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FsError, Result};
use crate::metadata::{self, Category};
use crate::sandbox::{join_relative, Sandbox};

/// Names starting with this marker are never listed.
pub const HIDDEN_MARKER: char = '.';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Modified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filter: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub size_formatted: String,
    pub modified_at: DateTime<Utc>,
    pub category: Category,
    pub icon: String,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

/// Lists a directory under the sandbox. Recomputed from disk on every call.
pub fn list(sandbox: &Sandbox, relative: &str, options: &ListOptions) -> Result<Vec<DirectoryEntry>> {
    let dir = sandbox.resolve(relative)?;
    let meta = fs::metadata(dir.absolute())
        .map_err(|_| FsError::NotFound(dir.relative().to_string()))?;
    if !meta.is_dir() {
        return Err(FsError::NotADirectory(dir.relative().to_string()));
    }

    let needle = options
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase);

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir.absolute())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(HIDDEN_MARKER) {
            continue;
        }
        if let Some(needle) = &needle {
            if !name.to_lowercase().contains(needle.as_str()) {
                continue;
            }
        }

        let path = entry.path();
        let meta = match fs::metadata(&path).or_else(|_| fs::symlink_metadata(&path)) {
            Ok(m) => m,
            Err(err) => {
                debug!("Skipping unreadable entry {}: {err}", path.display());
                continue;
            }
        };
        let is_dir = meta.is_dir();
        let size_bytes = if is_dir { metadata::size_of(&path) } else { meta.len() };

        entries.push(DirectoryEntry {
            size_formatted: metadata::humanize(size_bytes),
            modified_at: metadata::modified_at(&meta),
            category: metadata::classify_entry(&name, is_dir),
            icon: metadata::icon_for(&name, is_dir).to_string(),
            relative_path: join_relative(dir.relative(), &name),
            name,
            is_dir,
            size_bytes,
        });
    }

    sort_entries(&mut entries, options.sort, options.order);
    Ok(entries)
}

/// Directories first, then the chosen key, then case-insensitive name.
/// Descending order reverses the complete comparator.
pub fn compare(a: &DirectoryEntry, b: &DirectoryEntry, key: SortKey) -> Ordering {
    let by_key = match key {
        SortKey::Name => Ordering::Equal,
        SortKey::Size => a.size_bytes.cmp(&b.size_bytes),
        SortKey::Modified => a.modified_at.cmp(&b.modified_at),
    };

    b.is_dir
        .cmp(&a.is_dir)
        .then(by_key)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_entries(entries: &mut [DirectoryEntry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        let ord = compare(a, b, key);
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

pub fn breadcrumbs(relative: &str) -> Vec<Breadcrumb> {
    let mut path = String::new();
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            path = join_relative(&path, part);
            Breadcrumb {
                name: part.to_string(),
                path: path.clone(),
            }
        })
        .collect()
}

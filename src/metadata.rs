use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Video,
    Audio,
    Document,
    Code,
    Archive,
    Folder,
    Other,
}

impl Category {
    /// Categories whose content is never shown as a text preview.
    pub fn is_binary_media(self) -> bool {
        matches!(
            self,
            Category::Image | Category::Video | Category::Audio | Category::Archive
        )
    }
}

fn extension_lower(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Extension-based classification, case-insensitive. Never returns `Folder`.
pub fn classify(name: &str) -> Category {
    let Some(ext) = extension_lower(name) else {
        return Category::Other;
    };
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" | "ico" => Category::Image,
        "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" => Category::Video,
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "m4a" => Category::Audio,
        "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" | "rtf"
        | "odt" | "csv" => Category::Document,
        "py" | "js" | "ts" | "html" | "css" | "php" | "cpp" | "h" | "java" | "c" | "rs"
        | "go" | "json" | "toml" | "yaml" | "yml" | "sh" => Category::Code,
        "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" | "tgz" => Category::Archive,
        _ => Category::Other,
    }
}

pub fn classify_entry(name: &str, is_dir: bool) -> Category {
    if is_dir {
        Category::Folder
    } else {
        classify(name)
    }
}

/// Icon class shown by the browser UI for an entry.
pub fn icon_for(name: &str, is_dir: bool) -> &'static str {
    if is_dir {
        return "fas fa-folder";
    }
    match extension_lower(name).as_deref() {
        Some("pdf") => "fas fa-file-pdf",
        Some("doc" | "docx") => "fas fa-file-word",
        Some("xls" | "xlsx") => "fas fa-file-excel",
        Some("ppt" | "pptx") => "fas fa-file-powerpoint",
        Some("txt" | "md" | "rtf") => "fas fa-file-alt",
        _ => match classify(name) {
            Category::Image => "fas fa-image",
            Category::Video => "fas fa-video",
            Category::Audio => "fas fa-music",
            Category::Code => "fas fa-file-code",
            Category::Archive => "fas fa-file-archive",
            _ => "fas fa-file",
        },
    }
}

// ============================================================================
// Sizes and timestamps
// ============================================================================

/// Size of a file, or the total of all regular files under a directory.
///
/// Unreadable entries count as zero; a partial total is returned rather than
/// an error. Symlinks are not followed.
pub fn size_of(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.metadata().map(|m| m.len()).unwrap_or(0))
        .sum()
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn humanize(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn modified_at(meta: &fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
        .unwrap_or_default()
}

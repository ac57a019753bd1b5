//! Filename policy for uploads, new folders and renames.
//!
//! Kept free of filesystem calls: the caller passes a predicate that answers
//! whether a candidate name would stay inside the target directory.

use std::path::Path;

use uuid::Uuid;

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduces a name to `[A-Za-z0-9_.-]`, the way conservative web servers do.
/// May return an empty string, e.g. for names written entirely in Cyrillic.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if !trimmed.is_empty() && WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameDecision {
    /// The name as supplied is safe and stays in the target directory.
    UseOriginal(String),
    UseSanitized(String),
    /// Sanitizing left nothing usable.
    UseGenerated(String),
}

impl NameDecision {
    pub fn name(&self) -> &str {
        match self {
            NameDecision::UseOriginal(n)
            | NameDecision::UseSanitized(n)
            | NameDecision::UseGenerated(n) => n,
        }
    }

    pub fn into_name(self) -> String {
        match self {
            NameDecision::UseOriginal(n)
            | NameDecision::UseSanitized(n)
            | NameDecision::UseGenerated(n) => n,
        }
    }
}

/// A name with no separators, traversal components or control characters.
fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
        && name.trim() == name
}

/// Picks the on-disk name for `original`.
///
/// The original is preferred whenever it is a single safe component that
/// `stays_in_dir` confirms lands directly inside the target directory, so
/// non-ASCII names survive. Otherwise the sanitized form is used, and a
/// generated placeholder when sanitizing leaves nothing.
pub fn decide_name(original: &str, stays_in_dir: impl Fn(&str) -> bool) -> NameDecision {
    let sanitized = secure_filename(original);
    if sanitized == original {
        return NameDecision::UseOriginal(sanitized);
    }
    if is_single_component(original) && stays_in_dir(original) {
        return NameDecision::UseOriginal(original.to_string());
    }
    if !sanitized.is_empty() {
        return NameDecision::UseSanitized(sanitized);
    }
    NameDecision::UseGenerated(generated_name(original))
}

/// `upload_<8 hex>` plus the original extension when it is plain ASCII.
pub fn generated_name(original: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let ext = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("upload_{}{ext}", &id[..8])
}

/// Inserts `_<n>` before the extension: `note.txt` becomes `note_1.txt`.
pub fn with_suffix(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{n}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}_{n}"),
    }
}

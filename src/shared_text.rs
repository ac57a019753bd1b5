//! A small shared text blob every viewer can read and edit, persisted to a
//! JSON config file so it survives restarts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sync::IgnorePoison;

const DEFAULT_TEXT: &str = "Welcome";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedConfig {
    pub shared_text: String,
}

impl Default for PersistedConfig {
    fn default() -> Self {
        Self {
            shared_text: DEFAULT_TEXT.to_string(),
        }
    }
}

type ChangeCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct SharedTextStore {
    path: PathBuf,
    state: Mutex<PersistedConfig>,
    on_change: Option<ChangeCallback>,
}

impl SharedTextStore {
    /// Loads `path`, falling back to defaults when it is missing or
    /// unreadable. A missing file is created.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = if path.exists() {
            match read_config(&path) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(err) => {
                    warn!("Error loading config {}: {err:#}", path.display());
                    PersistedConfig::default()
                }
            }
        } else {
            info!("Config file {} not found, creating it", path.display());
            let config = PersistedConfig::default();
            if let Err(err) = write_config(&path, &config) {
                warn!("Failed to create config {}: {err:#}", path.display());
            }
            config
        };

        Self {
            path,
            state: Mutex::new(config),
            on_change: None,
        }
    }

    /// Called with the new content after every successful `set`.
    pub fn on_change(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn get(&self) -> String {
        self.state.lock_ignore_poison().shared_text.clone()
    }

    /// Persists `content` first; memory and listeners only see it once it is on disk.
    pub fn set(&self, content: &str) -> Result<()> {
        {
            let mut state = self.state.lock_ignore_poison();
            let updated = PersistedConfig {
                shared_text: content.to_string(),
            };
            write_config(&self.path, &updated)?;
            *state = updated;
        }

        if let Some(callback) = &self.on_change {
            callback(content);
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<PersistedConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    // Files written by other tools may carry a UTF-8 BOM.
    let raw = raw.trim_start_matches('\u{feff}');
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn write_config(path: &Path, config: &PersistedConfig) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Cannot create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, config)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(())
}

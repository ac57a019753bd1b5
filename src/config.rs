use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Shared file server with live updates and one-step undo")]
pub struct Config {
    /// Directory served to clients; created if missing.
    #[arg(short, long, value_name = "DIR", default_value = "./files", env = "FILE_SHARE_ROOT")]
    pub root: PathBuf,

    #[arg(short, long, value_name = "ADDR", default_value = "0.0.0.0:8080", env = "FILE_SHARE_BIND")]
    pub bind: SocketAddr,

    /// Password that grants admin (mutating) access.
    #[arg(long, env = "FILE_SHARE_ADMIN_PASSWORD", default_value = DEFAULT_ADMIN_PASSWORD, hide_env_values = true)]
    pub admin_password: String,

    /// JSON file persisting the shared text.
    #[arg(long, value_name = "FILE", default_value = "config.json", env = "FILE_SHARE_CONFIG")]
    pub config_file: PathBuf,

    /// Where delete backups live until undone or superseded. Must be outside the root.
    #[arg(long, value_name = "DIR", env = "FILE_SHARE_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 500, env = "FILE_SHARE_MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,
}

impl Config {
    /// Creates the root directory when it does not exist yet.
    pub fn prepare_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Cannot create root directory {}", self.root.display()))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn uses_default_password(&self) -> bool {
        self.admin_password == DEFAULT_ADMIN_PASSWORD
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use file_share::config::Config;
use file_share::engine::FileEngine;
use file_share::handlers::{router, AppState};
use file_share::notify::{Broadcaster, ChannelBroadcaster, Notification};
use file_share::sandbox::Sandbox;
use file_share::shared_text::SharedTextStore;
use file_share::undo::UndoLog;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    if config.uses_default_password() {
        warn!("Using the default admin password; set FILE_SHARE_ADMIN_PASSWORD");
    }

    config.prepare_root()?;
    let sandbox = Sandbox::new(&config.root)
        .with_context(|| format!("Cannot open root {}", config.root.display()))?;
    info!("Serving {}", sandbox.root().display());

    let backup_dir = config.backup_dir();
    let engine = FileEngine::new(sandbox, Arc::new(UndoLog::new()), &backup_dir)
        .with_context(|| format!("Invalid backup directory {}", backup_dir.display()))?;

    let broadcaster = ChannelBroadcaster::default();
    let text_events = broadcaster.clone();
    let shared_text = SharedTextStore::load(&config.config_file)
        .on_change(move |content| text_events.notify(Notification::shared_text_changed(content)));

    let state = AppState {
        engine: Arc::new(engine),
        broadcaster,
        shared_text: Arc::new(shared_text),
        admin_password: Arc::from(config.admin_password.as_str()),
    };

    let app = router(state, config.max_upload_bytes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!("Server listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

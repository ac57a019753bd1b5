//! Change notifications handed to connected viewers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

pub const FILE_BROWSER_ROOM: &str = "file_browser";
pub const FILE_UPDATED_EVENT: &str = "file_updated";
pub const SHARED_TEXT_ROOM: &str = "shared_text";
pub const SHARED_TEXT_EVENT: &str = "shared_text_updated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub room: String,
    pub event: String,
    pub payload: Value,
}

impl Notification {
    /// The listing of `path` (sandbox-relative) changed.
    pub fn directory_changed(path: &str) -> Self {
        Self {
            room: FILE_BROWSER_ROOM.to_string(),
            event: FILE_UPDATED_EVENT.to_string(),
            payload: json!({ "path": path }),
        }
    }

    pub fn shared_text_changed(content: &str) -> Self {
        Self {
            room: SHARED_TEXT_ROOM.to_string(),
            event: SHARED_TEXT_EVENT.to_string(),
            payload: json!({ "content": content }),
        }
    }
}

pub trait Broadcaster: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Fans notifications out to every subscribed websocket connection.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Notification>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn notify(&self, notification: Notification) {
        // No subscribers is not an error: nobody is watching.
        if let Ok(receivers) = self.tx.send(notification) {
            debug!("Notification delivered to {receivers} subscriber(s)");
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::engine::UploadFailure;
use crate::listing::{Breadcrumb, DirectoryEntry, SortKey, SortOrder};
use crate::notify::Notification;
use crate::undo::PendingUndo;

// ============================================================================
// Requests (Client -> Server)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default, alias = "search")]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedPathRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedText {
    pub content: String,
}

// ============================================================================
// Responses (Server -> Client)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub entries: Vec<DirectoryEntry>,
    pub can_undo: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingUndo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub success: bool,
    pub content: String,
}

// ============================================================================
// WebSocket Message Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "EVENT")]
    Event(Notification),

    #[serde(rename = "PONG")]
    Pong,

    #[serde(rename = "ERROR")]
    Error(ErrorInfo),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN")]
    Join { room: String },

    #[serde(rename = "LEAVE")]
    Leave { room: String },

    #[serde(rename = "PING")]
    Ping,

    #[serde(rename = "UPDATE_SHARED_TEXT")]
    UpdateSharedText { content: String },
}

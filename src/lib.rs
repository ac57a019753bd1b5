pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod metadata;
pub mod notify;
pub mod protocol;
pub mod sandbox;
pub mod sanitize;
pub mod shared_text;
pub mod sync;
pub mod undo;
pub mod ws;

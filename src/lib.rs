//! Goldfinch - the conversational core of a personal-finance assistant.
//!
//! This crate is the state controller behind a multi-tab chat surface: each
//! tab owns its own message history, draft, attachments, and in-flight
//! request, while the session manager binds tabs to backend conversations
//! and persists the layout across restarts.
//!
//! # Architecture
//!
//! - `types` - canonical data model (messages, tabs, attachments)
//! - `model` - adapter from raw wire payloads to the canonical shape
//! - `api` - the backend Chat API boundary and cancellation capability
//! - `storage` - durable keyed storage for the session shape
//! - `store` - the tab list and per-tab conversational state
//! - `session` - tab lifecycle, conversation binding, persistence
//! - `exchange` - the send / stop / edit / copy workflow
//!
//! # Usage
//!
//! ```rust,no_run
//! use goldfinch::{Assistant, HttpChatApi};
//! use goldfinch::storage::FileStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let api = Arc::new(HttpChatApi::from_env()?);
//! let storage = Arc::new(FileStore::new(FileStore::default_dir()));
//! let assistant = Assistant::new(api, storage);
//! assistant.hydrate().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod model;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

mod exchange;

pub use api::{ApiError, ApiResult, CancelToken, ChatApi, ConversationSummary, HttpChatApi, SendReply};
pub use session::{Activation, Assistant};
pub use store::{TabState, TabStore};
pub use types::{ActionRecord, Attachment, Message, Role, Tab};

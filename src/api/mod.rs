//! Chat API boundary for Goldfinch.
//!
//! This module defines the surface the conversation core talks through:
//!
//! - `ChatApi` - the async contract covering conversations and messages
//! - `http` - the reqwest-backed implementation against the backend REST API
//! - `CancelToken` - the capability used to abort an in-flight send
//!
//! The core never touches a transport primitive directly; cancellation and
//! error classification both happen behind this boundary.

pub mod http;

pub use http::HttpChatApi;

use crate::model::RawMessage;
use crate::types::Attachment;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::Notify;

/// Common error type for all API operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The operation's own cancel token fired. Mapped to the fixed
    /// "generation stopped" user message, never to a network error.
    #[error("request cancelled")]
    Cancelled,

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation capability for one in-flight operation.
///
/// Clones share state. `cancel()` is idempotent; `cancelled()` resolves once
/// for every waiter after the first `cancel()` call.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering so a cancel between the two reads
            // cannot be missed.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One entry in the conversation history list.
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "conversationId")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(
        default,
        alias = "updatedAt",
        with = "time::serde::rfc3339::option"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

/// The pair of canonical turns a successful send produces.
#[derive(Clone, Debug, Deserialize)]
pub struct SendReply {
    #[serde(alias = "userMessage")]
    pub user: RawMessage,
    #[serde(alias = "aiMessage", alias = "assistantMessage")]
    pub assistant: RawMessage,
}

/// The backend conversation service, as the core consumes it.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self, limit: usize) -> ApiResult<Vec<ConversationSummary>>;

    /// Returns the new conversation id.
    async fn create_conversation(&self) -> ApiResult<String>;

    async fn rename_conversation(&self, id: &str, title: &str) -> ApiResult<()>;

    async fn delete_conversation(&self, id: &str) -> ApiResult<()>;

    async fn fetch_messages(&self, id: &str) -> ApiResult<Vec<RawMessage>>;

    /// Sends one user turn; resolves to the acknowledged user message plus
    /// the assistant's reply, or `ApiError::Cancelled` if `cancel` fired.
    async fn send_message(
        &self,
        id: &str,
        text: &str,
        attachments: &[Attachment],
        cancel: &CancelToken,
    ) -> ApiResult<SendReply>;

    async fn delete_message(&self, conversation_id: &str, server_id: &str) -> ApiResult<()>;
}

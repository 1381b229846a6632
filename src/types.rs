use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Title given to a tab before its first message names it.
pub const DEFAULT_TAB_TITLE: &str = "New Chat";

/// Greeting shown in a tab that has no backend conversation yet.
pub const WELCOME_MESSAGE: &str =
    "Hi! I'm Goldfinch, your finance assistant. Ask me about budgets, cards, or spending.";

/// Substituted when a send carries attachments but no text.
pub const ATTACHMENTS_ONLY_PROMPT: &str = "Please take a look at the attached files.";

/// Error written to a tab when the user aborts a pending response.
pub const STOPPED_MESSAGE: &str = "Generation stopped.";

/// Validation error for an edit submitted with no text. Never reaches the
/// network.
pub const EMPTY_EDIT_ERROR: &str = "Message text cannot be empty.";

/// Derived tab titles keep this many characters of the first message.
pub const TITLE_MAX_CHARS: usize = 50;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for provisional and synthetic messages.
pub(crate) fn next_local_id() -> String {
    format!("local-{}", NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
}

/// Tab ids are persisted across restarts and must never collide with a
/// restored tab, so the process counter is salted with the clock.
pub(crate) fn next_tab_id() -> String {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!("tab-{}-{}", nanos, NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
}

pub(crate) fn derive_title(text: &str) -> String {
    text.trim().chars().take(TITLE_MAX_CHARS).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A file carried by a message, or queued on a tab awaiting the next send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    pub reference: String,
}

/// A side effect the assistant performed while answering, display-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub success: bool,
}

/// One exchanged utterance in canonical form.
///
/// `server_id == None` marks a provisional message: shown optimistically and
/// replaced wholesale (matched by `id`, never by content) once the server
/// acknowledges, or removed if the send fails.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub server_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
    pub attachments: Vec<Attachment>,
    pub actions_executed: Vec<ActionRecord>,
}

impl Message {
    pub fn welcome() -> Self {
        Self {
            id: next_local_id(),
            server_id: None,
            role: Role::Assistant,
            content: WELCOME_MESSAGE.to_string(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
            attachments: Vec::new(),
            actions_executed: Vec::new(),
        }
    }

    pub fn provisional(content: String, attachments: Vec<Attachment>) -> Self {
        Self {
            id: next_local_id(),
            server_id: None,
            role: Role::User,
            content,
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
            attachments,
            actions_executed: Vec::new(),
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.server_id.is_none()
    }
}

/// One conversation surface. Persisted across restarts; the mutable slice
/// lives separately in [`crate::store::TabState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Tab {
    pub fn new(conversation_id: Option<String>, title: Option<&str>) -> Self {
        Self {
            id: next_tab_id(),
            conversation_id,
            title: title.unwrap_or(DEFAULT_TAB_TITLE).to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

//! Adapter between the backend's raw message payloads and the canonical
//! [`Message`] shape.
//!
//! The API has shipped two field-naming schemes over its lifetime: the
//! current one (`messageId`, `role`, `createdAt`) and a legacy one
//! (`type: "ai"`, `timestamp`). Both are absorbed here; the rest of the
//! crate only ever sees the canonical shape.

use crate::types::{ActionRecord, Attachment, Message, Role};
use serde::Deserialize;
use time::OffsetDateTime;

/// A message as the wire delivers it. Every field is optional because the
/// two historical schemes disagree on which ones exist.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, alias = "messageId")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Legacy discriminator: `"ai"` marked assistant turns.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "createdAt", with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Legacy timestamp field.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, alias = "updatedAt", with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default, alias = "actionsExecuted")]
    pub actions_executed: Vec<RawAction>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawAttachment {
    #[serde(default, alias = "fileName")]
    pub name: Option<String>,
    #[serde(default, alias = "fileSize")]
    pub size: u64,
    #[serde(default, alias = "fileUrl", alias = "url")]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawAction {
    #[serde(default, alias = "actionName")]
    pub action: Option<String>,
    #[serde(default)]
    pub success: bool,
}

/// Convert a raw payload into canonical form. `None` in, `None` out — the
/// caller filters, so a null entry is never emitted into a message list.
pub fn normalize(raw: Option<RawMessage>) -> Option<Message> {
    let raw = raw?;

    let role = resolve_role(&raw);
    let created_at = raw
        .created_at
        .or(raw.timestamp)
        .unwrap_or_else(OffsetDateTime::now_utc);
    let id = raw
        .message_id
        .clone()
        .unwrap_or_else(|| fallback_id(role, created_at));

    Some(Message {
        id,
        server_id: raw.message_id,
        role,
        content: raw.content.unwrap_or_default(),
        created_at,
        updated_at: raw.updated_at,
        attachments: raw.attachments.into_iter().map(attachment).collect(),
        actions_executed: raw.actions_executed.into_iter().map(action).collect(),
    })
}

fn resolve_role(raw: &RawMessage) -> Role {
    match raw.role.as_deref() {
        Some(role) if role.eq_ignore_ascii_case("assistant") => Role::Assistant,
        Some(_) => Role::User,
        None => match raw.kind.as_deref() {
            Some("ai") => Role::Assistant,
            _ => Role::User,
        },
    }
}

/// Content-independent fallback so list reconciliation stays stable when the
/// server omits an id.
fn fallback_id(role: Role, created_at: OffsetDateTime) -> String {
    let role = match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    format!("{}-{}", role, created_at.unix_timestamp_nanos())
}

fn attachment(raw: RawAttachment) -> Attachment {
    Attachment {
        name: raw.name.unwrap_or_default(),
        size: raw.size,
        reference: raw.reference.unwrap_or_default(),
    }
}

fn action(raw: RawAction) -> ActionRecord {
    ActionRecord {
        action: raw.action.unwrap_or_default(),
        success: raw.success,
    }
}

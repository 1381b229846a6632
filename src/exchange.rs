//! Message Exchange Protocol: send, stop, edit-and-resend, copy.
//!
//! Every step here re-reads the tab's *current* state under the store lock
//! rather than acting on a snapshot captured at call time. A tab closed
//! between steps turns the remaining steps into silent no-ops.

use crate::api::CancelToken;
use crate::model::normalize;
use crate::session::Assistant;
use crate::types::{
    ATTACHMENTS_ONLY_PROMPT, DEFAULT_TAB_TITLE, EMPTY_EDIT_ERROR, Message, STOPPED_MESSAGE,
    derive_title,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long the per-message "copied" indicator stays up.
const COPIED_INDICATOR: Duration = Duration::from_secs(2);

impl Assistant {
    /// Send one user turn on a tab.
    ///
    /// `text_override` takes precedence over the tab's draft (the edit flow
    /// uses it). An empty draft with no queued attachments is a no-op; a
    /// send that carries only attachments gets a fixed placeholder text.
    pub async fn send(&self, tab_id: &str, text_override: Option<&str>) {
        let prepared = {
            let tabs = self.lock();
            let Some(state) = tabs.state(tab_id) else {
                return;
            };
            if state.pending.is_some() {
                debug!(tab = tab_id, "send ignored, tab already has a pending request");
                return;
            }
            let text = text_override
                .map(str::to_string)
                .unwrap_or_else(|| state.draft.clone());
            let text = text.trim().to_string();
            let attachments = state.uploaded_files.clone();
            if text.is_empty() && attachments.is_empty() {
                return;
            }
            let conversation_id = tabs.tab(tab_id).and_then(|tab| tab.conversation_id.clone());
            (text, attachments, conversation_id)
        };
        let (mut text, attachments, conversation_id) = prepared;
        if text.is_empty() {
            text = ATTACHMENTS_ONLY_PROMPT.to_string();
        }

        // Bind a backend conversation lazily. A failure here aborts the
        // whole send with no optimistic echo shown.
        let conversation_id = match conversation_id {
            Some(id) => id,
            None => match self.api.create_conversation().await {
                Ok(id) => {
                    {
                        let mut tabs = self.lock();
                        if tabs.tab(tab_id).is_none() {
                            return;
                        }
                        tabs.bind_conversation(tab_id, id.clone());
                    }
                    self.persist();
                    id
                }
                Err(err) => {
                    self.update(tab_id, |state| state.error = Some(err.to_string()));
                    return;
                }
            },
        };

        // Optimistic echo plus a fresh cancellation handle.
        let provisional = Message::provisional(text.clone(), attachments.clone());
        let provisional_id = provisional.id.clone();
        let cancel = CancelToken::new();
        {
            let mut tabs = self.lock();
            if tabs.tab(tab_id).is_none() {
                return;
            }
            let token = cancel.clone();
            tabs.update_state(tab_id, move |state| {
                state.messages.push(provisional);
                state.draft.clear();
                state.is_typing = true;
                state.error = None;
                state.pending = Some(token);
            });
        }

        let result = self
            .api
            .send_message(&conversation_id, &text, &attachments, &cancel)
            .await;

        match result {
            Ok(reply) => {
                let user = normalize(Some(reply.user));
                let assistant = normalize(Some(reply.assistant));
                let needs_title = {
                    let mut tabs = self.lock();
                    let needs_title = tabs
                        .tab(tab_id)
                        .is_some_and(|tab| tab.title == DEFAULT_TAB_TITLE);
                    tabs.update_state(tab_id, |state| {
                        // Matched by local id, never by content: duplicate or
                        // edited text would make content matching ambiguous.
                        state.messages.retain(|msg| msg.id != provisional_id);
                        state.messages.extend(user);
                        state.messages.extend(assistant);
                        state.uploaded_files.clear();
                        state.is_typing = false;
                        state.pending = None;
                        state.error = None;
                    });
                    needs_title
                };
                if needs_title {
                    self.rename_conversation(tab_id, &derive_title(&text)).await;
                }
            }
            Err(err) => {
                let message = if err.is_cancelled() {
                    STOPPED_MESSAGE.to_string()
                } else {
                    err.to_string()
                };
                self.update(tab_id, |state| {
                    state.messages.retain(|msg| msg.id != provisional_id);
                    state.is_typing = false;
                    state.pending = None;
                    state.error = Some(message);
                });
            }
        }
    }

    /// Abort the tab's pending response. Idempotent: with nothing pending
    /// this does nothing.
    pub fn stop(&self, tab_id: &str) {
        self.update(tab_id, |state| {
            if let Some(pending) = state.pending.take() {
                pending.cancel();
                state.is_typing = false;
                state.error = Some(STOPPED_MESSAGE.to_string());
            }
        });
    }

    /// Replace a user turn and everything after it with a fresh send.
    ///
    /// Editing a turn invalidates every later message causally, so the tail
    /// from the target onward is deleted server-side first, oldest first. A
    /// failed delete aborts the edit with no local truncation committed.
    pub async fn edit_message(&self, tab_id: &str, message_id: &str, new_text: &str) {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            self.update(tab_id, |state| {
                state.error = Some(EMPTY_EDIT_ERROR.to_string());
            });
            return;
        }

        let located = {
            let tabs = self.lock();
            let conversation_id = tabs.tab(tab_id).and_then(|tab| tab.conversation_id.clone());
            tabs.state(tab_id).and_then(|state| {
                state
                    .messages
                    .iter()
                    .position(|msg| msg.id == message_id)
                    .map(|index| {
                        let server_ids: Vec<String> = state.messages[index..]
                            .iter()
                            .filter_map(|msg| msg.server_id.clone())
                            .collect();
                        (conversation_id, server_ids)
                    })
            })
        };
        let Some((conversation_id, server_ids)) = located else {
            debug!(tab = tab_id, message = message_id, "edit target no longer exists");
            return;
        };

        if let Some(conversation_id) = conversation_id.as_deref() {
            for server_id in &server_ids {
                if let Err(err) = self.api.delete_message(conversation_id, server_id).await {
                    self.update(tab_id, |state| state.error = Some(err.to_string()));
                    return;
                }
            }
        }

        self.update(tab_id, |state| {
            if let Some(index) = state.messages.iter().position(|msg| msg.id == message_id) {
                state.messages.truncate(index);
            }
        });

        self.send(tab_id, Some(new_text)).await;
    }

    /// Copy a message's text to the system clipboard and flash the per-
    /// message "copied" indicator for two seconds. Returns the copied text.
    pub fn copy_message(&self, tab_id: &str, message_id: &str) -> Option<String> {
        let content = {
            let tabs = self.lock();
            tabs.state(tab_id)?
                .messages
                .iter()
                .find(|msg| msg.id == message_id)
                .map(|msg| msg.content.clone())?
        };

        if let Ok(mut clipboard) = arboard::Clipboard::new()
            && let Err(err) = clipboard.set_text(content.clone())
        {
            debug!(error = %err, "clipboard write failed");
        }

        self.update(tab_id, |state| state.copied = Some(message_id.to_string()));

        let tabs = Arc::clone(&self.tabs);
        let tab_id = tab_id.to_string();
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(COPIED_INDICATOR).await;
            let mut store = tabs.lock().expect("tab store poisoned");
            store.update_state(&tab_id, |state| {
                // A later copy on the same tab owns the indicator now.
                if state.copied.as_deref() == Some(message_id.as_str()) {
                    state.copied = None;
                }
            });
        });

        Some(content)
    }
}

//! Conversation Session Manager.
//!
//! Binds tabs to backend conversations, loads their history, and persists
//! the session shape (tab list, active tab, current conversation) so a
//! restart restores the same layout. The in-memory [`TabStore`] is the
//! source of truth during a live session; storage is a derived mirror.

use crate::api::{ApiResult, ChatApi, ConversationSummary};
use crate::model::normalize;
use crate::storage::KeyStore;
use crate::store::{TabState, TabStore};
use crate::types::{Attachment, Message, Tab};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

const TABS_KEY: &str = "assistant_tabs";
const ACTIVE_TAB_KEY: &str = "assistant_active_tab";
const CONVERSATION_KEY: &str = "assistant_conversation";

/// Default page size for the conversation history list.
pub const CONVERSATION_PAGE: usize = 50;

/// External "open the assistant" request, optionally carrying a pre-filled
/// message.
#[derive(Clone, Debug, Default)]
pub struct Activation {
    pub message: Option<String>,
    pub auto_send: bool,
}

/// The conversational core: tab lifecycle, conversation binding, session
/// persistence, and (in `exchange`) the message workflow.
pub struct Assistant {
    pub(crate) api: Arc<dyn ChatApi>,
    storage: Arc<dyn KeyStore>,
    pub(crate) tabs: Arc<Mutex<TabStore>>,
    hydrated: AtomicBool,
    conversations: Mutex<Vec<ConversationSummary>>,
}

impl Assistant {
    pub fn new(api: Arc<dyn ChatApi>, storage: Arc<dyn KeyStore>) -> Self {
        Self {
            api,
            storage,
            tabs: Arc::new(Mutex::new(TabStore::new())),
            hydrated: AtomicBool::new(false),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TabStore> {
        self.tabs.lock().expect("tab store poisoned")
    }

    pub(crate) fn update(&self, tab_id: &str, apply: impl FnOnce(&mut TabState)) {
        self.lock().update_state(tab_id, apply);
    }

    // ----- read accessors (snapshots for the presentation layer) -----

    pub fn tabs_snapshot(&self) -> Vec<Tab> {
        self.lock().tabs().to_vec()
    }

    pub fn tab_state(&self, tab_id: &str) -> Option<TabState> {
        self.lock().state(tab_id).cloned()
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.lock().active().cloned()
    }

    pub fn current_conversation(&self) -> Option<String> {
        self.lock().current_conversation().map(str::to_string)
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations
            .lock()
            .expect("conversation cache poisoned")
            .clone()
    }

    // ----- session lifecycle -----

    /// Restore the persisted session shape. One-shot: later calls (e.g. a
    /// re-render racing startup) are no-ops, so stale storage is never
    /// re-imported over live state.
    pub async fn hydrate(&self) {
        if self.hydrated.swap(true, Ordering::SeqCst) {
            return;
        }

        let restored = self
            .storage
            .get(TABS_KEY)
            .and_then(|json| match serde_json::from_str::<Vec<Tab>>(&json) {
                Ok(tabs) => Some(tabs),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable persisted tab list");
                    None
                }
            })
            .unwrap_or_default();

        {
            let mut tabs = self.lock();
            for tab in restored {
                tabs.restore_tab(tab);
            }
            tabs.restore_pointers(
                self.storage.get(ACTIVE_TAB_KEY),
                self.storage.get(CONVERSATION_KEY),
            );
            if tabs.tabs().is_empty() {
                tabs.create_tab(None, None);
            } else if tabs.active_id().is_none() {
                let first = tabs.tabs()[0].id.clone();
                tabs.set_active(&first);
            }
        }
        self.persist();

        if let Some((tab_id, conversation_id)) = self.history_target() {
            self.load_history(&tab_id, &conversation_id).await;
        }
    }

    /// Mirror the session shape to durable storage. Keys whose value became
    /// absent are removed, not blanked.
    pub(crate) fn persist(&self) {
        let (tabs_json, active, conversation) = {
            let tabs = self.lock();
            let json = if tabs.tabs().is_empty() {
                None
            } else {
                serde_json::to_string(tabs.tabs()).ok()
            };
            (
                json,
                tabs.active_id().map(str::to_string),
                tabs.current_conversation().map(str::to_string),
            )
        };

        persist_key(&*self.storage, TABS_KEY, tabs_json.as_deref());
        persist_key(&*self.storage, ACTIVE_TAB_KEY, active.as_deref());
        persist_key(&*self.storage, CONVERSATION_KEY, conversation.as_deref());
    }

    // ----- tab lifecycle -----

    pub fn create_tab(&self) -> String {
        let id = self.lock().create_tab(None, None);
        self.persist();
        id
    }

    /// Close a tab, cancelling its pending send first. If the closed tab was
    /// active, the first remaining tab takes over and its history is loaded
    /// when it has none yet.
    pub async fn close_tab(&self, tab_id: &str) {
        let closed = self.lock().close_tab(tab_id);
        if !closed {
            return;
        }
        self.persist();
        if let Some((tab_id, conversation_id)) = self.history_target() {
            self.load_history(&tab_id, &conversation_id).await;
        }
    }

    pub async fn select_tab(&self, tab_id: &str) -> bool {
        if !self.lock().set_active(tab_id) {
            return false;
        }
        self.persist();
        if let Some((tab_id, conversation_id)) = self.history_target() {
            self.load_history(&tab_id, &conversation_id).await;
        }
        true
    }

    /// Open a conversation from the history list, reusing its tab when one
    /// is already bound to it.
    pub async fn open_conversation(&self, conversation_id: &str, title: &str) -> String {
        let (tab_id, created) = self.lock().activate_conversation(conversation_id, title);
        if created {
            debug!(conversation = conversation_id, "opened conversation in new tab");
        }
        self.persist();
        if let Some((tab_id, conversation_id)) = self.history_target() {
            self.load_history(&tab_id, &conversation_id).await;
        }
        tab_id
    }

    /// The active tab's conversation, when its messages still need fetching.
    fn history_target(&self) -> Option<(String, String)> {
        let tabs = self.lock();
        let tab = tabs.active()?;
        let conversation_id = tab.conversation_id.clone()?;
        let state = tabs.state(&tab.id)?;
        if state.messages.is_empty() && !state.is_loading_messages {
            Some((tab.id.clone(), conversation_id))
        } else {
            None
        }
    }

    // ----- conversation operations -----

    /// Fetch the message history for a tab's conversation, replacing the
    /// tab's messages wholesale. On failure the previously displayed
    /// messages stay put and the error is surfaced on the tab.
    pub async fn load_history(&self, tab_id: &str, conversation_id: &str) {
        self.update(tab_id, |state| {
            state.is_loading_messages = true;
            state.error = None;
        });

        match self.api.fetch_messages(conversation_id).await {
            Ok(raw) => {
                let messages: Vec<Message> =
                    raw.into_iter().filter_map(|msg| normalize(Some(msg))).collect();
                self.update(tab_id, |state| {
                    state.messages = messages;
                    state.is_loading_messages = false;
                });
            }
            Err(err) => {
                warn!(conversation = conversation_id, error = %err, "history load failed");
                self.update(tab_id, |state| {
                    state.error = Some(err.to_string());
                    state.is_loading_messages = false;
                });
            }
        }
    }

    /// Rename a tab locally and push the title to the backend. The local
    /// title is kept even if the backend rejects the rename.
    pub async fn rename_conversation(&self, tab_id: &str, title: &str) {
        let conversation_id = {
            let mut tabs = self.lock();
            tabs.set_title(tab_id, title);
            tabs.tab(tab_id).and_then(|tab| tab.conversation_id.clone())
        };
        self.persist();

        if let Some(conversation_id) = conversation_id
            && let Err(err) = self.api.rename_conversation(&conversation_id, title).await
        {
            warn!(conversation = %conversation_id, error = %err, "rename not persisted to backend");
        }
    }

    /// Delete a conversation on the backend, then remove it locally. Nothing
    /// is removed until the server confirms; the error is returned for the
    /// confirmation dialog rather than written to a tab.
    pub async fn delete_conversation(&self, conversation_id: &str) -> ApiResult<()> {
        self.api.delete_conversation(conversation_id).await?;

        {
            let mut tabs = self.lock();
            let bound = tabs.find_by_conversation(conversation_id).map(|tab| tab.id.clone());
            if let Some(tab_id) = bound {
                if tabs.active_id() == Some(tab_id.as_str()) {
                    tabs.reset_tab(&tab_id);
                } else {
                    tabs.close_tab(&tab_id);
                }
            }
            tabs.clear_current_conversation_if(conversation_id);
        }
        self.persist();
        self.refresh_conversations(CONVERSATION_PAGE).await;
        Ok(())
    }

    /// Refresh the cached conversation list for the history sidebar. A
    /// failed refresh keeps the previous cache.
    pub async fn refresh_conversations(&self, limit: usize) {
        match self.api.list_conversations(limit).await {
            Ok(list) => {
                *self
                    .conversations
                    .lock()
                    .expect("conversation cache poisoned") = list;
            }
            Err(err) => warn!(error = %err, "conversation list refresh failed"),
        }
    }

    // ----- per-tab input state -----

    pub fn set_draft(&self, tab_id: &str, text: &str) {
        self.update(tab_id, |state| state.draft = text.to_string());
    }

    pub fn attach_file(&self, tab_id: &str, attachment: Attachment) {
        self.update(tab_id, |state| state.uploaded_files.push(attachment));
    }

    pub fn remove_file(&self, tab_id: &str, reference: &str) {
        self.update(tab_id, |state| {
            state.uploaded_files.retain(|file| file.reference != reference);
        });
    }

    pub fn dismiss_error(&self, tab_id: &str) {
        self.update(tab_id, |state| state.error = None);
    }

    // ----- external activation -----

    /// Entry point for the cross-component "open the assistant" event:
    /// ensures a tab exists, pre-fills the draft, and optionally sends.
    pub async fn activate(&self, activation: Activation) {
        self.hydrate().await;

        let tab_id = match self.active_tab() {
            Some(tab) => tab.id,
            None => self.create_tab(),
        };

        if let Some(message) = activation.message {
            if activation.auto_send {
                self.send(&tab_id, Some(&message)).await;
            } else {
                self.set_draft(&tab_id, &message);
            }
        }
    }
}

fn persist_key(storage: &dyn KeyStore, key: &str, value: Option<&str>) {
    let result = match value {
        Some(value) => storage.set(key, value),
        None => storage.remove(key),
    };
    if let Err(err) = result {
        warn!(key, error = %err, "session persistence failed");
    }
}

//! Tab Store: the ordered tab list and each tab's conversational slice,
//! kept in lock-step.
//!
//! All tab state mutation in the crate funnels through this type. Async
//! continuations re-enter through [`TabStore::update_state`], which treats a
//! vanished tab as a silent no-op - a response resolving after its tab was
//! closed must never resurrect the tab's state.

use crate::api::CancelToken;
use crate::types::{Attachment, Message, Tab};
use std::collections::HashMap;
use tracing::debug;

/// The mutable conversational slice owned by exactly one tab.
#[derive(Clone, Debug, Default)]
pub struct TabState {
    /// Insertion order is chronological order.
    pub messages: Vec<Message>,
    pub is_typing: bool,
    pub is_loading_messages: bool,
    pub error: Option<String>,
    /// Attachments queued for the next send.
    pub uploaded_files: Vec<Attachment>,
    /// Per-tab in-progress input; tabs do not share a draft.
    pub draft: String,
    /// Cancellation handle for the in-flight send, `None` when idle.
    pub pending: Option<CancelToken>,
    /// Message id whose transient "copied" indicator is currently shown.
    pub copied: Option<String>,
}

impl TabState {
    fn for_tab(tab: &Tab) -> Self {
        let messages = if tab.conversation_id.is_none() {
            vec![Message::welcome()]
        } else {
            Vec::new()
        };
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Reset an open tab back to its unbound appearance.
    pub fn reset_to_welcome(&mut self) {
        self.messages = vec![Message::welcome()];
        self.error = None;
        self.is_loading_messages = false;
    }
}

#[derive(Default)]
pub struct TabStore {
    tabs: Vec<Tab>,
    states: HashMap<String, TabState>,
    active: Option<String>,
    current_conversation: Option<String>,
}

impl TabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn state(&self, id: &str) -> Option<&TabState> {
        self.states.get(id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Tab> {
        self.active.as_deref().and_then(|id| self.tab(id))
    }

    pub fn current_conversation(&self) -> Option<&str> {
        self.current_conversation.as_deref()
    }

    pub fn find_by_conversation(&self, conversation_id: &str) -> Option<&Tab> {
        self.tabs
            .iter()
            .find(|tab| tab.conversation_id.as_deref() == Some(conversation_id))
    }

    /// Append a new tab and make it active.
    pub fn create_tab(&mut self, conversation_id: Option<String>, title: Option<&str>) -> String {
        let tab = Tab::new(conversation_id, title);
        let id = tab.id.clone();
        self.states.insert(id.clone(), TabState::for_tab(&tab));
        self.current_conversation = tab.conversation_id.clone();
        self.tabs.push(tab);
        self.active = Some(id.clone());
        id
    }

    /// Re-insert a persisted tab during hydration. Does not change the
    /// active pointer; the caller restores it separately.
    pub fn restore_tab(&mut self, tab: Tab) {
        self.states.insert(tab.id.clone(), TabState::for_tab(&tab));
        self.tabs.push(tab);
    }

    /// Remove a tab and its state atomically, cancelling any pending send
    /// first. Closing a non-active tab never changes which tab is active;
    /// closing the active one activates the first remaining tab, or clears
    /// both the active and current-conversation pointers when none remain.
    pub fn close_tab(&mut self, id: &str) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| tab.id == id) else {
            return false;
        };

        if let Some(state) = self.states.remove(id)
            && let Some(pending) = state.pending
        {
            pending.cancel();
        }
        self.tabs.remove(index);

        if self.active.as_deref() == Some(id) {
            match self.tabs.first() {
                Some(next) => {
                    self.active = Some(next.id.clone());
                    self.current_conversation = next.conversation_id.clone();
                }
                None => {
                    self.active = None;
                    self.current_conversation = None;
                }
            }
        }
        true
    }

    /// Mutate one tab's state in place. A tab that no longer exists is a
    /// silent no-op, which is what makes late-resolving requests safe.
    pub fn update_state(&mut self, id: &str, apply: impl FnOnce(&mut TabState)) {
        match self.states.get_mut(id) {
            Some(state) => apply(state),
            None => debug!(tab = id, "dropping state update for closed tab"),
        }
    }

    /// Change the active pointer only; tab state is untouched.
    pub fn set_active(&mut self, id: &str) -> bool {
        let Some(tab) = self.tabs.iter().find(|tab| tab.id == id) else {
            return false;
        };
        self.current_conversation = tab.conversation_id.clone();
        self.active = Some(id.to_string());
        true
    }

    /// Activate the tab bound to `conversation_id`, creating one only if no
    /// tab holds that conversation. Returns `(tab_id, created)`.
    pub fn activate_conversation(&mut self, conversation_id: &str, title: &str) -> (String, bool) {
        if let Some(tab) = self.find_by_conversation(conversation_id) {
            let id = tab.id.clone();
            self.set_active(&id);
            return (id, false);
        }
        let id = self.create_tab(Some(conversation_id.to_string()), Some(title));
        (id, true)
    }

    /// Bind a lazily created backend conversation to an existing tab.
    pub fn bind_conversation(&mut self, tab_id: &str, conversation_id: String) {
        let active = self.active.as_deref() == Some(tab_id);
        if let Some(tab) = self.tabs.iter_mut().find(|tab| tab.id == tab_id) {
            tab.conversation_id = Some(conversation_id.clone());
            if active {
                self.current_conversation = Some(conversation_id);
            }
        }
    }

    pub fn set_title(&mut self, tab_id: &str, title: &str) {
        if let Some(tab) = self.tabs.iter_mut().find(|tab| tab.id == tab_id) {
            tab.title = title.to_string();
        }
    }

    /// Detach a tab from its deleted conversation and show it as a fresh
    /// "New Chat" surface again.
    pub fn reset_tab(&mut self, tab_id: &str) {
        let active = self.active.as_deref() == Some(tab_id);
        if let Some(tab) = self.tabs.iter_mut().find(|tab| tab.id == tab_id) {
            tab.conversation_id = None;
            tab.title = crate::types::DEFAULT_TAB_TITLE.to_string();
            if active {
                self.current_conversation = None;
            }
        }
        self.update_state(tab_id, TabState::reset_to_welcome);
    }

    pub fn clear_current_conversation_if(&mut self, conversation_id: &str) {
        if self.current_conversation.as_deref() == Some(conversation_id) {
            self.current_conversation = None;
        }
    }

    pub(crate) fn restore_pointers(
        &mut self,
        active: Option<String>,
        conversation: Option<String>,
    ) {
        if let Some(id) = active
            && self.tab(&id).is_some()
        {
            self.active = Some(id);
        }
        if let Some(conversation) = conversation
            && self.find_by_conversation(&conversation).is_some()
        {
            self.current_conversation = Some(conversation);
        }
    }
}

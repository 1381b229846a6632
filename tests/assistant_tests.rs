//! Integration tests for the conversational core: tab lifecycle, the send
//! workflow, edit-and-resend, cancellation, and session persistence.

use async_trait::async_trait;
use goldfinch::api::{ApiError, ApiResult, CancelToken, ChatApi, ConversationSummary, SendReply};
use goldfinch::model::RawMessage;
use goldfinch::session::{Activation, Assistant};
use goldfinch::storage::MemoryStore;
use goldfinch::types::{Attachment, EMPTY_EDIT_ERROR, Role, STOPPED_MESSAGE, WELCOME_MESSAGE};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Scriptable in-memory backend. Failure flags flip individual operations
/// into error paths; `hang_sends` parks a send until its token fires.
#[derive(Default)]
struct MockApi {
    conversations: AtomicU64,
    sends: AtomicU64,
    hang_sends: AtomicBool,
    fail_create: AtomicBool,
    fail_send: AtomicBool,
    fail_fetch: AtomicBool,
    fail_rename: AtomicBool,
    fail_delete_conversation: AtomicBool,
    fail_delete_message: Mutex<Option<String>>,
    history: Mutex<HashMap<String, Vec<RawMessage>>>,
    listed: Mutex<Vec<ConversationSummary>>,
    deleted_messages: Mutex<Vec<String>>,
    deleted_conversations: Mutex<Vec<String>>,
    renames: Mutex<Vec<(String, String)>>,
}

fn raw(message_id: &str, role: &str, content: &str) -> RawMessage {
    RawMessage {
        message_id: Some(message_id.to_string()),
        role: Some(role.to_string()),
        content: Some(content.to_string()),
        ..Default::default()
    }
}

impl MockApi {
    fn with_history(self, conversation_id: &str, messages: Vec<RawMessage>) -> Self {
        self.history
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
        self
    }

    fn send_count(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn list_conversations(&self, _limit: usize) -> ApiResult<Vec<ConversationSummary>> {
        Ok(self.listed.lock().unwrap().clone())
    }

    async fn create_conversation(&self) -> ApiResult<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                body: "create failed".into(),
            });
        }
        let n = self.conversations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("conv-{n}"))
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> ApiResult<()> {
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("rename failed".into()));
        }
        self.renames
            .lock()
            .unwrap()
            .push((id.to_string(), title.to_string()));
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> ApiResult<()> {
        if self.fail_delete_conversation.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                body: "delete failed".into(),
            });
        }
        self.deleted_conversations.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn fetch_messages(&self, id: &str) -> ApiResult<Vec<RawMessage>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("history unavailable".into()));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        _attachments: &[Attachment],
        cancel: &CancelToken,
    ) -> ApiResult<SendReply> {
        if self.hang_sends.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(ApiError::Cancelled);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection reset".into()));
        }
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReply {
            user: raw(&format!("srv-user-{id}-{n}"), "user", text),
            assistant: raw(
                &format!("srv-assistant-{id}-{n}"),
                "assistant",
                &format!("echo: {text}"),
            ),
        })
    }

    async fn delete_message(&self, _conversation_id: &str, server_id: &str) -> ApiResult<()> {
        if self.fail_delete_message.lock().unwrap().as_deref() == Some(server_id) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("cannot delete {server_id}"),
            });
        }
        self.deleted_messages.lock().unwrap().push(server_id.to_string());
        Ok(())
    }
}

fn assistant_with(api: MockApi) -> (Arc<Assistant>, Arc<MockApi>, Arc<MemoryStore>) {
    let api = Arc::new(api);
    let storage = Arc::new(MemoryStore::new());
    let assistant = Arc::new(Assistant::new(api.clone(), storage.clone()));
    (assistant, api, storage)
}

async fn hydrated(api: MockApi) -> (Arc<Assistant>, Arc<MockApi>, String) {
    let (assistant, api, _) = assistant_with(api);
    assistant.hydrate().await;
    let tab_id = assistant.active_tab().expect("default tab").id;
    (assistant, api, tab_id)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn seeded_history() -> Vec<RawMessage> {
    vec![
        raw("m1", "user", "What did I spend on dining?"),
        raw("m2", "assistant", "You spent $240 on dining."),
        raw("m3", "user", "And on groceries?"),
        raw("m4", "assistant", "You spent $310 on groceries."),
    ]
}

mod send_tests {
    use super::*;

    #[tokio::test]
    async fn empty_send_is_a_noop() {
        let (assistant, api, tab_id) = hydrated(MockApi::default()).await;

        assistant.send(&tab_id, None).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, WELCOME_MESSAGE);
        assert_eq!(api.send_count(), 0);
        assert_eq!(api.conversations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_send_replaces_provisional_with_canonical_pair() {
        let (assistant, api, tab_id) = hydrated(MockApi::default()).await;
        assistant.set_draft(&tab_id, "How is my dining budget?");

        assistant.send(&tab_id, None).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        // welcome + acknowledged user turn + assistant reply
        assert_eq!(state.messages.len(), 3);
        let user = &state.messages[1];
        let reply = &state.messages[2];
        assert_eq!(user.role, Role::User);
        assert!(user.server_id.is_some(), "provisional must be replaced");
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "echo: How is my dining budget?");
        assert!(!state.is_typing);
        assert!(state.pending.is_none());
        assert!(state.error.is_none());
        assert!(state.draft.is_empty());

        // the lazily created conversation is bound to the tab
        let tab = assistant.active_tab().unwrap();
        assert_eq!(tab.conversation_id.as_deref(), Some("conv-1"));

        // first send derives the title and persists it to the backend
        assert_eq!(tab.title, "How is my dining budget?");
        let renames = api.renames.lock().unwrap().clone();
        assert_eq!(
            renames,
            vec![("conv-1".to_string(), "How is my dining budget?".to_string())]
        );
    }

    #[tokio::test]
    async fn attachments_only_send_uses_placeholder_text() {
        let (assistant, _api, tab_id) = hydrated(MockApi::default()).await;
        assistant.attach_file(
            &tab_id,
            Attachment {
                name: "statement.pdf".into(),
                size: 1024,
                reference: "blob-1".into(),
            },
        );

        assistant.send(&tab_id, None).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        let user = &state.messages[1];
        assert_eq!(user.content, goldfinch::types::ATTACHMENTS_ONLY_PROMPT);
        assert!(state.uploaded_files.is_empty(), "queued files clear on success");
    }

    #[tokio::test]
    async fn failed_conversation_create_aborts_without_optimistic_echo() {
        let api = MockApi::default();
        api.fail_create.store(true, Ordering::SeqCst);
        let (assistant, api, tab_id) = hydrated(api).await;
        assistant.set_draft(&tab_id, "hello");

        assistant.send(&tab_id, None).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 1, "no provisional message on this path");
        assert!(state.error.is_some());
        assert_eq!(api.send_count(), 0);
    }

    #[tokio::test]
    async fn failed_send_removes_provisional_and_surfaces_error() {
        let api = MockApi::default();
        api.fail_send.store(true, Ordering::SeqCst);
        let (assistant, _api, tab_id) = hydrated(api).await;
        assistant.set_draft(&tab_id, "hello");

        assistant.send(&tab_id, None).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 1);
        assert!(state.error.as_deref().unwrap().contains("connection reset"));
        assert!(!state.is_typing);
        assert!(state.pending.is_none());
    }

    #[tokio::test]
    async fn cancelled_send_sets_stopped_error() {
        let api = MockApi::default();
        api.hang_sends.store(true, Ordering::SeqCst);
        let (assistant, _api, tab_id) = hydrated(api).await;
        assistant.set_draft(&tab_id, "slow question");

        let sender = assistant.clone();
        let send_tab = tab_id.clone();
        let task = tokio::spawn(async move { sender.send(&send_tab, None).await });

        let watcher = assistant.clone();
        let watch_tab = tab_id.clone();
        wait_until(move || {
            watcher
                .tab_state(&watch_tab)
                .is_some_and(|state| state.pending.is_some())
        })
        .await;

        assistant.stop(&tab_id);
        task.await.unwrap();

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.error.as_deref(), Some(STOPPED_MESSAGE));
        assert_eq!(state.messages.len(), 1, "provisional message removed");
        assert!(!state.is_typing);
        assert!(state.pending.is_none());
    }

    #[tokio::test]
    async fn second_send_while_pending_is_a_noop() {
        let api = MockApi::default();
        api.hang_sends.store(true, Ordering::SeqCst);
        let (assistant, api, tab_id) = hydrated(api).await;
        assistant.set_draft(&tab_id, "first");

        let sender = assistant.clone();
        let send_tab = tab_id.clone();
        let task = tokio::spawn(async move { sender.send(&send_tab, None).await });

        let watcher = assistant.clone();
        let watch_tab = tab_id.clone();
        wait_until(move || {
            watcher
                .tab_state(&watch_tab)
                .is_some_and(|state| state.pending.is_some())
        })
        .await;

        assistant.send(&tab_id, Some("second")).await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 2, "only one provisional message");
        assert_eq!(api.send_count(), 0);

        assistant.stop(&tab_id);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_pending_request_is_a_noop() {
        let (assistant, _api, tab_id) = hydrated(MockApi::default()).await;

        assistant.stop(&tab_id);
        assistant.stop(&tab_id);

        let state = assistant.tab_state(&tab_id).unwrap();
        assert!(state.error.is_none());
    }
}

mod edit_tests {
    use super::*;

    async fn open_seeded(api: MockApi) -> (Arc<Assistant>, Arc<MockApi>, String) {
        let api = api.with_history("conv-9", seeded_history());
        let (assistant, api, _) = assistant_with(api);
        assistant.hydrate().await;
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;
        (assistant, api, tab_id)
    }

    #[tokio::test]
    async fn edit_removes_tail_and_resends() {
        let (assistant, api, tab_id) = open_seeded(MockApi::default()).await;

        assistant
            .edit_message(&tab_id, "m3", "And on transport?")
            .await;

        // tail m3..m4 deleted server-side, oldest first
        let deleted = api.deleted_messages.lock().unwrap().clone();
        assert_eq!(deleted, vec!["m3".to_string(), "m4".to_string()]);

        // k-1 prior turns plus the new user+assistant pair
        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[0].server_id.as_deref(), Some("m1"));
        assert_eq!(state.messages[1].server_id.as_deref(), Some("m2"));
        assert_eq!(state.messages[2].content, "And on transport?");
        assert_eq!(state.messages[3].content, "echo: And on transport?");
    }

    #[tokio::test]
    async fn empty_edit_is_rejected_locally() {
        let (assistant, api, tab_id) = open_seeded(MockApi::default()).await;

        assistant.edit_message(&tab_id, "m3", "   ").await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.error.as_deref(), Some(EMPTY_EDIT_ERROR));
        assert_eq!(state.messages.len(), 4, "nothing truncated");
        assert!(api.deleted_messages.lock().unwrap().is_empty());
        assert_eq!(api.send_count(), 0);
    }

    #[tokio::test]
    async fn partial_delete_failure_aborts_without_truncation() {
        let api = MockApi::default();
        *api.fail_delete_message.lock().unwrap() = Some("m4".to_string());
        let (assistant, api, tab_id) = open_seeded(api).await;

        assistant.edit_message(&tab_id, "m3", "try again").await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 4, "no partial truncation committed");
        assert!(state.error.as_deref().unwrap().contains("m4"));
        assert_eq!(api.send_count(), 0, "resend never starts");
    }

    #[tokio::test]
    async fn edit_of_unknown_message_is_a_noop() {
        let (assistant, api, tab_id) = open_seeded(MockApi::default()).await;

        assistant.edit_message(&tab_id, "m99", "anything").await;

        assert_eq!(assistant.tab_state(&tab_id).unwrap().messages.len(), 4);
        assert!(api.deleted_messages.lock().unwrap().is_empty());
    }
}

mod tab_tests {
    use super::*;

    #[tokio::test]
    async fn open_conversation_reuses_bound_tab() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        let (assistant, _api, _) = assistant_with(api);
        assistant.hydrate().await;

        let first = assistant.open_conversation("conv-9", "Spending").await;
        assistant.create_tab();
        let second = assistant.open_conversation("conv-9", "Spending").await;

        assert_eq!(first, second);
        let bound = assistant
            .tabs_snapshot()
            .iter()
            .filter(|tab| tab.conversation_id.as_deref() == Some("conv-9"))
            .count();
        assert_eq!(bound, 1);
        assert_eq!(assistant.active_tab().unwrap().id, first);
    }

    #[tokio::test]
    async fn close_during_pending_send_drops_late_resolution() {
        let api = MockApi::default();
        api.hang_sends.store(true, Ordering::SeqCst);
        let (assistant, _api, tab_id) = hydrated(api).await;
        let keeper = assistant.create_tab();
        assistant.select_tab(&tab_id).await;
        assistant.set_draft(&tab_id, "doomed question");

        let sender = assistant.clone();
        let send_tab = tab_id.clone();
        let task = tokio::spawn(async move { sender.send(&send_tab, None).await });

        let watcher = assistant.clone();
        let watch_tab = tab_id.clone();
        wait_until(move || {
            watcher
                .tab_state(&watch_tab)
                .is_some_and(|state| state.pending.is_some())
        })
        .await;

        // closing cancels the pending request and removes the tab; the
        // send's late resolution must not resurrect any state
        assistant.close_tab(&tab_id).await;
        task.await.unwrap();

        assert!(assistant.tab_state(&tab_id).is_none());
        let keeper_state = assistant.tab_state(&keeper).unwrap();
        assert_eq!(keeper_state.messages.len(), 1);
        assert!(keeper_state.error.is_none());
        assert_eq!(assistant.active_tab().unwrap().id, keeper);
    }

    #[tokio::test]
    async fn concurrent_sends_on_different_tabs_are_isolated() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        let (assistant, _api, _) = assistant_with(api);
        assistant.hydrate().await;

        let bound = assistant.open_conversation("conv-9", "Spending").await;
        let fresh = assistant.create_tab();
        assistant.set_draft(&fresh, "brand new question");
        assistant.set_draft(&bound, "follow-up question");

        futures::join!(assistant.send(&fresh, None), assistant.send(&bound, None));

        let fresh_tab = assistant
            .tabs_snapshot()
            .iter()
            .find(|tab| tab.id == fresh)
            .cloned()
            .unwrap();
        assert_eq!(fresh_tab.conversation_id.as_deref(), Some("conv-1"));

        let fresh_state = assistant.tab_state(&fresh).unwrap();
        assert!(fresh_state
            .messages
            .iter()
            .any(|msg| msg.content == "echo: brand new question"));
        assert!(!fresh_state.messages.iter().any(|msg| msg.content.contains("follow-up")));

        let bound_state = assistant.tab_state(&bound).unwrap();
        assert!(bound_state
            .messages
            .iter()
            .any(|msg| msg.content == "echo: follow-up question"));
        assert!(!bound_state.messages.iter().any(|msg| msg.content.contains("brand new")));
    }

    #[tokio::test]
    async fn copy_message_returns_text_and_marks_the_message() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        let (assistant, _api, _) = assistant_with(api);
        assistant.hydrate().await;
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;

        let copied = assistant.copy_message(&tab_id, "m2");

        assert_eq!(copied.as_deref(), Some("You spent $240 on dining."));
        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.copied.as_deref(), Some("m2"));

        assert!(assistant.copy_message(&tab_id, "m99").is_none());
    }

    #[tokio::test]
    async fn failed_history_load_keeps_previous_messages() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        let (assistant, api, _) = assistant_with(api);
        assistant.hydrate().await;
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;
        assert_eq!(assistant.tab_state(&tab_id).unwrap().messages.len(), 4);

        api.fail_fetch.store(true, Ordering::SeqCst);
        assistant.load_history(&tab_id, "conv-9").await;

        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 4, "no silent data loss");
        assert!(state.error.is_some());
        assert!(!state.is_loading_messages);
    }
}

mod session_tests {
    use super::*;

    #[tokio::test]
    async fn session_round_trips_through_storage() {
        let api = Arc::new(MockApi::default().with_history("conv-9", seeded_history()));
        let storage = Arc::new(MemoryStore::new());

        let first = Assistant::new(api.clone(), storage.clone());
        first.hydrate().await;
        let unbound = first.active_tab().unwrap().id;
        let bound = first.open_conversation("conv-9", "Spending").await;
        let active = first.active_tab().unwrap().id;

        // simulated restart: fresh controller over the same storage
        let second = Assistant::new(api, storage);
        second.hydrate().await;

        assert_eq!(second.active_tab().unwrap().id, active);
        let ids: Vec<String> = second.tabs_snapshot().iter().map(|tab| tab.id.clone()).collect();
        assert_eq!(ids, vec![unbound, bound]);
        assert_eq!(second.current_conversation().as_deref(), Some("conv-9"));
    }

    #[tokio::test]
    async fn hydration_is_one_shot() {
        let (assistant, _api, _) = assistant_with(MockApi::default());
        assistant.hydrate().await;
        assistant.hydrate().await;

        assert_eq!(assistant.tabs_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn closing_last_tab_removes_persisted_keys() {
        let (assistant, _api, storage) = assistant_with(MockApi::default());
        assistant.hydrate().await;
        let tab_id = assistant.active_tab().unwrap().id;
        assert!(!storage.keys().is_empty());

        assistant.close_tab(&tab_id).await;

        assert!(
            storage.keys().is_empty(),
            "empty values remove their keys instead of leaving placeholders"
        );
    }

    #[tokio::test]
    async fn delete_resets_active_tab_and_closes_background_tab() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        let (assistant, api, _) = assistant_with(api);
        assistant.hydrate().await;

        // active tab bound to the conversation: reset in place
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;
        assistant.delete_conversation("conv-9").await.unwrap();

        let tab = assistant.active_tab().unwrap();
        assert_eq!(tab.id, tab_id, "active tab survives as a fresh surface");
        assert!(tab.conversation_id.is_none());
        let state = assistant.tab_state(&tab_id).unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, WELCOME_MESSAGE);
        assert_eq!(assistant.current_conversation(), None);
        assert_eq!(
            api.deleted_conversations.lock().unwrap().clone(),
            vec!["conv-9".to_string()]
        );

        // background tab bound to the conversation: closed outright
        let background = assistant.open_conversation("conv-9", "Spending").await;
        let front = assistant.create_tab();
        assistant.delete_conversation("conv-9").await.unwrap();

        assert!(assistant.tab_state(&background).is_none());
        assert_eq!(assistant.active_tab().unwrap().id, front);
    }

    #[tokio::test]
    async fn failed_delete_leaves_conversation_in_place() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        api.fail_delete_conversation.store(true, Ordering::SeqCst);
        let (assistant, _api, _) = assistant_with(api);
        assistant.hydrate().await;
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;

        let result = assistant.delete_conversation("conv-9").await;

        assert!(result.is_err());
        let tab = assistant.active_tab().unwrap();
        assert_eq!(tab.id, tab_id);
        assert_eq!(tab.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(assistant.tab_state(&tab_id).unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn rename_keeps_local_title_when_backend_rejects() {
        let api = MockApi::default().with_history("conv-9", seeded_history());
        api.fail_rename.store(true, Ordering::SeqCst);
        let (assistant, _api, _) = assistant_with(api);
        assistant.hydrate().await;
        let tab_id = assistant.open_conversation("conv-9", "Spending").await;

        assistant.rename_conversation(&tab_id, "Groceries deep dive").await;

        let tab = assistant.active_tab().unwrap();
        assert_eq!(tab.title, "Groceries deep dive");
    }

    #[tokio::test]
    async fn activation_prefills_or_sends() {
        let (assistant, api, _) = assistant_with(MockApi::default());

        assistant
            .activate(Activation {
                message: Some("What's my balance?".into()),
                auto_send: false,
            })
            .await;
        let tab_id = assistant.active_tab().unwrap().id;
        assert_eq!(
            assistant.tab_state(&tab_id).unwrap().draft,
            "What's my balance?"
        );
        assert_eq!(api.send_count(), 0);

        assistant
            .activate(Activation {
                message: Some("Send it now".into()),
                auto_send: true,
            })
            .await;
        assert_eq!(api.send_count(), 1);
        let state = assistant.tab_state(&tab_id).unwrap();
        assert!(state.messages.iter().any(|msg| msg.content == "echo: Send it now"));
    }
}

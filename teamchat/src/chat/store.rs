//! The session store: single owner of sessions, focus and message lifecycle.
//!
//! Every mutation is persisted while the state lock is held, so the order of
//! writes to storage matches the order of mutations. The lock is never held
//! across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{Backend, Sleeper, TokioSleeper};
use crate::channel::{InboundMessage, RealtimeChannel, Subscription};
use crate::config::StoreConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatSession, Message, MessageStatus};
use crate::storage::{MessageBackup, PersistentStore, SessionsCodec};

/// Shown while the backend health check is failing.
pub const OFFLINE_BANNER: &str =
    "Not connected to the backend service. Messages cannot be sent until the connection is restored.";

const EVENT_CAPACITY: usize = 256;

/// Change notifications for store consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionCreated(String),
    /// Messages, title, unread count or archive flag changed.
    SessionUpdated(String),
    SessionRemoved(String),
    CurrentChanged(Option<String>),
    ConnectionChanged(bool),
}

#[derive(Debug, Default)]
struct State {
    sessions: Vec<ChatSession>,
    current: Option<String>,
    /// Visible window per session, in messages from the tail.
    windows: HashMap<String, usize>,
}

impl State {
    fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn current_mut(&mut self) -> Option<&mut ChatSession> {
        let id = self.current.clone()?;
        self.session_mut(&id)
    }
}

/// Resets the single-flight flag when a load finishes or is cancelled.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionStore {
    state: Mutex<State>,
    backend: Arc<dyn Backend>,
    sessions: SessionsCodec,
    backups: MessageBackup,
    config: StoreConfig,
    sleeper: Arc<dyn Sleeper>,
    connected: AtomicBool,
    loading_more: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
}

impl SessionStore {
    /// Load persisted sessions from `durable`; per-message backups go to
    /// `ephemeral`.
    pub fn new(
        backend: Arc<dyn Backend>,
        durable: PersistentStore,
        ephemeral: PersistentStore,
        config: StoreConfig,
    ) -> Self {
        let codec = SessionsCodec::new(durable);
        let mut sessions = codec.load();
        for session in &mut sessions {
            session.enforce_cap(config.max_messages);
        }
        let current = codec
            .load_current()
            .filter(|id| sessions.iter().any(|s| s.id == *id && !s.archived));

        debug!(sessions = sessions.len(), current = ?current, "session store loaded");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State {
                sessions,
                current,
                windows: HashMap::new(),
            }),
            backend,
            sessions: codec,
            backups: MessageBackup::new(ephemeral),
            config,
            sleeper: Arc::new(TokioSleeper),
            connected: AtomicBool::new(false),
            loading_more: AtomicBool::new(false),
            events,
        }
    }

    /// Replace the sleeper used by `load_more_messages`.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Route every message from `channel` into this store.
    pub fn attach(self: &Arc<Self>, channel: &RealtimeChannel) -> Subscription {
        let store = Arc::clone(self);
        channel.on_message(move |message| {
            store.ingest(message);
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    fn persist_sessions(&self, state: &State) -> bool {
        let saved = self.sessions.save(&state.sessions);
        if !saved {
            warn!("session state kept in memory only");
        }
        saved
    }

    fn persist_current(&self, state: &State) {
        self.sessions.save_current(state.current.as_deref());
    }

    // Queries

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock().sessions.clone()
    }

    /// Sessions that are not archived, in creation order.
    pub fn active_sessions(&self) -> Vec<ChatSession> {
        self.lock()
            .sessions
            .iter()
            .filter(|s| !s.archived)
            .cloned()
            .collect()
    }

    pub fn archived_sessions(&self) -> Vec<ChatSession> {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.archived)
            .cloned()
            .collect()
    }

    pub fn session(&self, id: &str) -> Option<ChatSession> {
        self.lock().session(id).cloned()
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        let state = self.lock();
        state
            .current
            .as_deref()
            .and_then(|id| state.session(id))
            .cloned()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.lock().current.clone()
    }

    // Connection flag

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            info!(connected, "backend connectivity changed");
            self.emit(StoreEvent::ConnectionChanged(connected));
        }
    }

    /// Banner text to show while offline.
    pub fn connection_banner(&self) -> Option<&'static str> {
        (!self.is_connected()).then_some(OFFLINE_BANNER)
    }

    // Session operations

    /// Create an empty session and focus it.
    pub fn create_session(&self) -> ChatSession {
        let session = ChatSession::new();
        {
            let mut state = self.lock();
            state.sessions.push(session.clone());
            state.current = Some(session.id.clone());
            self.persist_sessions(&state);
            self.persist_current(&state);
        }
        debug!(session = %session.id, "session created");
        self.emit(StoreEvent::SessionCreated(session.id.clone()));
        self.emit(StoreEvent::CurrentChanged(Some(session.id.clone())));
        session
    }

    /// Focus `id` and clear its unread count.
    ///
    /// Unknown and archived sessions are ignored; returns whether focus moved.
    pub fn switch_session(&self, id: &str) -> bool {
        {
            let mut state = self.lock();
            let Some(session) = state.session_mut(id).filter(|s| !s.archived) else {
                debug!(session = id, "switch ignored");
                return false;
            };
            session.unread_count = 0;
            state.current = Some(id.to_string());
            self.persist_sessions(&state);
            self.persist_current(&state);
        }
        self.emit(StoreEvent::SessionUpdated(id.to_string()));
        self.emit(StoreEvent::CurrentChanged(Some(id.to_string())));
        true
    }

    /// Archive `id`, dropping focus if it was current.
    pub fn archive_session(&self, id: &str) -> bool {
        let lost_focus = {
            let mut state = self.lock();
            let Some(session) = state.session_mut(id) else {
                return false;
            };
            session.archived = true;
            let lost_focus = state.current.as_deref() == Some(id);
            if lost_focus {
                state.current = None;
                self.persist_current(&state);
            }
            self.persist_sessions(&state);
            lost_focus
        };
        self.emit(StoreEvent::SessionUpdated(id.to_string()));
        if lost_focus {
            self.emit(StoreEvent::CurrentChanged(None));
        }
        true
    }

    /// Remove `id`, dropping focus if it was current.
    pub fn delete_session(&self, id: &str) -> bool {
        let lost_focus = {
            let mut state = self.lock();
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != id);
            if state.sessions.len() == before {
                return false;
            }
            state.windows.remove(id);
            let lost_focus = state.current.as_deref() == Some(id);
            if lost_focus {
                state.current = None;
                self.persist_current(&state);
            }
            self.persist_sessions(&state);
            lost_focus
        };
        self.emit(StoreEvent::SessionRemoved(id.to_string()));
        if lost_focus {
            self.emit(StoreEvent::CurrentChanged(None));
        }
        true
    }

    // Message operations

    /// Append `content` to the current session and submit it to the backend.
    ///
    /// The message is visible as `sending` before the request starts. On
    /// failure it stays in the session as `failed` and can be retried.
    pub async fn send_message(
        &self,
        content: &str,
        reply_to: Option<String>,
    ) -> ChatResult<Message> {
        let (session_id, message) = {
            let mut state = self.lock();
            let session_id = state.current.clone().ok_or(ChatError::NoActiveSession)?;
            if !self.is_connected() {
                return Err(ChatError::NotConnected);
            }
            let message = Message::user(content, reply_to);
            let cap = self.config.max_messages;
            let session = state
                .session_mut(&session_id)
                .ok_or(ChatError::NoActiveSession)?;
            session.push_message(message.clone(), cap);
            self.persist_sessions(&state);
            (session_id, message)
        };
        self.emit(StoreEvent::SessionUpdated(session_id.clone()));

        self.submit(&session_id, message).await
    }

    /// Resubmit a failed message under its original id.
    pub async fn retry_message(&self, message_id: &str) -> ChatResult<Message> {
        let (session_id, message) = {
            let mut state = self.lock();
            let session_id = state.current.clone().ok_or(ChatError::NoActiveSession)?;
            let session = state
                .session_mut(&session_id)
                .ok_or(ChatError::NoActiveSession)?;
            let status = session
                .message(message_id)
                .map(|m| m.status)
                .ok_or_else(|| ChatError::MessageNotFound {
                    message_id: message_id.to_string(),
                })?;
            if status != MessageStatus::Failed {
                return Err(ChatError::NotRetryable {
                    message_id: message_id.to_string(),
                    status: status.to_string(),
                });
            }
            if !self.is_connected() {
                return Err(ChatError::NotConnected);
            }
            session.update_message(message_id, |m| m.status = MessageStatus::Sending);
            let message = session.message(message_id).cloned().ok_or_else(|| {
                ChatError::MessageNotFound {
                    message_id: message_id.to_string(),
                }
            })?;
            self.persist_sessions(&state);
            (session_id, message)
        };
        self.emit(StoreEvent::SessionUpdated(session_id.clone()));

        self.submit(&session_id, message).await
    }

    async fn submit(&self, session_id: &str, message: Message) -> ChatResult<Message> {
        let response = self.backend.analyze_request(&message.content).await;
        let status = if response.success {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };

        let updated = {
            let mut state = self.lock();
            let updated = state.session_mut(session_id).and_then(|session| {
                session.update_message(&message.id, |m| m.status = status);
                session.message(&message.id).cloned()
            });
            if updated.is_some() {
                self.persist_sessions(&state);
            } else {
                debug!(message = %message.id, "message gone before the request resolved");
            }
            updated
        };
        if updated.is_some() {
            self.emit(StoreEvent::SessionUpdated(session_id.to_string()));
        }

        if response.success {
            debug!(message = %message.id, "message sent");
            Ok(updated.unwrap_or(Message { status, ..message }))
        } else {
            warn!(message = %message.id, reason = response.reason(), "message failed");
            Err(ChatError::Request {
                message_id: message.id,
                reason: response.reason().to_string(),
            })
        }
    }

    /// Replace a message's content in the current session.
    ///
    /// Returns `false` without error when nothing is focused or the message
    /// does not exist.
    pub fn edit_message(&self, message_id: &str, content: &str) -> bool {
        self.mutate_current_message(message_id, |m| m.edit(content))
    }

    /// Tombstone a message in the current session. Its content is kept.
    pub fn delete_message(&self, message_id: &str) -> bool {
        self.mutate_current_message(message_id, |m| m.deleted = true)
    }

    fn mutate_current_message<F>(&self, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let session_id = {
            let mut state = self.lock();
            let Some(session) = state.current_mut() else {
                return false;
            };
            if !session.update_message(message_id, f) {
                return false;
            }
            let id = session.id.clone();
            self.persist_sessions(&state);
            id
        };
        self.emit(StoreEvent::SessionUpdated(session_id));
        true
    }

    /// Merge an inbound agent message.
    ///
    /// Goes to the session it names when that session is active, otherwise
    /// to the current session, otherwise to a new session that becomes
    /// current. Returns the session id and the stored message.
    pub fn ingest(&self, inbound: &InboundMessage) -> (String, Message) {
        let message = Message::assistant(inbound.message.as_str(), inbound.agent_name.as_str());
        if !self.backups.save(&message) {
            warn!(message = %message.id, "message backup failed");
        }

        let cap = self.config.max_messages;
        let (session_id, created) = {
            let mut state = self.lock();
            let addressed = inbound
                .session_id
                .as_deref()
                .filter(|id| state.session(id).is_some_and(|s| !s.archived))
                .map(String::from);

            let (session_id, created) = match addressed.or_else(|| state.current.clone()) {
                Some(id) => (id, false),
                None => {
                    let mut session = ChatSession::new();
                    session.unread_count = 1;
                    let id = session.id.clone();
                    state.sessions.push(session);
                    state.current = Some(id.clone());
                    self.persist_current(&state);
                    (id, true)
                }
            };

            let is_current = state.current.as_deref() == Some(session_id.as_str());
            if let Some(session) = state.session_mut(&session_id) {
                if !is_current {
                    session.unread_count += 1;
                }
                session.push_message(message.clone(), cap);
            }
            if self.persist_sessions(&state) {
                self.backups.discard(&message.id);
            }
            (session_id, created)
        };

        debug!(session = %session_id, agent = %inbound.agent_name, "agent message ingested");
        if created {
            self.emit(StoreEvent::SessionCreated(session_id.clone()));
            self.emit(StoreEvent::CurrentChanged(Some(session_id.clone())));
        } else {
            self.emit(StoreEvent::SessionUpdated(session_id.clone()));
        }
        (session_id, message)
    }

    /// Read back the backup written when `message_id` was ingested.
    pub fn restore_backup(&self, message_id: &str) -> Option<Message> {
        self.backups.restore(message_id).map(|mut message| {
            message.refresh_code_blocks();
            message
        })
    }

    // Paging

    pub fn is_loading_more(&self) -> bool {
        self.loading_more.load(Ordering::Acquire)
    }

    /// Widen the visible window of `session_id` by one page.
    ///
    /// Only one load runs at a time; a call made while another is in flight
    /// returns `false` immediately. Returns whether more messages became
    /// visible.
    pub async fn load_more_messages(&self, session_id: &str) -> bool {
        if self
            .loading_more
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session = session_id, "load more already in flight");
            return false;
        }
        let _guard = LoadingGuard(&self.loading_more);

        self.sleeper.sleep(self.config.load_more_delay).await;

        let page = self.config.page_size;
        let mut state = self.lock();
        let Some(total) = state.session(session_id).map(|s| s.messages.len()) else {
            return false;
        };
        let window = state.windows.entry(session_id.to_string()).or_insert(page);
        if *window >= total {
            return false;
        }
        *window = (*window + page).min(total);
        true
    }

    /// The currently visible tail of a session's messages, oldest first.
    pub fn visible_messages(&self, session_id: &str) -> Option<Vec<Message>> {
        let state = self.lock();
        let session = state.session(session_id)?;
        let window = state
            .windows
            .get(session_id)
            .copied()
            .unwrap_or(self.config.page_size);
        let start = session.messages.len().saturating_sub(window);
        Some(session.messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AnalyzeResponse, FailureKind, RecordingSleeper};
    use crate::storage::{BrokenStore, FileStore, MemoryStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<AnalyzeResponse>>,
        requests: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedBackend {
        fn replying(replies: impl IntoIterator<Item = AnalyzeResponse>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn analyze_request(&self, content: &str) -> AnalyzeResponse {
            self.requests.lock().unwrap().push(content.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies.lock().unwrap().pop_front().unwrap_or_else(ok)
        }

        async fn check_health(&self) -> bool {
            true
        }
    }

    fn ok() -> AnalyzeResponse {
        AnalyzeResponse {
            success: true,
            message: Some("accepted".to_string()),
            data: None,
            failure: None,
        }
    }

    fn unreachable() -> AnalyzeResponse {
        AnalyzeResponse {
            success: false,
            message: Some("Service unreachable".to_string()),
            data: None,
            failure: Some(FailureKind::Unreachable),
        }
    }

    fn store_with(backend: Arc<ScriptedBackend>, config: StoreConfig) -> SessionStore {
        SessionStore::new(
            backend,
            PersistentStore::memory(),
            PersistentStore::memory(),
            config,
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    fn store() -> (SessionStore, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::default());
        (store_with(backend.clone(), StoreConfig::default()), backend)
    }

    fn inbound(agent: &str, text: &str, session_id: Option<&str>) -> InboundMessage {
        InboundMessage {
            agent_name: agent.to_string(),
            message: text.to_string(),
            kind: "message".to_string(),
            timestamp: Utc::now(),
            session_id: session_id.map(String::from),
        }
    }

    #[test]
    fn create_session_focuses_it() {
        let (store, _) = store();
        let session = store.create_session();

        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.current_session_id(), Some(session.id));
        assert_eq!(store.current_session().unwrap().unread_count, 0);
    }

    #[test]
    fn switch_resets_unread_and_ignores_unknown() {
        let (store, _) = store();
        let first = store.create_session();
        let second = store.create_session();
        store.ingest(&inbound("bob", "ping", Some(&first.id)));
        assert_eq!(store.session(&first.id).unwrap().unread_count, 1);

        assert!(!store.switch_session("missing"));
        assert_eq!(store.current_session_id(), Some(second.id));

        assert!(store.switch_session(&first.id));
        assert_eq!(store.current_session_id(), Some(first.id.clone()));
        assert_eq!(store.session(&first.id).unwrap().unread_count, 0);
    }

    #[test]
    fn archiving_current_clears_focus() {
        let (store, _) = store();
        let session = store.create_session();

        assert!(store.archive_session(&session.id));
        assert_eq!(store.current_session_id(), None);
        assert!(store.active_sessions().is_empty());
        assert_eq!(store.archived_sessions()[0].id, session.id);

        assert!(!store.switch_session(&session.id));
        assert_eq!(store.current_session_id(), None);
    }

    #[test]
    fn delete_removes_and_clears_focus() {
        let (store, _) = store();
        let keep = store.create_session();
        let doomed = store.create_session();

        assert!(store.delete_session(&doomed.id));
        assert!(!store.delete_session(&doomed.id));
        assert_eq!(store.current_session_id(), None);
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.sessions()[0].id, keep.id);
    }

    #[tokio::test]
    async fn send_without_session_or_connection_fails_distinctly() {
        let (store, backend) = store();
        store.set_connected(true);
        assert!(matches!(
            store.send_message("hi", None).await,
            Err(ChatError::NoActiveSession)
        ));

        store.create_session();
        store.set_connected(false);
        assert!(matches!(
            store.send_message("hi", None).await,
            Err(ChatError::NotConnected)
        ));
        assert!(store.current_session().unwrap().messages.is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn send_is_optimistic_then_sent() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            gate: Some(gate.clone()),
            ..ScriptedBackend::default()
        });
        let store = Arc::new(store_with(backend.clone(), StoreConfig::default()));
        store.set_connected(true);
        let session = store.create_session();
        store.ingest(&inbound("emma", "earlier", None));

        let sending = {
            let store = store.clone();
            tokio::spawn(async move { store.send_message("build it", None).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.requests().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let messages = store.session(&session.id).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Sending);
        assert_eq!(messages[1].content, "build it");

        gate.notify_one();
        let sent = sending.await.unwrap().unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        let messages = store.session(&session.id).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn failed_send_keeps_message_and_retry_reuses_id() {
        let backend = Arc::new(ScriptedBackend::replying([unreachable(), ok()]));
        let store = store_with(backend.clone(), StoreConfig::default());
        store.set_connected(true);
        store.create_session();

        let err = store
            .send_message("deploy", Some("m-0".to_string()))
            .await
            .unwrap_err();
        let ChatError::Request { message_id, reason } = err else {
            panic!("expected a request error");
        };
        assert_eq!(reason, "Service unreachable");

        let session = store.current_session().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].status, MessageStatus::Failed);
        assert_eq!(session.messages[0].reply_to.as_deref(), Some("m-0"));

        let retried = store.retry_message(&message_id).await.unwrap();
        assert_eq!(retried.id, message_id);
        assert_eq!(retried.status, MessageStatus::Sent);
        assert_eq!(backend.requests(), ["deploy", "deploy"]);

        let session = store.current_session().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert!(matches!(
            store.retry_message(&message_id).await,
            Err(ChatError::NotRetryable { .. })
        ));
        assert!(matches!(
            store.retry_message("nope").await,
            Err(ChatError::MessageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cap_keeps_newest_across_operations() {
        let config = StoreConfig {
            max_messages: 3,
            ..StoreConfig::default()
        };
        let store = store_with(Arc::new(ScriptedBackend::default()), config);
        store.set_connected(true);
        store.create_session();

        for i in 0..3 {
            store.ingest(&inbound("bob", &format!("agent {i}"), None));
        }
        store.send_message("user 3", None).await.unwrap();
        store.ingest(&inbound("bob", "agent 4", None));

        let contents: Vec<_> = store
            .current_session()
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["agent 2", "user 3", "agent 4"]);
    }

    #[test]
    fn edit_and_tombstone_in_place() {
        let (store, _) = store();
        store.create_session();
        let (_, first) = store.ingest(&inbound("alex", "first", None));
        let (_, second) = store.ingest(&inbound("alex", "second", None));

        assert!(store.edit_message(&first.id, "```rust\nfn a() {}\n```"));
        assert!(store.delete_message(&second.id));
        assert!(!store.delete_message("missing"));

        let messages = store.current_session().unwrap().messages;
        assert!(messages[0].edited);
        assert_eq!(messages[0].code_blocks.as_ref().unwrap()[0].language, "rust");
        assert_eq!(messages[1].id, second.id);
        assert!(messages[1].deleted);
        assert_eq!(messages[1].content, "second");
        assert_eq!(messages[1].display_content(), crate::models::DELETED_PLACEHOLDER);
    }

    #[test]
    fn edits_without_focus_are_ignored() {
        let (store, _) = store();
        let session = store.create_session();
        let (_, message) = store.ingest(&inbound("alex", "text", None));
        store.archive_session(&session.id);

        assert!(!store.edit_message(&message.id, "changed"));
        assert!(!store.delete_message(&message.id));
        assert_eq!(store.session(&session.id).unwrap().messages[0].content, "text");
    }

    #[test]
    fn ingest_without_focus_creates_session() {
        let (store, _) = store();
        let (session_id, message) = store.ingest(&inbound("bob", "done", None));

        let session = store.current_session().unwrap();
        assert_eq!(session.id, session_id);
        assert_eq!(session.unread_count, 1);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, crate::models::MessageRole::Assistant);
        assert_eq!(session.messages[0].agent_name.as_deref(), Some("bob"));
        assert_eq!(session.messages[0].status, MessageStatus::Sent);

        assert!(store.restore_backup(&message.id).is_none());
    }

    #[test]
    fn ingest_keeps_backup_only_when_sessions_cannot_be_saved() {
        let store = SessionStore::new(
            Arc::new(ScriptedBackend::default()),
            PersistentStore::new(Arc::new(BrokenStore)),
            PersistentStore::memory(),
            StoreConfig::default(),
        );
        let (_, message) = store.ingest(&inbound("bob", "```py\nprint(1)\n```", None));

        let backup = store.restore_backup(&message.id).unwrap();
        assert_eq!(backup.content, message.content);
        assert_eq!(backup.code_blocks.unwrap()[0].language, "py");
    }

    #[test]
    fn ingest_stamps_receipt_time_not_backend_time() {
        let (store, _) = store();
        let mut stale = inbound("bob", "late", None);
        // Naive local time from a backend eight hours ahead, read as UTC.
        stale.timestamp = Utc::now() + chrono::Duration::hours(8);

        let before = Utc::now();
        let (_, message) = store.ingest(&stale);
        let after = Utc::now();

        assert!(message.timestamp >= before && message.timestamp <= after);
        let stored = &store.current_session().unwrap().messages[0];
        assert_eq!(stored.timestamp, message.timestamp);
    }

    #[test]
    fn ingest_into_archived_session_falls_back_to_current() {
        let (store, _) = store();
        let old = store.create_session();
        store.archive_session(&old.id);
        let current = store.create_session();

        let (target, _) = store.ingest(&inbound("mike", "status", Some(&old.id)));
        assert_eq!(target, current.id);
        assert!(store.session(&old.id).unwrap().messages.is_empty());
    }

    #[test]
    fn reload_restores_sessions_and_focus() {
        let dir = tempfile::tempdir().unwrap();
        let durable = || PersistentStore::new(Arc::new(FileStore::open_at(dir.path()).unwrap()));

        let original = {
            let store = SessionStore::new(
                Arc::new(ScriptedBackend::default()),
                durable(),
                PersistentStore::memory(),
                StoreConfig::default(),
            );
            let session = store.create_session();
            store.ingest(&inbound("david", "```sql\nselect 1\n```", None));
            let other = store.create_session();
            store.ingest(&inbound("emma", "ping", Some(&session.id)));
            store.archive_session(&other.id);
            store.switch_session(&session.id);
            store.sessions()
        };

        let reloaded = SessionStore::new(
            Arc::new(ScriptedBackend::default()),
            durable(),
            PersistentStore::memory(),
            StoreConfig::default(),
        );
        assert_eq!(reloaded.sessions(), original);
        assert_eq!(reloaded.current_session_id(), Some(original[0].id.clone()));
    }

    #[test]
    fn storage_failures_do_not_block_mutations() {
        let store = SessionStore::new(
            Arc::new(ScriptedBackend::default()),
            PersistentStore::new(Arc::new(BrokenStore)),
            PersistentStore::new(Arc::new(BrokenStore)),
            StoreConfig::default(),
        );
        let session = store.create_session();
        store.ingest(&inbound("bob", "still here", None));
        assert_eq!(store.session(&session.id).unwrap().messages.len(), 1);
    }

    #[test]
    fn events_follow_mutations() {
        let (store, _) = store();
        let mut events = store.subscribe();
        let session = store.create_session();
        store.set_connected(true);
        store.delete_session(&session.id);

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            [
                StoreEvent::SessionCreated(session.id.clone()),
                StoreEvent::CurrentChanged(Some(session.id.clone())),
                StoreEvent::ConnectionChanged(true),
                StoreEvent::SessionRemoved(session.id.clone()),
                StoreEvent::CurrentChanged(None),
            ]
        );
        assert!(store.connection_banner().is_none());
    }

    #[tokio::test]
    async fn load_more_widens_window_until_exhausted() {
        let config = StoreConfig {
            page_size: 2,
            ..StoreConfig::default()
        };
        let sleeper = RecordingSleeper::default();
        let store = store_with(Arc::new(ScriptedBackend::default()), config)
            .with_sleeper(Arc::new(sleeper.clone()));
        let session = store.create_session();
        for i in 0..5 {
            store.ingest(&inbound("bob", &format!("m{i}"), None));
        }

        let visible = |store: &SessionStore| -> Vec<String> {
            store
                .visible_messages(&session.id)
                .unwrap()
                .into_iter()
                .map(|m| m.content)
                .collect()
        };
        assert_eq!(visible(&store), ["m3", "m4"]);

        assert!(store.load_more_messages(&session.id).await);
        assert_eq!(visible(&store), ["m1", "m2", "m3", "m4"]);
        assert!(store.load_more_messages(&session.id).await);
        assert!(!store.load_more_messages(&session.id).await);
        assert_eq!(visible(&store).len(), 5);
        assert!(!store.load_more_messages("missing").await);

        assert_eq!(sleeper.recorded().len(), 4);
        assert!(!store.is_loading_more());
    }

    #[tokio::test]
    async fn load_more_is_single_flight() {
        struct GatedSleeper(Arc<Notify>);

        #[async_trait]
        impl Sleeper for GatedSleeper {
            async fn sleep(&self, _: Duration) {
                self.0.notified().await;
            }
        }

        let gate = Arc::new(Notify::new());
        let config = StoreConfig {
            page_size: 1,
            ..StoreConfig::default()
        };
        let store = Arc::new(
            SessionStore::new(
                Arc::new(ScriptedBackend::default()),
                PersistentStore::memory(),
                PersistentStore::new(Arc::new(MemoryStore::new())),
                config,
            )
            .with_sleeper(Arc::new(GatedSleeper(gate.clone()))),
        );
        let session = store.create_session();
        store.ingest(&inbound("bob", "a", None));
        store.ingest(&inbound("bob", "b", None));

        let first = {
            let store = store.clone();
            let id = session.id.clone();
            tokio::spawn(async move { store.load_more_messages(&id).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.is_loading_more() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!store.load_more_messages(&session.id).await);

        gate.notify_one();
        assert!(first.await.unwrap());
        assert!(!store.is_loading_more());
    }
}

//! crates/notification_core/src/test_support.rs
//!
//! In-memory fakes of the ports, shared by the unit tests of this crate.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ChatMessageDocument, EmailDocument, GeneratedContent, NotificationState, PromptKind,
    PushPermission, ThreadKey, User, UserContext, UserProfile,
};
use crate::ports::{
    ContentGenerationService, NotificationStore, PortError, PortResult, UnsubscribeSource,
    WriteBatch, WriteOp,
};

pub(crate) fn email_user(now: DateTime<Utc>) -> User {
    User {
        id: Uuid::new_v4(),
        email: Some(format!("{}@example.com", Uuid::new_v4().simple())),
        created_at: now - Duration::days(60),
        last_activity_at: Some(now - Duration::days(1)),
        push_permission: PushPermission::Denied,
        push_token: None,
        email_unsubscribed: false,
        notification_state: NotificationState::default(),
    }
}

pub(crate) fn push_user(now: DateTime<Utc>) -> User {
    User {
        push_permission: PushPermission::Granted,
        push_token: Some(format!("token-{}", Uuid::new_v4().simple())),
        email_unsubscribed: true,
        ..email_user(now)
    }
}

//=========================================================================================
// Store
//=========================================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct ThreadDoc {
    pub message_count: u32,
    pub unread_count: u32,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub users: HashMap<Uuid, User>,
    pub threads: HashMap<ThreadKey, ThreadDoc>,
    pub emails: Vec<EmailDocument>,
    pub messages: Vec<ChatMessageDocument>,
    pub committed_batch_sizes: Vec<usize>,
}

impl StoreState {
    fn apply(&mut self, op: WriteOp) -> PortResult<()> {
        match op {
            WriteOp::CreateEmail(doc) => self.emails.push(doc),
            WriteOp::CreateThread { thread, .. } => {
                self.threads.insert(thread, ThreadDoc::default());
            }
            WriteOp::CreateMessage(msg) => self.messages.push(msg),
            WriteOp::TouchThread { thread, at } => {
                let doc = self
                    .threads
                    .get_mut(&thread)
                    .ok_or_else(|| PortError::NotFound(format!("thread {}", thread.thread_id)))?;
                doc.message_count += 1;
                doc.unread_count += 1;
                doc.last_message_at = Some(at);
            }
            WriteOp::RecordNotificationSent { user_id, sent_at } => {
                let user = self
                    .users
                    .get_mut(&user_id)
                    .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
                user.notification_state.count += 1;
                user.notification_state.last_sent_at = Some(sent_at);
            }
            WriteOp::MarkEmailUnsubscribed { user_id } => {
                let user = self
                    .users
                    .get_mut(&user_id)
                    .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
                user.email_unsubscribed = true;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    pub state: Mutex<StoreState>,
    failing_users: Mutex<HashSet<Uuid>>,
    fail_counter_updates: AtomicBool,
    fail_list_users: AtomicBool,
    fail_unread_counts: AtomicBool,
    fail_thread_scan: AtomicBool,
    pub commit_attempts: AtomicUsize,
}

impl FakeStore {
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for user in users {
                state.users.insert(user.id, user);
            }
        }
        store
    }

    /// Content batches touching this user fail to commit.
    pub fn fail_content_for(&self, user_id: Uuid) {
        self.failing_users.lock().unwrap().insert(user_id);
    }

    pub fn fail_counter_updates(&self) {
        self.fail_counter_updates.store(true, Ordering::SeqCst);
    }

    pub fn fail_list_users(&self) {
        self.fail_list_users.store(true, Ordering::SeqCst);
    }

    pub fn fail_unread_counts(&self) {
        self.fail_unread_counts.store(true, Ordering::SeqCst);
    }

    pub fn fail_thread_scan(&self) {
        self.fail_thread_scan.store(true, Ordering::SeqCst);
    }

    pub fn set_unread(&self, user_id: Uuid, unread: u32) {
        let mut state = self.state.lock().unwrap();
        let key = ThreadKey {
            user_id,
            thread_id: crate::domain::MAIN_THREAD_ID.to_string(),
        };
        state.threads.insert(
            key,
            ThreadDoc {
                message_count: unread,
                unread_count: unread,
                last_message_at: None,
            },
        );
    }

    pub fn user(&self, user_id: Uuid) -> User {
        self.state.lock().unwrap().users[&user_id].clone()
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationStore for FakeStore {
    async fn list_users(&self) -> PortResult<Vec<User>> {
        if self.fail_list_users.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("users collection unavailable".to_string()));
        }
        let mut users: Vec<User> = self.state.lock().unwrap().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn find_users_by_email(&self, email: &str) -> PortResult<Vec<User>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn unread_count(&self, thread: &ThreadKey) -> PortResult<u32> {
        if self.fail_unread_counts.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("threads unavailable".to_string()));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .threads
            .get(thread)
            .map(|t| t.unread_count)
            .unwrap_or(0))
    }

    async fn existing_threads(&self, threads: &[ThreadKey]) -> PortResult<HashSet<ThreadKey>> {
        if self.fail_thread_scan.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("thread lookup timed out".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(threads
            .iter()
            .filter(|k| state.threads.contains_key(*k))
            .cloned()
            .collect())
    }

    async fn fetch_user_context(&self, user_id: Uuid) -> PortResult<UserContext> {
        let state = self.state.lock().unwrap();
        let user = state
            .users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
        Ok(UserContext {
            profile: Some(UserProfile {
                name: user.email.clone(),
                ..UserProfile::default()
            }),
            ..UserContext::default()
        })
    }

    async fn commit(&self, batch: WriteBatch) -> PortResult<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_users.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();

        let is_counter_batch = batch
            .ops()
            .iter()
            .any(|op| matches!(op, WriteOp::RecordNotificationSent { .. }));
        if is_counter_batch && self.fail_counter_updates.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("injected counter failure".to_string()));
        }
        if !is_counter_batch && batch.ops().iter().any(|op| failing.contains(&op.user_id())) {
            return Err(PortError::Unexpected("injected write failure".to_string()));
        }

        let size = batch.len();
        let mut next = state.clone();
        for op in batch.into_ops() {
            next.apply(op)?;
        }
        next.committed_batch_sizes.push(size);
        *state = next;
        Ok(())
    }
}

//=========================================================================================
// Generation collaborator
//=========================================================================================

#[derive(Debug, Clone)]
pub(crate) enum Script {
    Fail(String),
    Panic,
    Reply(GeneratedContent),
}

#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    scripts: Mutex<HashMap<Uuid, Script>>,
    pub calls: Mutex<Vec<(Uuid, PromptKind, String)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn script(&self, user_id: Uuid, script: Script) {
        self.scripts.lock().unwrap().insert(user_id, script);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn default_reply(user_id: Uuid, kind: PromptKind) -> GeneratedContent {
        match kind {
            PromptKind::FirstPush | PromptKind::OngoingPush => GeneratedContent {
                title: None,
                body: format!("**Hey** there, quick question for {user_id}?"),
                reasoning: "short and personal".to_string(),
            },
            _ => GeneratedContent {
                title: Some(format!("Subject for {user_id}")),
                body: format!("Hello {user_id},\n\nHere is an idea."),
                reasoning: "reference the goal".to_string(),
            },
        }
    }
}

#[async_trait]
impl ContentGenerationService for ScriptedGenerator {
    async fn generate_content(
        &self,
        user_id: Uuid,
        _context: &UserContext,
        kind: PromptKind,
        session_id: &str,
    ) -> PortResult<GeneratedContent> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id, kind, session_id.to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().get(&user_id).cloned();
        match script {
            Some(Script::Fail(message)) => Err(PortError::Unexpected(message)),
            Some(Script::Panic) => panic!("generator blew up for {user_id}"),
            Some(Script::Reply(content)) => Ok(content),
            None => Ok(Self::default_reply(user_id, kind)),
        }
    }
}

//=========================================================================================
// Unsubscribe source
//=========================================================================================

pub(crate) struct StaticUnsubscribes(pub PortResult<Vec<String>>);

#[async_trait]
impl UnsubscribeSource for StaticUnsubscribes {
    async fn fetch_unsubscribed(&self) -> PortResult<Vec<String>> {
        match &self.0 {
            Ok(list) => Ok(list.clone()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }
}

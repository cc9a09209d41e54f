//! crates/notification_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete document store, LLM provider and mailing provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::{
    ChatMessageDocument, EmailDocument, GeneratedContent, PromptKind, ThreadKey, User,
    UserContext,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Atomic batch would exceed {0} operations")]
    BatchLimitExceeded(usize),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Atomic write batches
//=========================================================================================

/// Hard ceiling on the number of operations the store accepts in one atomic batch.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    CreateEmail(EmailDocument),
    CreateThread {
        thread: ThreadKey,
        created_at: DateTime<Utc>,
    },
    CreateMessage(ChatMessageDocument),
    /// Bumps message and unread counters and records the latest assistant message.
    TouchThread {
        thread: ThreadKey,
        at: DateTime<Utc>,
    },
    /// Increments the notification count by one and sets the last sent time.
    RecordNotificationSent {
        user_id: Uuid,
        sent_at: DateTime<Utc>,
    },
    MarkEmailUnsubscribed {
        user_id: Uuid,
    },
}

impl WriteOp {
    /// The user whose data this operation touches.
    pub fn user_id(&self) -> Uuid {
        match self {
            WriteOp::CreateEmail(doc) => doc.user_id,
            WriteOp::CreateThread { thread, .. } | WriteOp::TouchThread { thread, .. } => {
                thread.user_id
            }
            WriteOp::CreateMessage(msg) => msg.thread.user_id,
            WriteOp::RecordNotificationSent { user_id, .. }
            | WriteOp::MarkEmailUnsubscribed { user_id } => *user_id,
        }
    }
}

/// An all-or-nothing group of at most [`MAX_BATCH_OPERATIONS`] operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> PortResult<()> {
        if self.ops.len() >= MAX_BATCH_OPERATIONS {
            return Err(PortError::BatchLimitExceeded(MAX_BATCH_OPERATIONS));
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait NotificationStore: Send + Sync {
    // --- Users ---
    /// Every user, validated. Rows that fail validation are skipped by the adapter.
    async fn list_users(&self) -> PortResult<Vec<User>>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<User>>;

    async fn find_users_by_email(&self, email: &str) -> PortResult<Vec<User>>;

    // --- Conversations ---
    /// Unread message count of one thread; zero when the thread does not exist.
    async fn unread_count(&self, thread: &ThreadKey) -> PortResult<u32>;

    /// Which of the given threads already exist, in one round trip.
    async fn existing_threads(&self, threads: &[ThreadKey]) -> PortResult<HashSet<ThreadKey>>;

    // --- Generation context ---
    async fn fetch_user_context(&self, user_id: Uuid) -> PortResult<UserContext>;

    // --- Writes ---
    /// Applies every operation of the batch atomically, or none of them.
    async fn commit(&self, batch: WriteBatch) -> PortResult<()>;
}

#[async_trait]
pub trait ContentGenerationService: Send + Sync {
    /// Generates notification content for one user.
    ///
    /// Implementations may retry internally; the engine calls this at most
    /// once per unit per run.
    async fn generate_content(
        &self,
        user_id: Uuid,
        context: &UserContext,
        kind: PromptKind,
        session_id: &str,
    ) -> PortResult<GeneratedContent>;
}

#[async_trait]
pub trait UnsubscribeSource: Send + Sync {
    /// Every address the mailing provider reports as unsubscribed.
    async fn fetch_unsubscribed(&self) -> PortResult<Vec<String>>;
}

//! crates/notification_core/src/writer.rs
//!
//! Writes generated notifications to the store in bounded atomic chunks and
//! advances each user's notification counter once its content has committed.
//!
//! Ordering per chunk: content batch commits first, counter batch second. A
//! failed counter batch is reported and never triggers a rewrite of content
//! that the delivery triggers may already have picked up.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::iter::Peekable;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    BatchResult, Channel, ChatMessageDocument, DeliveredNotification, EmailDocument, EmailState,
    FailureRecord, MessageRole, PreparedNotification, ThreadKey,
};
use crate::ports::{NotificationStore, PortResult, WriteBatch, WriteOp, MAX_BATCH_OPERATIONS};

const PREVIEW_CHARS: usize = 60;

/// One notification turned into store operations, waiting for its commit.
struct Staged {
    item: PreparedNotification,
    document_id: Uuid,
    ops: Vec<WriteOp>,
}

impl Staged {
    fn delivered(&self) -> DeliveredNotification {
        match &self.item {
            PreparedNotification::Email { task, payload } => DeliveredNotification {
                user_id: task.user_id,
                channel: Channel::Email,
                category: task.category,
                document_id: self.document_id,
                thread_id: None,
                preview: payload.subject.clone(),
            },
            PreparedNotification::Push { task, payload } => DeliveredNotification {
                user_id: task.user_id,
                channel: Channel::Push,
                category: task.category,
                document_id: self.document_id,
                thread_id: Some(task.thread_id().to_string()),
                preview: payload.text.chars().take(PREVIEW_CHARS).collect(),
            },
        }
    }

    fn failed(&self, error_message: String) -> FailureRecord {
        FailureRecord {
            task: self.item.task(),
            error_message,
        }
    }
}

fn thread_key(item: &PreparedNotification) -> Option<ThreadKey> {
    match item {
        PreparedNotification::Push { task, .. } => Some(ThreadKey {
            user_id: task.user_id,
            thread_id: task.thread_id().to_string(),
        }),
        PreparedNotification::Email { .. } => None,
    }
}

/// Builds the operations for one item. `thread_exists` only matters for chat
/// messages; a missing thread costs one extra operation.
fn stage(item: PreparedNotification, thread_exists: bool) -> Staged {
    let document_id = Uuid::new_v4();
    let ops = match &item {
        PreparedNotification::Email { task, payload } => vec![WriteOp::CreateEmail(EmailDocument {
            id: document_id,
            user_id: task.user_id,
            to: task.address.clone(),
            subject: payload.subject.clone(),
            body_markdown: payload.body_markdown.clone(),
            state: EmailState::Planned,
            created_at: payload.created_at,
        })],
        PreparedNotification::Push { task, payload } => {
            let thread = ThreadKey {
                user_id: task.user_id,
                thread_id: task.thread_id().to_string(),
            };
            let mut ops = Vec::with_capacity(3);
            if !thread_exists {
                ops.push(WriteOp::CreateThread {
                    thread: thread.clone(),
                    created_at: payload.created_at,
                });
            }
            ops.push(WriteOp::CreateMessage(ChatMessageDocument {
                id: document_id,
                thread: thread.clone(),
                role: MessageRole::Assistant,
                text: payload.text.clone(),
                created_at: payload.created_at,
            }));
            ops.push(WriteOp::TouchThread {
                thread,
                at: payload.created_at,
            });
            ops
        }
    };
    Staged {
        item,
        document_id,
        ops,
    }
}

fn operation_count(item: &PreparedNotification, thread_exists: bool) -> usize {
    match item {
        PreparedNotification::Email { .. } => 1,
        PreparedNotification::Push { .. } if thread_exists => 2,
        PreparedNotification::Push { .. } => 3,
    }
}

/// Greedily takes the next group of items that fits the store's operation
/// ceiling. A thread counts as existing when it is in `known` or was created
/// earlier in this same group; the keys of threads the group creates are
/// returned alongside it.
fn next_group<I>(
    items: &mut Peekable<I>,
    known: &HashSet<ThreadKey>,
) -> (Vec<Staged>, Vec<ThreadKey>)
where
    I: Iterator<Item = PreparedNotification>,
{
    let mut group = Vec::new();
    let mut created: HashSet<ThreadKey> = HashSet::new();
    let mut ops = 0;
    while let Some(item) = items.peek() {
        let key = thread_key(item);
        let exists = key
            .as_ref()
            .map_or(true, |k| known.contains(k) || created.contains(k));
        let cost = operation_count(item, exists);
        if !group.is_empty() && ops + cost > MAX_BATCH_OPERATIONS {
            break;
        }
        let Some(item) = items.next() else { break };
        if let (Some(key), false) = (key, exists) {
            created.insert(key);
        }
        ops += cost;
        group.push(stage(item, exists));
    }
    (group, created.into_iter().collect())
}

fn content_batch(group: &[Staged]) -> PortResult<WriteBatch> {
    let mut batch = WriteBatch::new();
    for staged in group {
        for op in &staged.ops {
            batch.push(op.clone())?;
        }
    }
    Ok(batch)
}

/// The chunked persistence writer.
#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn NotificationStore>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Persists one channel's generated notifications in chunks of at most
    /// `chunk_size` items. Failed chunks are reported in `failed`; earlier
    /// committed chunks stay committed.
    pub async fn persist(&self, items: Vec<PreparedNotification>, chunk_size: usize) -> BatchResult {
        let mut result = BatchResult {
            total_count: items.len(),
            ..BatchResult::default()
        };
        let chunk_size = chunk_size.max(1);

        let mut items = items.into_iter().peekable();
        let mut chunk_index = 0;
        while items.peek().is_some() {
            let chunk: Vec<PreparedNotification> = items.by_ref().take(chunk_size).collect();
            self.persist_chunk(chunk_index, chunk, &mut result).await;
            chunk_index += 1;
        }

        info!(
            total = result.total_count,
            written = result.success_count(),
            failed = result.failure_count(),
            counter_update_failures = result.counter_update_failures,
            "Persistence finished"
        );
        result
    }

    async fn persist_chunk(
        &self,
        chunk_index: usize,
        chunk: Vec<PreparedNotification>,
        result: &mut BatchResult,
    ) {
        let threads: Vec<ThreadKey> = {
            let mut seen = HashSet::new();
            chunk
                .iter()
                .filter_map(thread_key)
                .filter(|k| seen.insert(k.clone()))
                .collect()
        };

        let existing = if threads.is_empty() {
            HashSet::new()
        } else {
            match self.store.existing_threads(&threads).await {
                Ok(existing) => existing,
                Err(e) => {
                    error!(chunk_index, error = %e, "Thread pre-scan failed, dropping chunk");
                    let message = format!("Batch write failed: {e}");
                    result.failed.extend(chunk.into_iter().map(|item| FailureRecord {
                        task: item.task(),
                        error_message: message.clone(),
                    }));
                    return;
                }
            }
        };

        // Threads only become known to later groups once their group committed.
        let mut known = existing;
        let mut items = chunk.into_iter().peekable();
        while items.peek().is_some() {
            let (group, created) = next_group(&mut items, &known);
            if self.commit_group(chunk_index, group, result).await {
                known.extend(created);
            }
        }
    }

    /// Commits one group's content, then its counters. Returns whether the
    /// content committed.
    async fn commit_group(
        &self,
        chunk_index: usize,
        group: Vec<Staged>,
        result: &mut BatchResult,
    ) -> bool {
        let commit = match content_batch(&group) {
            Ok(batch) => {
                let ops = batch.len();
                self.store.commit(batch).await.map(|()| ops)
            }
            Err(e) => Err(e),
        };

        let ops = match commit {
            Ok(ops) => ops,
            Err(e) => {
                error!(
                    target: "alerts",
                    chunk_index,
                    items = group.len(),
                    error = %e,
                    "Content batch write failed"
                );
                let message = format!("Batch write failed: {e}");
                result
                    .failed
                    .extend(group.iter().map(|staged| staged.failed(message.clone())));
                return false;
            }
        };

        let committed_at = Utc::now();
        info!(chunk_index, items = group.len(), ops, "Content batch committed");

        let user_ids: Vec<Uuid> = group.iter().map(|s| s.item.user_id()).collect();
        result.successful.extend(group.iter().map(Staged::delivered));

        if let Err(e) = self.record_sent(&user_ids, committed_at).await {
            result.counter_update_failures += 1;
            error!(
                target: "alerts",
                severity = "CRITICAL",
                chunk_index,
                users = user_ids.len(),
                error = %e,
                "Counter update failed after content was committed; users may be re-notified early"
            );
        }
        true
    }

    /// Advances the notification counter of every user by one.
    async fn record_sent(&self, user_ids: &[Uuid], sent_at: DateTime<Utc>) -> PortResult<()> {
        for ids in user_ids.chunks(MAX_BATCH_OPERATIONS) {
            let mut batch = WriteBatch::new();
            for user_id in ids {
                batch.push(WriteOp::RecordNotificationSent {
                    user_id: *user_id,
                    sent_at,
                })?;
            }
            if let Err(e) = self.store.commit(batch).await {
                warn!(users = ids.len(), error = %e, "Counter batch rejected");
                return Err(e);
            }
        }
        Ok(())
    }
}

//! crates/notification_core/src/orchestrator.rs
//!
//! The orchestration driver. One `run` walks the phases in a fixed order:
//! unsubscribe sync, user fetch, classification and timing filter, then
//! generate-and-persist for email followed by push, and finally statistics.
//! Only a failed user fetch aborts the run.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch::BatchRunner;
use crate::budget::TimeBudget;
use crate::classifier::classify;
use crate::config::{ChannelLimits, EngineConfig};
use crate::domain::{
    BatchResult, Category, Channel, EmailDocument, EmailState, EmailTask, NotificationTask,
    RunStats, TaskSkip, ThreadKey, User, MAIN_THREAD_ID,
};
use crate::generator::ContentGenerator;
use crate::interval::is_eligible;
use crate::ports::{
    ContentGenerationService, NotificationStore, PortError, PortResult, UnsubscribeSource,
    WriteBatch, WriteOp,
};
use crate::unsubscribe::sync_unsubscribes;
use crate::writer::PersistenceWriter;

/// Concurrent unread-count reads while classifying.
const UNREAD_LOOKUP_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    SyncUnsubscribes,
    FetchAllUsers,
    ClassifyAndFilter,
    GenerateEmailBatch,
    PersistEmailBatch,
    GeneratePushBatch,
    PersistPushBatch,
    EmitStatistics,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::SyncUnsubscribes => "sync_unsubscribes",
            RunPhase::FetchAllUsers => "fetch_all_users",
            RunPhase::ClassifyAndFilter => "classify_and_filter",
            RunPhase::GenerateEmailBatch => "generate_email_batch",
            RunPhase::PersistEmailBatch => "persist_email_batch",
            RunPhase::GeneratePushBatch => "generate_push_batch",
            RunPhase::PersistPushBatch => "persist_push_batch",
            RunPhase::EmitStatistics => "emit_statistics",
        }
    }

    fn for_channel(channel: Channel) -> (Self, Self) {
        match channel {
            Channel::Email => (RunPhase::GenerateEmailBatch, RunPhase::PersistEmailBatch),
            Channel::Push => (RunPhase::GeneratePushBatch, RunPhase::PersistPushBatch),
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel task lists produced by classification.
#[derive(Debug, Default)]
struct RunPlan {
    email: Vec<NotificationTask>,
    push: Vec<NotificationTask>,
    skipped_timing: usize,
    skipped_no_channel: usize,
}

pub struct NotificationOrchestrator {
    store: Arc<dyn NotificationStore>,
    unsubscribes: Option<Arc<dyn UnsubscribeSource>>,
    generator: ContentGenerator,
    runner: BatchRunner,
    writer: PersistenceWriter,
    config: EngineConfig,
}

impl NotificationOrchestrator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        llm: Arc<dyn ContentGenerationService>,
        unsubscribes: Option<Arc<dyn UnsubscribeSource>>,
        config: EngineConfig,
    ) -> Self {
        let generator = ContentGenerator::new(store.clone(), llm);
        Self {
            runner: BatchRunner::new(generator.clone()),
            writer: PersistenceWriter::new(store.clone()),
            generator,
            store,
            unsubscribes,
            config,
        }
    }

    /// Runs one full orchestration pass over every user.
    pub async fn run(&self) -> PortResult<RunStats> {
        self.run_at(Utc::now()).await
    }

    /// Like `run`, with classification and timing evaluated at `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> PortResult<RunStats> {
        let mut budget = TimeBudget::start(self.config.scheduled_budget);
        let mut stats = RunStats::default();
        info!(%now, "Notification orchestration started");

        // --- SyncUnsubscribes ---
        if let Some(source) = &self.unsubscribes {
            match sync_unsubscribes(self.store.as_ref(), source.as_ref()).await {
                Ok(count) => stats.unsubscribes_synced = Some(count),
                Err(e) => error!(
                    target: "alerts",
                    error = %e,
                    "Unsubscribe sync failed, continuing with stored flags"
                ),
            }
        } else {
            info!("No unsubscribe source configured, skipping sync");
        }
        budget.check(RunPhase::SyncUnsubscribes.as_str());

        // --- FetchAllUsers ---
        let users = match self.store.list_users().await {
            Ok(users) => users,
            Err(e) => {
                error!(target: "alerts", error = %e, "Failed to fetch users, aborting run");
                return Err(e);
            }
        };
        stats.total_users = users.len();
        info!(total_users = users.len(), "Fetched users");
        budget.check(RunPhase::FetchAllUsers.as_str());

        // --- ClassifyAndFilter ---
        let plan = self.plan(users, now).await;
        stats.skipped_timing = plan.skipped_timing;
        stats.skipped_no_channel = plan.skipped_no_channel;
        info!(
            email_tasks = plan.email.len(),
            push_tasks = plan.push.len(),
            skipped_timing = plan.skipped_timing,
            skipped_no_channel = plan.skipped_no_channel,
            "Classification complete"
        );
        budget.check(RunPhase::ClassifyAndFilter.as_str());

        // --- Email, then push ---
        let email = self
            .process_channel(Channel::Email, plan.email, &self.config.email, &mut budget)
            .await;
        stats.emails_sent = email.success_count();
        stats.emails_failed = email.failure_count();

        let push = self
            .process_channel(Channel::Push, plan.push, &self.config.push, &mut budget)
            .await;
        stats.pushes_sent = push.success_count();
        stats.pushes_failed = push.failure_count();

        // --- EmitStatistics ---
        budget.check(RunPhase::EmitStatistics.as_str());
        stats.counter_update_failures = email.counter_update_failures + push.counter_update_failures;
        stats.budget_exceeded = budget.exceeded();
        stats.duration_minutes = budget.elapsed().as_secs_f64() / 60.0;

        info!(
            total_users = stats.total_users,
            emails_sent = stats.emails_sent,
            emails_failed = stats.emails_failed,
            pushes_sent = stats.pushes_sent,
            pushes_failed = stats.pushes_failed,
            skipped_timing = stats.skipped_timing,
            skipped_no_channel = stats.skipped_no_channel,
            unsubscribes_synced = ?stats.unsubscribes_synced,
            counter_update_failures = stats.counter_update_failures,
            budget_exceeded = stats.budget_exceeded,
            duration_minutes = stats.duration_minutes,
            "Notification orchestration finished"
        );
        Ok(stats)
    }

    async fn plan(&self, users: Vec<User>, now: DateTime<Utc>) -> RunPlan {
        let store = self.store.clone();
        let with_unread: Vec<(User, u32)> = stream::iter(users)
            .map(|user| {
                let store = store.clone();
                async move {
                    let thread = ThreadKey {
                        user_id: user.id,
                        thread_id: MAIN_THREAD_ID.to_string(),
                    };
                    let unread = match store.unread_count(&thread).await {
                        Ok(count) => count,
                        Err(e) => {
                            warn!(user_id = %user.id, error = %e, "Could not read unread count, assuming none");
                            0
                        }
                    };
                    (user, unread)
                }
            })
            .buffered(UNREAD_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut plan = RunPlan::default();
        for (user, unread) in with_unread {
            let Some(category) = classify(&user, unread, &self.config.classifier, now) else {
                plan.skipped_no_channel += 1;
                continue;
            };

            if !is_eligible(&user.notification_state, user.created_at, category, now) {
                plan.skipped_timing += 1;
                continue;
            }

            match NotificationTask::for_category(&user, category) {
                Ok(task @ NotificationTask::Email(_)) => plan.email.push(task),
                Ok(task @ NotificationTask::Push(_)) => plan.push.push(task),
                Err(skip) => {
                    let missing = match skip {
                        TaskSkip::MissingEmailAddress => "email address",
                        TaskSkip::MissingDeviceToken => "device token",
                    };
                    error!(
                        target: "alerts",
                        user_id = %user.id,
                        %category,
                        missing,
                        "Classified user is missing channel details, skipping"
                    );
                    plan.skipped_no_channel += 1;
                }
            }
        }
        plan
    }

    /// Generates and persists one channel's tasks, one sub-batch at a time.
    async fn process_channel(
        &self,
        channel: Channel,
        tasks: Vec<NotificationTask>,
        limits: &ChannelLimits,
        budget: &mut TimeBudget,
    ) -> BatchResult {
        let (generate_phase, persist_phase) = RunPhase::for_channel(channel);
        let mut result = BatchResult::default();
        if tasks.is_empty() {
            info!(%channel, "No tasks for channel");
            budget.check(persist_phase.as_str());
            return result;
        }

        let batch_size = limits.batch_size.max(1);
        let sub_batches = tasks.len().div_ceil(batch_size);
        let mut tasks = tasks.into_iter().peekable();
        let mut index = 0;
        while tasks.peek().is_some() {
            let sub_batch: Vec<NotificationTask> = tasks.by_ref().take(batch_size).collect();
            index += 1;
            info!(%channel, sub_batch = index, of = sub_batches, size = sub_batch.len(), "Processing sub-batch");

            result.total_count += sub_batch.len();
            let generated = self.runner.run(sub_batch, limits.max_workers).await;
            result.failed.extend(generated.failures);
            budget.check(generate_phase.as_str());

            if !generated.successes.is_empty() {
                let written = self
                    .writer
                    .persist(generated.successes, limits.write_chunk_size)
                    .await;
                result.successful.extend(written.successful);
                result.failed.extend(written.failed);
                result.counter_update_failures += written.counter_update_failures;
            }
            budget.check(persist_phase.as_str());
        }

        info!(
            %channel,
            total = result.total_count,
            sent = result.success_count(),
            failed = result.failure_count(),
            "Channel processing complete"
        );
        result
    }

    /// Writes the onboarding welcome email for a user who just signed up.
    /// The user asked for it, so the proactive unsubscribe flag does not apply.
    /// Does not advance the notification counter. Returns the email document id.
    pub async fn send_onboarding_welcome_email(&self, user_id: Uuid) -> PortResult<Uuid> {
        let mut budget = TimeBudget::start(self.config.reactive_budget);

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))?;
        let address = user
            .email_address()
            .ok_or_else(|| PortError::InvalidRecord(format!("user {user_id} has no email address")))?;

        let task = EmailTask {
            user_id,
            address: address.to_string(),
            category: Category::EmailOnly,
        };
        let payload = self.generator.generate_welcome(&task).await?;

        let document_id = Uuid::new_v4();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::CreateEmail(EmailDocument {
            id: document_id,
            user_id,
            to: task.address,
            subject: payload.subject,
            body_markdown: payload.body_markdown,
            state: EmailState::Planned,
            created_at: payload.created_at,
        }))?;
        self.store.commit(batch).await?;

        budget.check("onboarding_welcome_email");
        info!(%user_id, %document_id, "Onboarding welcome email written");
        Ok(document_id)
    }
}

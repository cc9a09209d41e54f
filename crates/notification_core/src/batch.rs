//! crates/notification_core/src/batch.rs
//!
//! Fans one channel's tasks out over a bounded number of concurrent
//! generation calls and sorts the outcomes.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

use crate::domain::{
    FailureRecord, GenerationOutcome, NotificationTask, PreparedNotification,
};
use crate::generator::ContentGenerator;

/// Outcomes of one sub-batch. `successes.len() + failures.len()` always
/// equals the number of submitted tasks.
#[derive(Debug, Default)]
pub struct GenerationBatch {
    pub successes: Vec<PreparedNotification>,
    pub failures: Vec<FailureRecord>,
}

impl GenerationBatch {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Clone)]
pub struct BatchRunner {
    generator: ContentGenerator,
}

impl BatchRunner {
    pub fn new(generator: ContentGenerator) -> Self {
        Self { generator }
    }

    /// Generates content for every task with at most `max_workers` calls in
    /// flight. Nothing is retried and nothing is dropped.
    pub async fn run(&self, tasks: Vec<NotificationTask>, max_workers: usize) -> GenerationBatch {
        let total = tasks.len();
        let outcomes: Vec<GenerationOutcome> = stream::iter(tasks)
            .map(|task| {
                let generator = self.generator.clone();
                async move {
                    let fallback = task.clone();
                    match AssertUnwindSafe(generator.generate(task)).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let message = panic_message(payload);
                            error!(
                                target: "alerts",
                                user_id = %fallback.user_id(),
                                panic = %message,
                                "Generation unit panicked"
                            );
                            GenerationOutcome::Failure(FailureRecord {
                                task: fallback,
                                error_message: format!("Unexpected error in generation unit: {message}"),
                            })
                        }
                    }
                }
            })
            .buffer_unordered(max_workers.max(1))
            .collect()
            .await;

        let mut batch = GenerationBatch::default();
        for outcome in outcomes {
            match outcome {
                GenerationOutcome::Success(prepared) => batch.successes.push(prepared),
                GenerationOutcome::Failure(record) => batch.failures.push(record),
            }
        }

        info!(
            total,
            succeeded = batch.successes.len(),
            failed = batch.failures.len(),
            "Generation batch finished"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::test_support::{email_user, FakeStore, Script, ScriptedGenerator};
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn setup(n: usize) -> (Arc<FakeStore>, Arc<ScriptedGenerator>, Vec<NotificationTask>) {
        let now = Utc::now();
        let users: Vec<_> = (0..n).map(|_| email_user(now)).collect();
        let tasks = users
            .iter()
            .map(|u| NotificationTask::for_category(u, Category::ActiveEmail).unwrap())
            .collect();
        (
            Arc::new(FakeStore::with_users(users)),
            Arc::new(ScriptedGenerator::default()),
            tasks,
        )
    }

    #[tokio::test]
    async fn one_failing_unit_does_not_affect_the_others() {
        let (store, llm, tasks) = setup(8);
        let broken = tasks[3].user_id();
        llm.script(broken, Script::Fail("boom".to_string()));

        let batch = BatchRunner::new(ContentGenerator::new(store, llm))
            .run(tasks.clone(), 4)
            .await;

        assert_eq!(batch.len(), 8);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].task, tasks[3]);
        let ok: HashSet<_> = batch.successes.iter().map(|p| p.user_id()).collect();
        assert_eq!(ok.len(), 7);
        assert!(!ok.contains(&broken));
    }

    #[tokio::test]
    async fn panicking_unit_becomes_a_failure() {
        let (store, llm, tasks) = setup(5);
        let broken = tasks[1].user_id();
        llm.script(broken, Script::Panic);

        let batch = BatchRunner::new(ContentGenerator::new(store, llm))
            .run(tasks, 5)
            .await;

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].task.user_id(), broken);
        assert!(batch.failures[0].error_message.contains("generator blew up"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_workers() {
        let (store, llm, tasks) = setup(12);

        let batch = BatchRunner::new(ContentGenerator::new(store, llm.clone()))
            .run(tasks, 3)
            .await;

        assert_eq!(batch.successes.len(), 12);
        assert!(llm.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(llm.call_count(), 12);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_batch() {
        let (store, llm, _) = setup(0);
        let batch = BatchRunner::new(ContentGenerator::new(store, llm))
            .run(Vec::new(), 10)
            .await;
        assert!(batch.is_empty());
    }
}

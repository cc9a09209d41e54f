//! services/orchestrator/src/bin/run_once.rs
//!
//! Runs a single orchestration pass and exits. Meant for cron-style
//! schedulers invoking the engine every couple of hours.

use orchestrator_lib::{
    bootstrap::{build_orchestrator, init_tracing},
    config::Config,
    error::ApiError,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let orchestrator = build_orchestrator(&config).await?;
    let stats = orchestrator.run().await?;

    info!(
        total_users = stats.total_users,
        emails_sent = stats.emails_sent,
        emails_failed = stats.emails_failed,
        pushes_sent = stats.pushes_sent,
        pushes_failed = stats.pushes_failed,
        skipped_timing = stats.skipped_timing,
        skipped_no_channel = stats.skipped_no_channel,
        counter_update_failures = stats.counter_update_failures,
        budget_exceeded = stats.budget_exceeded,
        duration_minutes = stats.duration_minutes,
        "Scheduled run finished"
    );
    Ok(())
}

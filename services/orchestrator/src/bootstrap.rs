//! services/orchestrator/src/bootstrap.rs
//!
//! Startup wiring shared by the server and the one-shot runner: logging,
//! database pool and migrations, adapters, and the orchestrator itself.

use crate::{
    adapters::{DbAdapter, MailgunUnsubscribeAdapter, OpenAiContentAdapter},
    config::Config,
    error::ApiError,
};
use async_openai::{config::OpenAIConfig, Client};
use notification_core::{NotificationOrchestrator, UnsubscribeSource};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the `tracing` subscriber. Call once per process.
pub fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connects to the database, applies migrations and assembles the orchestrator.
pub async fn build_orchestrator(config: &Config) -> Result<NotificationOrchestrator, ApiError> {
    // --- Database ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- Content generation ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let content_adapter = Arc::new(OpenAiContentAdapter::new(
        Client::with_config(openai_config),
        config.generation_model.clone(),
    ));

    // --- Unsubscribe source ---
    let unsubscribes: Option<Arc<dyn UnsubscribeSource>> = match &config.mailgun {
        Some(mailgun) => Some(Arc::new(MailgunUnsubscribeAdapter::new(
            mailgun.api_key.clone(),
            mailgun.domain.clone(),
        )?)),
        None => {
            info!("MAILGUN_API_KEY not set; unsubscribe sync is disabled");
            None
        }
    };

    Ok(NotificationOrchestrator::new(
        db_adapter,
        content_adapter,
        unsubscribes,
        config.engine.clone(),
    ))
}

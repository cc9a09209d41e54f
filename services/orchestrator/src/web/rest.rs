//! services/orchestrator/src/web/rest.rs
//!
//! Contains the Axum handlers for the trigger endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use notification_core::{PortError, RunStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        run_orchestration_handler,
        welcome_email_handler,
        health_handler,
    ),
    components(
        schemas(RunStatsResponse, WelcomeEmailResponse, HealthResponse)
    ),
    tags(
        (name = "Notification Orchestrator", description = "Triggers for proactive notification runs and reactive sends.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response Structs
//=========================================================================================

/// Statistics of one completed orchestration run.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunStatsResponse {
    total_users: usize,
    emails_sent: usize,
    emails_failed: usize,
    pushes_sent: usize,
    pushes_failed: usize,
    skipped_timing: usize,
    skipped_no_channel: usize,
    /// Absent when the unsubscribe sync was skipped or failed.
    unsubscribes_synced: Option<usize>,
    counter_update_failures: usize,
    budget_exceeded: bool,
    duration_minutes: f64,
}

impl From<RunStats> for RunStatsResponse {
    fn from(stats: RunStats) -> Self {
        Self {
            total_users: stats.total_users,
            emails_sent: stats.emails_sent,
            emails_failed: stats.emails_failed,
            pushes_sent: stats.pushes_sent,
            pushes_failed: stats.pushes_failed,
            skipped_timing: stats.skipped_timing,
            skipped_no_channel: stats.skipped_no_channel,
            unsubscribes_synced: stats.unsubscribes_synced,
            counter_update_failures: stats.counter_update_failures,
            budget_exceeded: stats.budget_exceeded,
            duration_minutes: stats.duration_minutes,
        }
    }
}

/// The response sent after the welcome email was written.
#[derive(Serialize, ToSchema)]
pub struct WelcomeEmailResponse {
    user_id: Uuid,
    email_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Run one orchestration pass over every user.
///
/// Only one run may be in progress per process; concurrent triggers get `409`.
/// The run executes in its own task holding the run lock, so it finishes even
/// when the caller disconnects or times out.
#[utoipa::path(
    post,
    path = "/orchestrations",
    responses(
        (status = 200, description = "Run completed", body = RunStatsResponse),
        (status = 401, description = "Missing or wrong trigger token"),
        (status = 409, description = "Another run is already in progress"),
        (status = 500, description = "The run could not start")
    )
)]
pub async fn run_orchestration_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Ok(guard) = app_state.run_lock.clone().try_lock_owned() else {
        warn!("Orchestration trigger rejected: a run is already in progress");
        return Err((
            StatusCode::CONFLICT,
            "An orchestration run is already in progress".to_string(),
        ));
    };

    let orchestrator = app_state.orchestrator.clone();
    let run = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.run().await
    });

    match run.await {
        Ok(Ok(stats)) => {
            info!(
                emails_sent = stats.emails_sent,
                pushes_sent = stats.pushes_sent,
                "Orchestration triggered over HTTP finished"
            );
            Ok(Json(RunStatsResponse::from(stats)))
        }
        Ok(Err(e)) => {
            error!("Orchestration run failed: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Orchestration run failed".to_string(),
            ))
        }
        Err(e) => {
            error!(target: "alerts", "Orchestration task aborted: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Orchestration run failed".to_string(),
            ))
        }
    }
}

/// Write the onboarding welcome email for a user who just signed up.
#[utoipa::path(
    post,
    path = "/users/{user_id}/welcome-email",
    responses(
        (status = 201, description = "Welcome email written", body = WelcomeEmailResponse),
        (status = 401, description = "Missing or wrong trigger token"),
        (status = 404, description = "Unknown user"),
        (status = 422, description = "User cannot receive email"),
        (status = 500, description = "Generation or write failed")
    ),
    params(
        ("user_id" = Uuid, Path, description = "The unique ID of the user.")
    )
)]
pub async fn welcome_email_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match app_state
        .orchestrator
        .send_onboarding_welcome_email(user_id)
        .await
    {
        Ok(email_id) => Ok((
            StatusCode::CREATED,
            Json(WelcomeEmailResponse { user_id, email_id }),
        )),
        Err(PortError::NotFound(what)) => Err((StatusCode::NOT_FOUND, format!("Not found: {what}"))),
        Err(PortError::InvalidRecord(reason)) => Err((StatusCode::UNPROCESSABLE_ENTITY, reason)),
        Err(e) => {
            error!(%user_id, "Failed to send welcome email: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send welcome email".to_string(),
            ))
        }
    }
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

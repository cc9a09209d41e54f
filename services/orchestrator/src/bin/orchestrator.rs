//! services/orchestrator/src/bin/orchestrator.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use orchestrator_lib::{
    bootstrap::{build_orchestrator, init_tracing},
    config::Config,
    error::ApiError,
    web::{
        health_handler, require_trigger_token, rest::ApiDoc, run_orchestration_handler,
        state::AppState, welcome_email_handler,
    },
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    init_tracing(&config);
    info!("Configuration loaded. Starting server...");

    // --- 2. Database, Adapters and Engine ---
    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let app_state = Arc::new(AppState::new(orchestrator, config.clone()));

    // --- 3. Create the Web Router ---
    let trigger_routes = Router::new()
        .route("/orchestrations", post(run_orchestration_handler))
        .route("/users/{user_id}/welcome-email", post(welcome_email_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_trigger_token,
        ));

    let api_router = Router::new()
        .route("/health", get(health_handler))
        .merge(trigger_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 4. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! services/orchestrator/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use notification_core::NotificationOrchestrator;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub config: Arc<Config>,
    /// Held by the running orchestration task; at most one run per process.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<NotificationOrchestrator>, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

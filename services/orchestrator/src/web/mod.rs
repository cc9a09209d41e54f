pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::require_trigger_token;
pub use rest::{health_handler, run_orchestration_handler, welcome_email_handler};

pub mod batch;
pub mod budget;
pub mod classifier;
pub mod config;
pub mod context;
pub mod domain;
pub mod generator;
pub mod interval;
pub mod orchestrator;
pub mod ports;
pub mod unsubscribe;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ChannelLimits, ClassifierPolicy, EngineConfig};
pub use domain::{Category, Channel, PromptKind, RunStats, User, UserContext};
pub use orchestrator::{NotificationOrchestrator, RunPhase};
pub use ports::{
    ContentGenerationService, NotificationStore, PortError, PortResult, UnsubscribeSource,
};

//! crates/notification_core/src/config.rs
//!
//! Tunables of the engine. The service builds these from the environment;
//! tests use the defaults.

use std::time::Duration;

/// Knobs of the category classifier.
#[derive(Clone, Debug)]
pub struct ClassifierPolicy {
    /// Users registered within this many days count as new.
    pub new_user_window_days: i64,
    /// Users without activity for longer than this are inactive.
    pub inactive_after_days: i64,
    /// When set, push is only available to users active within
    /// `push_recent_activity_days`.
    pub push_requires_recent_activity: bool,
    pub push_recent_activity_days: i64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            new_user_window_days: 14,
            inactive_after_days: 10,
            push_requires_recent_activity: false,
            push_recent_activity_days: 7,
        }
    }
}

/// Throughput limits for one delivery channel.
#[derive(Clone, Debug)]
pub struct ChannelLimits {
    /// Tasks per sequential sub-batch.
    pub batch_size: usize,
    /// Concurrent generation calls inside one sub-batch.
    pub max_workers: usize,
    /// Items per atomic content write.
    pub write_chunk_size: usize,
}

impl ChannelLimits {
    pub fn email() -> Self {
        Self {
            batch_size: 20,
            max_workers: 20,
            write_chunk_size: 500,
        }
    }

    pub fn push() -> Self {
        Self {
            batch_size: 10,
            max_workers: 10,
            write_chunk_size: 250,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub classifier: ClassifierPolicy,
    pub email: ChannelLimits,
    pub push: ChannelLimits,
    /// Soft wall-clock budget of a scheduled run.
    pub scheduled_budget: Duration,
    /// Soft wall-clock budget of a single-user reactive send.
    pub reactive_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierPolicy::default(),
            email: ChannelLimits::email(),
            push: ChannelLimits::push(),
            scheduled_budget: Duration::from_secs(20 * 60),
            reactive_budget: Duration::from_secs(9 * 60),
        }
    }
}

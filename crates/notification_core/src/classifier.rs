//! crates/notification_core/src/classifier.rs
//!
//! Maps a user's account state to exactly one notification category.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::config::ClassifierPolicy;
use crate::domain::{Category, PushPermission, User};

/// Which delivery channels can currently reach a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAvailability {
    pub push: bool,
    pub email: bool,
}

impl ChannelAvailability {
    pub fn of(user: &User, policy: &ClassifierPolicy, now: DateTime<Utc>) -> Self {
        let mut push = user.push_permission == PushPermission::Granted && user.device_token().is_some();
        if push && policy.push_requires_recent_activity {
            push = active_within(user, policy.push_recent_activity_days, now);
        }
        Self {
            push,
            email: !user.email_unsubscribed,
        }
    }

    pub fn none(&self) -> bool {
        !self.push && !self.email
    }
}

/// Longest window a policy can express; larger values are clamped.
pub const MAX_POLICY_DAYS: i64 = 36_500;

fn window(days: i64) -> Duration {
    Duration::days(days.clamp(0, MAX_POLICY_DAYS))
}

fn active_within(user: &User, days: i64, now: DateTime<Utc>) -> bool {
    user.last_activity_at
        .map(|at| now - at <= window(days))
        .unwrap_or(false)
}

/// Inactive means: logged in at least once, but not for more than `days` days.
/// Users who never logged in are not inactive.
fn inactive_beyond(user: &User, days: i64, now: DateTime<Utc>) -> bool {
    user.last_activity_at
        .map(|at| now - at > window(days))
        .unwrap_or(false)
}

fn registered_within(user: &User, days: i64, now: DateTime<Utc>) -> bool {
    now - user.created_at <= window(days)
}

/// Decides the category of one user. First matching rule wins:
///
/// 1. no channel at all → `None`
/// 2. unread backlog and inactive → `InactiveEmail` (email only; `None` without email)
/// 3. never logged in → `EmailOnly`, or `NewPush` when only push is available
/// 4. registered recently → `NewPush` / `NewEmail`
/// 5. otherwise → `ActivePush` / `ActiveEmail`
pub fn classify(
    user: &User,
    unread_count: u32,
    policy: &ClassifierPolicy,
    now: DateTime<Utc>,
) -> Option<Category> {
    let channels = ChannelAvailability::of(user, policy, now);

    if channels.none() {
        warn!(
            target: "alerts",
            user_id = %user.id,
            has_push = channels.push,
            has_email = channels.email,
            "User has no available notification channel"
        );
        return None;
    }

    if unread_count > 0 && inactive_beyond(user, policy.inactive_after_days, now) {
        return channels.email.then_some(Category::InactiveEmail);
    }

    if user.last_activity_at.is_none() {
        return Some(if channels.email {
            Category::EmailOnly
        } else {
            Category::NewPush
        });
    }

    if registered_within(user, policy.new_user_window_days, now) {
        return Some(if channels.push {
            Category::NewPush
        } else {
            Category::NewEmail
        });
    }

    Some(if channels.push {
        Category::ActivePush
    } else {
        Category::ActiveEmail
    })
}

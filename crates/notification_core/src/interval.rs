//! crates/notification_core/src/interval.rs
//!
//! Progressive interval policy. Each category owns an increasing schedule of
//! waits; the first wait is measured from registration, every later one from
//! the previous notification.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::domain::{Category, NotificationState};

const HOUR: i64 = 1;
const DAY: i64 = 24 * HOUR;

// Waits in hours, indexed by how many notifications were already sent.
const EMAIL_STANDARD: [i64; 5] = [HOUR, 6 * HOUR, DAY, 2 * DAY, 7 * DAY];
const PUSH_ENGAGED: [i64; 5] = [HOUR, 3 * HOUR, 6 * HOUR, DAY, 3 * DAY];
const INACTIVE_SLOW: [i64; 5] = [HOUR, DAY, 2 * DAY, 7 * DAY, 14 * DAY];

fn schedule_hours(category: Category) -> &'static [i64] {
    match category {
        Category::EmailOnly | Category::NewEmail | Category::ActiveEmail => &EMAIL_STANDARD,
        Category::NewPush | Category::ActivePush => &PUSH_ENGAGED,
        Category::InactiveEmail => &INACTIVE_SLOW,
    }
}

/// The full wait schedule of a category.
pub fn schedule(category: Category) -> Vec<Duration> {
    schedule_hours(category)
        .iter()
        .map(|h| Duration::hours(*h))
        .collect()
}

/// The wait required before notification number `count + 1`.
/// Counts past the end of the schedule reuse its last entry.
pub fn required_interval(category: Category, count: u32) -> Duration {
    let hours = schedule_hours(category);
    let index = (count as usize).min(hours.len() - 1);
    Duration::hours(hours[index])
}

/// Whether enough time has passed to notify the user again.
pub fn is_eligible(
    state: &NotificationState,
    registered_at: DateTime<Utc>,
    category: Category,
    now: DateTime<Utc>,
) -> bool {
    let since = if state.count == 0 {
        registered_at
    } else {
        match state.last_sent_at {
            Some(last) => last,
            None => {
                warn!(
                    notification_count = state.count,
                    category = %category,
                    "User has a notification count but no last sent time, skipping"
                );
                return false;
            }
        }
    };

    now - since >= required_interval(category, state.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(count: u32, hours_ago: Option<i64>, now: DateTime<Utc>) -> NotificationState {
        NotificationState {
            count,
            last_sent_at: hours_ago.map(|h| now - Duration::hours(h)),
        }
    }

    #[test]
    fn every_schedule_has_at_least_five_increasing_entries() {
        for category in Category::ALL {
            let waits = schedule(category);
            assert!(waits.len() >= 5, "{category} schedule too short");
            assert!(waits.windows(2).all(|w| w[0] < w[1]), "{category} not increasing");
        }
    }

    #[test]
    fn first_notification_measures_from_registration() {
        let now = Utc::now();
        let registered = now - Duration::hours(2);
        for category in Category::ALL {
            let expected = schedule(category)[0] <= Duration::hours(2);
            assert_eq!(
                is_eligible(&NotificationState::default(), registered, category, now),
                expected
            );
        }

        let just_registered = now - Duration::minutes(30);
        assert!(!is_eligible(
            &NotificationState::default(),
            just_registered,
            Category::EmailOnly,
            now
        ));
    }

    #[test]
    fn email_only_fourth_notification_waits_48_hours() {
        let now = Utc::now();
        let registered = now - Duration::days(30);
        assert!(is_eligible(&state(3, Some(49), now), registered, Category::EmailOnly, now));
        assert!(!is_eligible(&state(3, Some(47), now), registered, Category::EmailOnly, now));
    }

    #[test]
    fn counts_beyond_schedule_reuse_last_interval() {
        let now = Utc::now();
        let registered = now - Duration::days(365);
        assert_eq!(required_interval(Category::InactiveEmail, 40), Duration::days(14));
        assert!(!is_eligible(&state(40, Some(13 * 24), now), registered, Category::InactiveEmail, now));
        assert!(is_eligible(&state(40, Some(14 * 24), now), registered, Category::InactiveEmail, now));
    }

    #[test]
    fn later_notifications_use_the_indexed_interval() {
        let now = Utc::now();
        let registered = now - Duration::days(365);
        for category in Category::ALL {
            let waits = schedule(category);
            for k in 1..8u32 {
                let needed = waits[(k as usize).min(waits.len() - 1)];
                let hours = needed.num_hours();
                assert!(is_eligible(&state(k, Some(hours), now), registered, category, now));
                assert!(!is_eligible(&state(k, Some(hours - 1), now), registered, category, now));
            }
        }
    }

    #[test]
    fn count_without_last_sent_time_is_not_eligible() {
        let now = Utc::now();
        let registered = now - Duration::days(365);
        assert!(!is_eligible(&state(2, None, now), registered, Category::ActivePush, now));
    }
}

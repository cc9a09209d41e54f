//! crates/notification_core/src/unsubscribe.rs
//!
//! Mirrors the mailing provider's unsubscribe list onto user records.

use std::collections::HashSet;
use tracing::info;

use crate::ports::{
    NotificationStore, PortResult, UnsubscribeSource, WriteBatch, WriteOp, MAX_BATCH_OPERATIONS,
};

/// Marks every user whose address the source reports as unsubscribed.
/// Users already marked are left alone. Returns how many users were updated.
pub async fn sync_unsubscribes(
    store: &dyn NotificationStore,
    source: &dyn UnsubscribeSource,
) -> PortResult<usize> {
    let addresses = source.fetch_unsubscribed().await?;
    if addresses.is_empty() {
        info!("No unsubscribed addresses reported");
        return Ok(0);
    }

    let mut seen_addresses = HashSet::new();
    let mut seen_users = HashSet::new();
    let mut batch = WriteBatch::new();
    let mut updated = 0;

    for address in addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
    {
        if !seen_addresses.insert(address.to_string()) {
            continue;
        }
        for user in store.find_users_by_email(address).await? {
            if user.email_unsubscribed || !seen_users.insert(user.id) {
                continue;
            }
            batch.push(WriteOp::MarkEmailUnsubscribed { user_id: user.id })?;
            updated += 1;
            if batch.len() >= MAX_BATCH_OPERATIONS {
                let full = std::mem::take(&mut batch);
                info!(count = full.len(), "Committing unsubscribe batch");
                store.commit(full).await?;
            }
        }
    }

    if !batch.is_empty() {
        info!(count = batch.len(), "Committing final unsubscribe batch");
        store.commit(batch).await?;
    }

    info!(
        reported = addresses.len(),
        users_updated = updated,
        "Unsubscribe sync complete"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use crate::test_support::{email_user, FakeStore, StaticUnsubscribes};
    use chrono::Utc;

    #[tokio::test]
    async fn marks_matching_users_once() {
        let now = Utc::now();
        let target = email_user(now);
        let mut already = email_user(now);
        already.email_unsubscribed = true;
        let untouched = email_user(now);
        let store = FakeStore::with_users([target.clone(), already.clone(), untouched.clone()]);

        let source = StaticUnsubscribes(Ok(vec![
            target.email.clone().unwrap(),
            format!(" {} ", target.email.clone().unwrap()),
            already.email.clone().unwrap(),
            "nobody@example.com".to_string(),
        ]));

        let updated = sync_unsubscribes(&store, &source).await.unwrap();

        assert_eq!(updated, 1);
        assert!(store.user(target.id).email_unsubscribed);
        assert!(!store.user(untouched.id).email_unsubscribed);
    }

    #[tokio::test]
    async fn large_lists_are_split_into_bounded_batches() {
        let now = Utc::now();
        let users: Vec<_> = (0..1_201).map(|_| email_user(now)).collect();
        let store = FakeStore::with_users(users.clone());
        let source = StaticUnsubscribes(Ok(users.iter().map(|u| u.email.clone().unwrap()).collect()));

        let updated = sync_unsubscribes(&store, &source).await.unwrap();

        assert_eq!(updated, 1_201);
        assert_eq!(store.snapshot().committed_batch_sizes, vec![500, 500, 201]);
    }

    #[tokio::test]
    async fn source_failure_is_returned() {
        let store = FakeStore::default();
        let source = StaticUnsubscribes(Err(PortError::Unexpected("503".to_string())));
        assert!(sync_unsubscribes(&store, &source).await.is_err());
        assert!(store.snapshot().committed_batch_sizes.is_empty());
    }
}

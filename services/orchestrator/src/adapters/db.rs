//! services/orchestrator/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `NotificationStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_core::domain::{
    Boss, NotificationState, PushPermission, SentEmail, ThreadKey, TimelineEntry, User,
    UserContext, UserProfile,
};
use notification_core::ports::{
    NotificationStore, PortError, PortResult, WriteBatch, WriteOp, MAX_BATCH_OPERATIONS,
};
use serde::Deserialize;
use sqlx::postgres::PgQueryResult;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

/// How much history the generation context carries.
const CONTEXT_ENTRY_LIMIT: i64 = 50;
const CONTEXT_EMAIL_LIMIT: i64 = 15;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `NotificationStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "id, email, created_at, last_activity_at, push_permission, push_token, \
     email_unsubscribed, notification_count, last_notification_sent_at";

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: Option<DateTime<Utc>>,
    push_permission: Option<String>,
    push_token: Option<String>,
    email_unsubscribed: bool,
    notification_count: i32,
    last_notification_sent_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    fn try_into_domain(self) -> PortResult<User> {
        let count = u32::try_from(self.notification_count).map_err(|_| {
            PortError::InvalidRecord(format!(
                "user {} has a negative notification count ({})",
                self.id, self.notification_count
            ))
        })?;
        Ok(User {
            id: self.id,
            email: self.email,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            push_permission: PushPermission::parse(self.push_permission.as_deref()),
            push_token: self.push_token,
            email_unsubscribed: self.email_unsubscribed,
            notification_state: NotificationState {
                count,
                last_sent_at: self.last_notification_sent_at,
            },
        })
    }
}

/// Parses rows, skipping those that fail validation.
fn valid_users(records: Vec<UserRecord>) -> Vec<User> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id;
            match record.try_into_domain() {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(user_id = %id, error = %e, "Skipping malformed user record");
                    None
                }
            }
        })
        .collect()
}

/// One custom onboarding field as stored in the JSONB column.
#[derive(Debug, Deserialize)]
struct CustomField {
    label: String,
    #[serde(default)]
    value: serde_json::Value,
}

fn custom_fields(fields: Vec<CustomField>) -> Vec<(String, String)> {
    fields
        .into_iter()
        .filter_map(|field| {
            let value = match field.value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) if s.trim().is_empty() => return None,
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Some((field.label, value))
        })
        .collect()
}

#[derive(FromRow)]
struct ProfileRecord {
    name: Option<String>,
    position: Option<String>,
    goal: Option<String>,
    custom_fields: Json<Vec<CustomField>>,
}
impl ProfileRecord {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            name: self.name,
            position: self.position,
            goal: self.goal,
            custom_fields: custom_fields(self.custom_fields.0),
        }
    }
}

#[derive(FromRow)]
struct BossRecord {
    name: String,
    position: Option<String>,
    department: Option<String>,
    management_style: Option<String>,
    working_hours: Option<String>,
    started_at: Option<String>,
    custom_fields: Json<Vec<CustomField>>,
}
impl BossRecord {
    fn to_domain(self) -> Boss {
        Boss {
            name: self.name,
            position: self.position,
            department: self.department,
            management_style: self.management_style,
            working_hours: self.working_hours,
            started_at: self.started_at,
            custom_fields: custom_fields(self.custom_fields.0),
        }
    }
}

#[derive(FromRow)]
struct EntryRecord {
    kind: String,
    subtype: Option<String>,
    title: String,
    content: Option<String>,
    created_at: DateTime<Utc>,
}
impl EntryRecord {
    fn to_domain(self) -> TimelineEntry {
        TimelineEntry {
            kind: self.kind,
            subtype: self.subtype,
            title: self.title,
            content: self.content,
            timestamp: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct SentEmailRecord {
    subject: String,
    body_markdown: String,
    created_at: DateTime<Utc>,
}
impl SentEmailRecord {
    fn to_domain(self) -> SentEmail {
        SentEmail {
            subject: self.subject,
            body_markdown: self.body_markdown,
            sent_at: Some(self.created_at),
        }
    }
}

//=========================================================================================
// Batch Operations
//=========================================================================================

fn expect_row(result: PgQueryResult, what: impl FnOnce() -> String) -> PortResult<()> {
    if result.rows_affected() == 0 {
        return Err(PortError::NotFound(what()));
    }
    Ok(())
}

async fn apply(tx: &mut Transaction<'_, Postgres>, op: WriteOp) -> PortResult<()> {
    match op {
        WriteOp::CreateEmail(doc) => {
            sqlx::query(
                "INSERT INTO emails (id, user_id, recipient, subject, body_markdown, state, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(doc.id)
            .bind(doc.user_id)
            .bind(doc.to)
            .bind(doc.subject)
            .bind(doc.body_markdown)
            .bind(doc.state.as_str())
            .bind(doc.created_at)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        }
        WriteOp::CreateThread { thread, created_at } => {
            sqlx::query(
                "INSERT INTO chat_threads (user_id, thread_id, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id, thread_id) DO NOTHING",
            )
            .bind(thread.user_id)
            .bind(thread.thread_id)
            .bind(created_at)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        }
        WriteOp::CreateMessage(msg) => {
            sqlx::query(
                "INSERT INTO chat_messages (id, user_id, thread_id, role, content, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(msg.id)
            .bind(msg.thread.user_id)
            .bind(msg.thread.thread_id)
            .bind(msg.role.as_str())
            .bind(msg.text)
            .bind(msg.created_at)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        }
        WriteOp::TouchThread { thread, at } => {
            let result = sqlx::query(
                "UPDATE chat_threads SET message_count = message_count + 1, \
                 unread_count = unread_count + 1, last_message_at = $3 \
                 WHERE user_id = $1 AND thread_id = $2",
            )
            .bind(thread.user_id)
            .bind(&thread.thread_id)
            .bind(at)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
            expect_row(result, || {
                format!("Thread {} of user {} not found", thread.thread_id, thread.user_id)
            })?;
        }
        WriteOp::RecordNotificationSent { user_id, sent_at } => {
            let result = sqlx::query(
                "UPDATE users SET notification_count = notification_count + 1, \
                 last_notification_sent_at = $2 WHERE id = $1",
            )
            .bind(user_id)
            .bind(sent_at)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
            expect_row(result, || format!("User {} not found", user_id))?;
        }
        WriteOp::MarkEmailUnsubscribed { user_id } => {
            let result = sqlx::query("UPDATE users SET email_unsubscribed = TRUE WHERE id = $1")
                .bind(user_id)
                .execute(&mut **tx)
                .await
                .map_err(unexpected)?;
            expect_row(result, || format!("User {} not found", user_id))?;
        }
    }
    Ok(())
}

//=========================================================================================
// `NotificationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl NotificationStore for DbAdapter {
    async fn list_users(&self) -> PortResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(valid_users(records))
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(UserRecord::try_into_domain).transpose()
    }

    async fn find_users_by_email(&self, email: &str) -> PortResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 LIMIT 10"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(valid_users(records))
    }

    async fn unread_count(&self, thread: &ThreadKey) -> PortResult<u32> {
        let unread: Option<i32> = sqlx::query_scalar(
            "SELECT unread_count FROM chat_threads WHERE user_id = $1 AND thread_id = $2",
        )
        .bind(thread.user_id)
        .bind(&thread.thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(unread.map(|n| n.max(0) as u32).unwrap_or(0))
    }

    async fn existing_threads(&self, threads: &[ThreadKey]) -> PortResult<HashSet<ThreadKey>> {
        if threads.is_empty() {
            return Ok(HashSet::new());
        }
        let user_ids: Vec<Uuid> = threads.iter().map(|t| t.user_id).collect();
        let thread_ids: Vec<String> = threads.iter().map(|t| t.thread_id.clone()).collect();

        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT t.user_id, t.thread_id FROM chat_threads t \
             JOIN UNNEST($1::uuid[], $2::text[]) AS wanted(user_id, thread_id) \
             ON t.user_id = wanted.user_id AND t.thread_id = wanted.thread_id",
        )
        .bind(user_ids)
        .bind(thread_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(rows
            .into_iter()
            .map(|(user_id, thread_id)| ThreadKey { user_id, thread_id })
            .collect())
    }

    async fn fetch_user_context(&self, user_id: Uuid) -> PortResult<UserContext> {
        let profile = sqlx::query_as::<_, ProfileRecord>(
            "SELECT name, position, goal, custom_fields FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;

        let bosses = sqlx::query_as::<_, BossRecord>(
            "SELECT name, position, department, management_style, working_hours, started_at, \
             custom_fields FROM bosses WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let entries = sqlx::query_as::<_, EntryRecord>(
            "SELECT kind, subtype, title, content, created_at FROM entries \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(CONTEXT_ENTRY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let sent_emails = sqlx::query_as::<_, SentEmailRecord>(
            "SELECT subject, body_markdown, created_at FROM emails \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(CONTEXT_EMAIL_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(UserContext {
            profile: Some(profile.to_domain()),
            bosses: bosses.into_iter().map(|r| r.to_domain()).collect(),
            entries: entries.into_iter().map(|r| r.to_domain()).collect(),
            sent_emails: sent_emails.into_iter().map(|r| r.to_domain()).collect(),
        })
    }

    async fn commit(&self, batch: WriteBatch) -> PortResult<()> {
        if batch.len() > MAX_BATCH_OPERATIONS {
            return Err(PortError::BatchLimitExceeded(MAX_BATCH_OPERATIONS));
        }
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for op in batch.into_ops() {
            // Dropping `tx` on error rolls the whole batch back.
            apply(&mut tx, op).await?;
        }
        tx.commit().await.map_err(unexpected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(count: i32) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            email: Some("a@example.com".to_string()),
            created_at: Utc::now(),
            last_activity_at: None,
            push_permission: Some("GRANTED".to_string()),
            push_token: Some("tok".to_string()),
            email_unsubscribed: false,
            notification_count: count,
            last_notification_sent_at: None,
        }
    }

    #[test]
    fn valid_record_becomes_user() {
        let user = record(3).try_into_domain().unwrap();
        assert_eq!(user.notification_state.count, 3);
        assert_eq!(user.push_permission, PushPermission::Granted);
        assert!(user.last_activity_at.is_none());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let users = valid_users(vec![record(1), record(-2), record(0)]);
        assert_eq!(users.len(), 2);
        assert!(matches!(
            record(-1).try_into_domain(),
            Err(PortError::InvalidRecord(_))
        ));
    }

    #[test]
    fn custom_fields_render_scalars_and_skip_blanks() {
        let fields: Vec<CustomField> = serde_json::from_value(json!([
            {"label": "Team size", "value": 6},
            {"label": "Industry", "value": "Fintech"},
            {"label": "Empty", "value": " "},
            {"label": "Missing"}
        ]))
        .unwrap();
        assert_eq!(
            custom_fields(fields),
            vec![
                ("Team size".to_string(), "6".to_string()),
                ("Industry".to_string(), "Fintech".to_string()),
            ]
        );
    }
}

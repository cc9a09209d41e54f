//! crates/notification_core/src/domain.rs
//!
//! Defines the pure, core data structures for the notification engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Identifier of the conversation thread that proactive chat messages land in
/// when a task does not name one explicitly.
pub const MAIN_THREAD_ID: &str = "main";

//=========================================================================================
// Users
//=========================================================================================

/// Push permission as reported by the user's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPermission {
    Granted,
    Denied,
    NotDetermined,
}

impl PushPermission {
    /// Parses the stored permission string. Anything unknown counts as not determined.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("granted") => Self::Granted,
            Some(v) if v.eq_ignore_ascii_case("denied") => Self::Denied,
            _ => Self::NotDetermined,
        }
    }
}

/// Proactive notification history for one user.
///
/// Only the persistence writer advances this, and only after the matching
/// content write has committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationState {
    pub count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// A user record as read from the store, already validated.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` means the user never logged into the app.
    pub last_activity_at: Option<DateTime<Utc>>,
    pub push_permission: PushPermission,
    pub push_token: Option<String>,
    pub email_unsubscribed: bool,
    pub notification_state: NotificationState,
}

impl User {
    /// The email address, if one is set and not blank.
    pub fn email_address(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    /// The device token, if one is set and not blank.
    pub fn device_token(&self) -> Option<&str> {
        self.push_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

//=========================================================================================
// Categories and channels
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Push => write!(f, "push"),
        }
    }
}

/// The single notification bucket a user falls into for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    EmailOnly,
    NewPush,
    NewEmail,
    ActivePush,
    ActiveEmail,
    InactiveEmail,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::EmailOnly,
        Category::NewPush,
        Category::NewEmail,
        Category::ActivePush,
        Category::ActiveEmail,
        Category::InactiveEmail,
    ];

    pub fn channel(&self) -> Channel {
        match self {
            Category::NewPush | Category::ActivePush => Channel::Push,
            Category::EmailOnly
            | Category::NewEmail
            | Category::ActiveEmail
            | Category::InactiveEmail => Channel::Email,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::EmailOnly => "EMAIL_ONLY",
            Category::NewPush => "NEW_PUSH",
            Category::NewEmail => "NEW_EMAIL",
            Category::ActivePush => "ACTIVE_PUSH",
            Category::ActiveEmail => "ACTIVE_EMAIL",
            Category::InactiveEmail => "INACTIVE_EMAIL",
        }
    }

    /// Which prompt frames the content for this category.
    pub fn prompt_kind(&self) -> PromptKind {
        match self {
            Category::EmailOnly => PromptKind::FirstEmail,
            Category::NewEmail | Category::ActiveEmail => PromptKind::OngoingEmail,
            Category::InactiveEmail => PromptKind::InactiveEmail,
            Category::NewPush => PromptKind::FirstPush,
            Category::ActivePush => PromptKind::OngoingPush,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The prompt family handed to the generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    FirstEmail,
    OngoingEmail,
    InactiveEmail,
    FirstPush,
    OngoingPush,
    OnboardingWelcome,
}

impl PromptKind {
    pub fn channel(&self) -> Channel {
        match self {
            PromptKind::FirstPush | PromptKind::OngoingPush => Channel::Push,
            _ => Channel::Email,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::FirstEmail => "first_email",
            PromptKind::OngoingEmail => "ongoing_email",
            PromptKind::InactiveEmail => "inactive_email",
            PromptKind::FirstPush => "first_push",
            PromptKind::OngoingPush => "ongoing_push",
            PromptKind::OnboardingWelcome => "onboarding_welcome",
        }
    }
}

//=========================================================================================
// Tasks and outcomes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTask {
    pub user_id: Uuid,
    pub address: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTask {
    pub user_id: Uuid,
    pub device_token: String,
    pub category: Category,
    /// `None` targets the main thread.
    pub thread_id: Option<String>,
}

impl PushTask {
    pub fn thread_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(MAIN_THREAD_ID)
    }
}

/// One user's unit of work for a single run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTask {
    Email(EmailTask),
    Push(PushTask),
}

/// Why a classified user could not be turned into a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSkip {
    MissingEmailAddress,
    MissingDeviceToken,
}

impl NotificationTask {
    /// Builds the channel-appropriate task for a classified user.
    pub fn for_category(user: &User, category: Category) -> Result<Self, TaskSkip> {
        match category.channel() {
            Channel::Email => {
                let address = user.email_address().ok_or(TaskSkip::MissingEmailAddress)?;
                Ok(Self::Email(EmailTask {
                    user_id: user.id,
                    address: address.to_string(),
                    category,
                }))
            }
            Channel::Push => {
                let token = user.device_token().ok_or(TaskSkip::MissingDeviceToken)?;
                Ok(Self::Push(PushTask {
                    user_id: user.id,
                    device_token: token.to_string(),
                    category,
                    thread_id: None,
                }))
            }
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Email(t) => t.user_id,
            Self::Push(t) => t.user_id,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Email(t) => t.category,
            Self::Push(t) => t.category,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Push(_) => Channel::Push,
        }
    }
}

/// Raw output of the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    /// Present for email prompts; push prompts leave it empty.
    pub title: Option<String>,
    /// Markdown for email, plain text for push.
    pub body: String,
    /// Chain-of-thought notes. Never sent to the user.
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailPayload {
    pub subject: String,
    pub body_markdown: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Content that is generated and ready to be written, paired with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedNotification {
    Email { task: EmailTask, payload: EmailPayload },
    Push { task: PushTask, payload: ChatPayload },
}

impl PreparedNotification {
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Email { task, .. } => task.user_id,
            Self::Push { task, .. } => task.user_id,
        }
    }

    pub fn task(&self) -> NotificationTask {
        match self {
            Self::Email { task, .. } => NotificationTask::Email(task.clone()),
            Self::Push { task, .. } => NotificationTask::Push(task.clone()),
        }
    }
}

/// A unit that failed, carrying the original task identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub task: NotificationTask,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success(PreparedNotification),
    Failure(FailureRecord),
}

/// A notification whose document has been durably committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredNotification {
    pub user_id: Uuid,
    pub channel: Channel,
    pub category: Category,
    /// Id of the email or chat message document.
    pub document_id: Uuid,
    pub thread_id: Option<String>,
    /// Email subject, or the first characters of a chat message.
    pub preview: String,
}

/// Aggregate result of one channel's batches within a run.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub successful: Vec<DeliveredNotification>,
    pub failed: Vec<FailureRecord>,
    pub total_count: usize,
    /// Chunks whose content committed but whose counter update did not.
    pub counter_update_failures: usize,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Statistics emitted at the end of one orchestration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub total_users: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub pushes_sent: usize,
    pub pushes_failed: usize,
    pub skipped_timing: usize,
    pub skipped_no_channel: usize,
    /// `None` when the sync was skipped or failed.
    pub unsubscribes_synced: Option<usize>,
    pub counter_update_failures: usize,
    pub budget_exceeded: bool,
    pub duration_minutes: f64,
}

//=========================================================================================
// Store documents
//=========================================================================================

/// Identifies one conversation thread of one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub user_id: Uuid,
    pub thread_id: String,
}

/// Delivery state of an email document. Created as `Planned`; the external
/// sender advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailState {
    Planned,
    Sending,
    Sent,
    Failed,
}

impl EmailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailState::Planned => "PLANNED",
            EmailState::Sending => "SENDING",
            EmailState::Sent => "SENT",
            EmailState::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub to: String,
    pub subject: String,
    pub body_markdown: String,
    pub state: EmailState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageDocument {
    pub id: Uuid,
    pub thread: ThreadKey,
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Generation context
//=========================================================================================

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub position: Option<String>,
    pub goal: Option<String>,
    /// Custom onboarding fields as (label, value) pairs.
    pub custom_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct Boss {
    pub name: String,
    pub position: Option<String>,
    pub department: Option<String>,
    pub management_style: Option<String>,
    pub working_hours: Option<String>,
    pub started_at: Option<String>,
    pub custom_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub kind: String,
    pub subtype: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub subject: String,
    pub body_markdown: String,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Everything the generation collaborator gets to know about a user.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub profile: Option<UserProfile>,
    pub bosses: Vec<Boss>,
    /// Most recent first.
    pub entries: Vec<TimelineEntry>,
    /// Most recent first.
    pub sent_emails: Vec<SentEmail>,
}

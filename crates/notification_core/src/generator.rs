//! crates/notification_core/src/generator.rs
//!
//! Turns one notification task into generated, channel-ready content.
//! `ContentGenerator::generate` is total: every error ends up in the returned
//! `GenerationOutcome`, never in the caller.

use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{
    Category, ChatPayload, EmailPayload, EmailTask, FailureRecord, GeneratedContent,
    GenerationOutcome, NotificationTask, PreparedNotification, PromptKind,
};
use crate::ports::{ContentGenerationService, NotificationStore, PortError, PortResult};

/// Chat messages longer than this are cut at a word boundary.
const MAX_PUSH_CHARS: usize = 280;

/// Builds a fresh generation session id: `<prefix>_<user_id>_<8 hex chars>`.
pub fn new_session_id(prefix: &str, user_id: Uuid) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{user_id}_{}", &suffix[..8])
}

/// The call-to-action footer appended to an email of this category.
pub fn email_footer(category: Category) -> Option<&'static str> {
    match category {
        Category::EmailOnly => Some(
            "---\n\nGet the full experience: download the app to keep these conversations going wherever you are.",
        ),
        Category::NewEmail | Category::ActiveEmail => Some(
            "---\n\nTurn on notifications in the app to get tips like this the moment they are ready.",
        ),
        Category::InactiveEmail => Some(
            "---\n\nYou have unread messages waiting for you in the app.",
        ),
        Category::NewPush | Category::ActivePush => None,
    }
}

/// Footer of the reactive onboarding welcome email.
pub const WELCOME_FOOTER: &str =
    "---\n\nDownload the app to start your first conversation and get guidance tailored to you.";

fn markdown_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // [label](url) -> label
            (r"\[([^\]]+)\]\([^)]*\)", "$1"),
            // **bold**, __bold__
            (r"(\*\*|__)(.+?)(\*\*|__)", "$2"),
            // *em*, _em_
            (r"(^|[^\w*])[*_]([^*_\n]+)[*_]", "$1$2"),
            // `code`
            (r"`([^`]*)`", "$1"),
            // # headings, > quotes, - bullets
            (r"(?m)^\s{0,3}(#{1,6}\s+|>\s?|[-*+]\s+)", ""),
            (r"\s+", " "),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, replacement)),
            Err(e) => {
                error!(pattern, error = %e, "Invalid markdown pattern");
                None
            }
        })
        .collect()
    })
}

/// Reduces LLM output to the plain single-paragraph text a push message needs.
pub fn to_plain_text(markdown: &str) -> String {
    let mut text = markdown.to_string();
    for (re, replacement) in markdown_patterns() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    let text = text.trim();
    if text.chars().count() <= MAX_PUSH_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_PUSH_CHARS).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) if idx > MAX_PUSH_CHARS / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end())
}

fn with_footer(body: &str, footer: Option<&str>) -> String {
    match footer {
        Some(footer) => format!("{}\n\n{}", body.trim_end(), footer),
        None => body.trim_end().to_string(),
    }
}

fn email_payload(content: GeneratedContent, footer: Option<&str>) -> PortResult<EmailPayload> {
    let subject = content
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PortError::InvalidRecord("generated email has no subject".to_string()))?;
    if content.body.trim().is_empty() {
        return Err(PortError::InvalidRecord("generated email has no body".to_string()));
    }
    Ok(EmailPayload {
        subject: subject.to_string(),
        body_markdown: with_footer(&content.body, footer),
        created_at: Utc::now(),
    })
}

fn chat_payload(content: GeneratedContent) -> PortResult<ChatPayload> {
    let text = to_plain_text(&content.body);
    if text.is_empty() {
        return Err(PortError::InvalidRecord("generated message is empty".to_string()));
    }
    Ok(ChatPayload {
        text,
        created_at: Utc::now(),
    })
}

/// Per-unit content generation with user validation and full error capture.
#[derive(Clone)]
pub struct ContentGenerator {
    store: Arc<dyn NotificationStore>,
    llm: Arc<dyn ContentGenerationService>,
}

impl ContentGenerator {
    pub fn new(store: Arc<dyn NotificationStore>, llm: Arc<dyn ContentGenerationService>) -> Self {
        Self { store, llm }
    }

    /// Generates content for one task. Never fails; errors become `Failure`.
    pub async fn generate(&self, task: NotificationTask) -> GenerationOutcome {
        let user_id = task.user_id();
        let category = task.category();

        match self.store.get_user(user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return failure(task, "Failed to validate user exists".to_string()),
            Err(e) => {
                return failure(task, format!("Failed to validate user exists: {e}"));
            }
        }

        let prefix = format!("notification_{}", category.as_str().to_lowercase());
        let session_id = new_session_id(&prefix, user_id);
        let content = match self.request(user_id, category.prompt_kind(), &session_id).await {
            Ok(content) => content,
            Err(e) => return failure(task, format!("Failed to generate AI content: {e}")),
        };

        let prepared = match &task {
            NotificationTask::Email(email) => email_payload(content, email_footer(category))
                .map(|payload| PreparedNotification::Email {
                    task: email.clone(),
                    payload,
                }),
            NotificationTask::Push(push) => {
                chat_payload(content).map(|payload| PreparedNotification::Push {
                    task: push.clone(),
                    payload,
                })
            }
        };

        match prepared {
            Ok(prepared) => {
                info!(%user_id, %category, "Generated notification content");
                GenerationOutcome::Success(prepared)
            }
            Err(e) => failure(task, format!("Failed to generate AI content: {e}")),
        }
    }

    /// Generates the onboarding welcome email for a user who just signed up.
    pub async fn generate_welcome(&self, task: &EmailTask) -> PortResult<EmailPayload> {
        let session_id = new_session_id("onboarding", task.user_id);
        let content = self
            .request(task.user_id, PromptKind::OnboardingWelcome, &session_id)
            .await?;
        email_payload(content, Some(WELCOME_FOOTER))
    }

    async fn request(
        &self,
        user_id: Uuid,
        kind: PromptKind,
        session_id: &str,
    ) -> PortResult<GeneratedContent> {
        let context = self.store.fetch_user_context(user_id).await?;
        self.llm
            .generate_content(user_id, &context, kind, session_id)
            .await
    }
}

fn failure(task: NotificationTask, error_message: String) -> GenerationOutcome {
    error!(
        target: "alerts",
        user_id = %task.user_id(),
        category = %task.category(),
        error = %error_message,
        "Notification generation failed"
    );
    GenerationOutcome::Failure(FailureRecord {
        task,
        error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{email_user, push_user, FakeStore, Script, ScriptedGenerator};

    fn generator(store: Arc<FakeStore>, llm: Arc<ScriptedGenerator>) -> ContentGenerator {
        ContentGenerator::new(store, llm)
    }

    #[test]
    fn session_ids_are_prefixed_and_unique() {
        let user_id = Uuid::new_v4();
        let a = new_session_id("onboarding", user_id);
        let b = new_session_id("onboarding", user_id);
        assert!(a.starts_with(&format!("onboarding_{user_id}_")));
        assert_eq!(a.len(), format!("onboarding_{user_id}_").len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn plain_text_strips_markdown() {
        let text = to_plain_text("## Quick tip\n\n**Ask** your boss about _scope_ and see [the guide](https://x.y).\n- `now`");
        assert_eq!(text, "Quick tip Ask your boss about scope and see the guide. now");
    }

    #[test]
    fn plain_text_truncates_long_messages() {
        let long = "word ".repeat(200);
        let text = to_plain_text(&long);
        assert!(text.chars().count() <= MAX_PUSH_CHARS + 1);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn only_email_categories_carry_a_footer() {
        for category in Category::ALL {
            assert_eq!(
                email_footer(category).is_some(),
                category.channel() == crate::domain::Channel::Email
            );
        }
        assert!(email_footer(Category::InactiveEmail)
            .is_some_and(|f| f.contains("unread messages")));
    }

    #[tokio::test]
    async fn email_success_carries_subject_and_footer() {
        let now = Utc::now();
        let user = email_user(now);
        let store = Arc::new(FakeStore::with_users([user.clone()]));
        let llm = Arc::new(ScriptedGenerator::default());
        let task = NotificationTask::for_category(&user, Category::NewEmail).unwrap();

        let outcome = generator(store, llm.clone()).generate(task).await;

        let GenerationOutcome::Success(PreparedNotification::Email { task, payload }) = outcome else {
            panic!("expected an email success, got {outcome:?}");
        };
        assert_eq!(task.user_id, user.id);
        assert_eq!(payload.subject, format!("Subject for {}", user.id));
        assert!(payload.body_markdown.starts_with(&format!("Hello {}", user.id)));
        assert!(payload.body_markdown.ends_with(email_footer(Category::NewEmail).unwrap()));

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, PromptKind::OngoingEmail);
        assert!(calls[0].2.starts_with(&format!("notification_new_email_{}_", user.id)));
    }

    #[tokio::test]
    async fn push_success_is_plain_text() {
        let now = Utc::now();
        let user = push_user(now);
        let store = Arc::new(FakeStore::with_users([user.clone()]));
        let llm = Arc::new(ScriptedGenerator::default());
        let task = NotificationTask::for_category(&user, Category::ActivePush).unwrap();

        let outcome = generator(store, llm).generate(task).await;

        let GenerationOutcome::Success(PreparedNotification::Push { payload, .. }) = outcome else {
            panic!("expected a push success, got {outcome:?}");
        };
        assert_eq!(payload.text, format!("Hey there, quick question for {}?", user.id));
    }

    #[tokio::test]
    async fn missing_user_is_a_failure() {
        let now = Utc::now();
        let user = email_user(now);
        let store = Arc::new(FakeStore::default());
        let llm = Arc::new(ScriptedGenerator::default());
        let task = NotificationTask::for_category(&user, Category::ActiveEmail).unwrap();

        let outcome = generator(store, llm.clone()).generate(task.clone()).await;

        assert_eq!(
            outcome,
            GenerationOutcome::Failure(FailureRecord {
                task,
                error_message: "Failed to validate user exists".to_string(),
            })
        );
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn llm_error_is_captured() {
        let now = Utc::now();
        let user = email_user(now);
        let store = Arc::new(FakeStore::with_users([user.clone()]));
        let llm = Arc::new(ScriptedGenerator::default());
        llm.script(user.id, Script::Fail("rate limited".to_string()));
        let task = NotificationTask::for_category(&user, Category::ActiveEmail).unwrap();

        let GenerationOutcome::Failure(record) = generator(store, llm).generate(task).await else {
            panic!("expected a failure");
        };
        assert_eq!(record.task.user_id(), user.id);
        assert!(record.error_message.starts_with("Failed to generate AI content"));
        assert!(record.error_message.contains("rate limited"));
    }

    #[tokio::test]
    async fn email_without_subject_is_a_failure() {
        let now = Utc::now();
        let user = email_user(now);
        let store = Arc::new(FakeStore::with_users([user.clone()]));
        let llm = Arc::new(ScriptedGenerator::default());
        llm.script(
            user.id,
            Script::Reply(GeneratedContent {
                title: Some("  ".to_string()),
                body: "Body".to_string(),
                reasoning: String::new(),
            }),
        );
        let task = NotificationTask::for_category(&user, Category::EmailOnly).unwrap();

        let outcome = generator(store, llm).generate(task).await;
        assert!(matches!(outcome, GenerationOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn welcome_uses_onboarding_prompt() {
        let now = Utc::now();
        let user = email_user(now);
        let store = Arc::new(FakeStore::with_users([user.clone()]));
        let llm = Arc::new(ScriptedGenerator::default());
        let task = EmailTask {
            user_id: user.id,
            address: user.email.clone().unwrap(),
            category: Category::EmailOnly,
        };

        let payload = generator(store, llm.clone()).generate_welcome(&task).await.unwrap();

        assert!(payload.body_markdown.ends_with(WELCOME_FOOTER));
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[0].1, PromptKind::OnboardingWelcome);
        assert!(calls[0].2.starts_with(&format!("onboarding_{}_", user.id)));
    }
}

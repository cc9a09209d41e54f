//! services/orchestrator/src/adapters/content_llm.rs
//!
//! This module contains the adapter for the notification-writing LLM.
//! It implements the `ContentGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use notification_core::{
    domain::{Channel, GeneratedContent, PromptKind, UserContext},
    ports::{ContentGenerationService, PortError, PortResult},
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: usize = 3;

const COACH_PERSONA: &str = "You are an AI career coach who helps professionals navigate the relationship with their boss and grow in their career. You write like a thoughtful mentor: warm, specific and practical. Never invent facts about the user that are not in their context.";

const EMAIL_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"reasoning": "<your private chain of thought, never shown to the user>", "title": "<plain text email subject, no markup>", "body": "<email body in Markdown>"}
Keep the body under 250 words. Do not add a signature or a call to action; one is appended for you."#;

const PUSH_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"reasoning": "<your private chain of thought, never shown to the user>", "message": "<plain text chat message, no markup, at most two sentences>"}"#;

fn scenario(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::FirstEmail => "This is the FIRST email this user receives. They signed up but have never opened the app. Show that you understood their situation from onboarding, give one concrete piece of advice, and make them curious to continue the conversation in the app.",
        PromptKind::OngoingEmail => "This is a follow-up email. Build on their recent timeline entries and earlier emails, do not repeat topics you already covered, and give one timely, actionable insight.",
        PromptKind::InactiveEmail => "The user has not opened the app for a while and has unread messages waiting there. Offer one valuable piece of career advice grounded in their context and gently remind them that a conversation is waiting for them. Never guilt-trip.",
        PromptKind::FirstPush => "This is the FIRST chat message the coach sends to this user. Greet them by name if known and ask one specific, easy-to-answer question about their boss or goal.",
        PromptKind::OngoingPush => "This is a proactive follow-up chat message. Reference something recent from their timeline and ask one short question that invites a reply.",
        PromptKind::OnboardingWelcome => "The user just completed onboarding on the web. Write their welcome email: thank them, reflect back what you learned about their boss and goal, and give a first quick win they can try this week.",
    }
}

/// Builds the system instructions for one prompt kind.
pub fn system_prompt(kind: PromptKind) -> String {
    let format = match kind.channel() {
        Channel::Email => EMAIL_FORMAT,
        Channel::Push => PUSH_FORMAT,
    };
    format!("{COACH_PERSONA}\n\n{}\n\n{format}", scenario(kind))
}

/// Builds the user message carrying the rendered context.
pub fn user_prompt(context: &UserContext) -> String {
    let text = context.to_prompt_text();
    if text.is_empty() {
        "USER CONTEXT:\n(no onboarding data available)".to_string()
    } else {
        format!("USER CONTEXT:\n{text}")
    }
}

//=========================================================================================
// Response Parsing
//=========================================================================================

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    reasoning: String,
    title: Option<String>,
    body: Option<String>,
    message: Option<String>,
}

/// Cuts the outermost JSON object out of a reply that may be wrapped in prose or
/// a code fence.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

/// Parses and validates a model reply for the given prompt kind.
pub fn parse_reply(reply: &str, kind: PromptKind) -> Result<GeneratedContent, String> {
    let json = json_object(reply).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let raw: RawContent =
        serde_json::from_str(json).map_err(|e| format!("reply is not valid JSON: {e}"))?;

    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    match kind.channel() {
        Channel::Email => {
            let title = non_empty(raw.title).ok_or("field 'title' is missing or empty")?;
            let body = non_empty(raw.body).ok_or("field 'body' is missing or empty")?;
            Ok(GeneratedContent {
                title: Some(title),
                body,
                reasoning: raw.reasoning,
            })
        }
        Channel::Push => {
            let message = non_empty(raw.message)
                .or_else(|| non_empty(raw.body))
                .ok_or("field 'message' is missing or empty")?;
            Ok(GeneratedContent {
                title: None,
                body: message,
                reasoning: raw.reasoning,
            })
        }
    }
    .map_err(|e: &str| e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ContentGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiContentAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiContentAdapter {
    /// Creates a new `OpenAiContentAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .temperature(0.7)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Content LLM returned no text content.".to_string())
            })
    }
}

fn system_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

fn user_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

fn assistant_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

//=========================================================================================
// `ContentGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ContentGenerationService for OpenAiContentAdapter {
    /// Generates notification content, retrying with corrective feedback when the
    /// call fails or the reply does not match the expected shape.
    async fn generate_content(
        &self,
        user_id: Uuid,
        context: &UserContext,
        kind: PromptKind,
        session_id: &str,
    ) -> PortResult<GeneratedContent> {
        let mut messages = vec![
            system_message(system_prompt(kind))?,
            user_message(user_prompt(context))?,
        ];

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let (reply, error) = match self.complete(messages.clone()).await {
                Ok(reply) => match parse_reply(&reply, kind) {
                    Ok(content) => {
                        info!(%user_id, session_id, kind = kind.as_str(), attempt, "Content generated");
                        return Ok(content);
                    }
                    Err(e) => (Some(reply), e),
                },
                Err(e) => (None, e.to_string()),
            };

            warn!(
                %user_id,
                session_id,
                kind = kind.as_str(),
                attempt,
                error = %error,
                "Content generation attempt failed"
            );
            if attempt < MAX_ATTEMPTS {
                if let Some(reply) = reply {
                    messages.push(assistant_message(reply)?);
                }
                messages.push(user_message(format!(
                    "Previous attempt failed with error: {error}. Please provide a valid response matching the required JSON format."
                ))?);
            }
            last_error = error;
        }

        Err(PortError::Unexpected(format!(
            "Content generation failed after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

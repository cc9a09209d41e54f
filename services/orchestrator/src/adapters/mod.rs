pub mod content_llm;
pub mod db;
pub mod mailgun;

pub use content_llm::OpenAiContentAdapter;
pub use db::DbAdapter;
pub use mailgun::MailgunUnsubscribeAdapter;

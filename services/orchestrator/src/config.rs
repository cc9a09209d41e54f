//! services/orchestrator/src/config.rs
//!
//! Defines the service's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use notification_core::config::{ChannelLimits, ClassifierPolicy, EngineConfig};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials of the mailing provider's suppression API.
#[derive(Clone, Debug)]
pub struct MailgunConfig {
    pub api_key: String,
    pub domain: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub generation_model: String,
    /// `None` disables the unsubscribe sync.
    pub mailgun: Option<MailgunConfig>,
    /// Bearer token required on trigger routes, when set.
    pub trigger_token: Option<String>,
    pub engine: EngineConfig,
}

const DEFAULT_MAILGUN_DOMAIN: &str = "mailgun.services.ozma.io";
const MAX_DAYS: i64 = 3650;
const MAX_BUDGET_MINUTES: u64 = 24 * 60;

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(
            &lookup,
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Collaborators ---
        let openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        let generation_model =
            lookup("GENERATION_MODEL").unwrap_or_else(|| "gpt-4o".to_string());

        let mailgun = lookup("MAILGUN_API_KEY")
            .filter(|k| !k.is_empty())
            .map(|api_key| MailgunConfig {
                api_key,
                domain: lookup("MAILGUN_DOMAIN")
                    .unwrap_or_else(|| DEFAULT_MAILGUN_DOMAIN.to_string()),
            });

        let trigger_token = lookup("TRIGGER_TOKEN").filter(|t| !t.is_empty());

        // --- Engine Tunables ---
        let defaults = EngineConfig::default();
        let classifier = ClassifierPolicy {
            new_user_window_days: parse_in_range(
                &lookup,
                "NEW_USER_WINDOW_DAYS",
                defaults.classifier.new_user_window_days,
                1..=MAX_DAYS,
            )?,
            inactive_after_days: parse_in_range(
                &lookup,
                "INACTIVE_AFTER_DAYS",
                defaults.classifier.inactive_after_days,
                1..=MAX_DAYS,
            )?,
            push_requires_recent_activity: parse_or(
                &lookup,
                "PUSH_REQUIRES_RECENT_ACTIVITY",
                defaults.classifier.push_requires_recent_activity,
            )?,
            push_recent_activity_days: parse_in_range(
                &lookup,
                "PUSH_RECENT_ACTIVITY_DAYS",
                defaults.classifier.push_recent_activity_days,
                1..=MAX_DAYS,
            )?,
        };
        let email = ChannelLimits {
            batch_size: parse_positive(&lookup, "EMAIL_BATCH_SIZE", defaults.email.batch_size)?,
            max_workers: parse_positive(&lookup, "EMAIL_MAX_WORKERS", defaults.email.max_workers)?,
            write_chunk_size: parse_positive(
                &lookup,
                "EMAIL_WRITE_CHUNK",
                defaults.email.write_chunk_size,
            )?,
        };
        let push = ChannelLimits {
            batch_size: parse_positive(&lookup, "PUSH_BATCH_SIZE", defaults.push.batch_size)?,
            max_workers: parse_positive(&lookup, "PUSH_MAX_WORKERS", defaults.push.max_workers)?,
            write_chunk_size: parse_positive(
                &lookup,
                "PUSH_WRITE_CHUNK",
                defaults.push.write_chunk_size,
            )?,
        };
        let scheduled_minutes: u64 =
            parse_in_range(&lookup, "SCHEDULED_BUDGET_MINUTES", 20, 1..=MAX_BUDGET_MINUTES)?;
        let reactive_minutes: u64 =
            parse_in_range(&lookup, "REACTIVE_BUDGET_MINUTES", 9, 1..=MAX_BUDGET_MINUTES)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            generation_model,
            mailgun,
            trigger_token,
            engine: EngineConfig {
                classifier,
                email,
                push,
                scheduled_budget: Duration::from_secs(scheduled_minutes * 60),
                reactive_budget: Duration::from_secs(reactive_minutes * 60),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

fn parse_in_range<F, T>(
    lookup: &F,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, name, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("must be between {} and {}", range.start(), range.end()),
        ));
    }
    Ok(value)
}

fn parse_positive<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

//! crates/notification_core/src/context.rs
//!
//! Renders a `UserContext` as the plain-text briefing handed to the LLM.

use std::fmt::Write;

use crate::domain::UserContext;

const NOT_SET: &str = "Not set";

fn or_not_set(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.trim().is_empty()).unwrap_or(NOT_SET)
}

impl UserContext {
    /// Formats the context as markdown-ish sections: profile, bosses,
    /// recent timeline entries and previously sent emails.
    /// Empty sections are left out.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();

        if let Some(profile) = &self.profile {
            let _ = writeln!(out, "## User Profile");
            let _ = writeln!(out, "Name: {}", or_not_set(&profile.name));
            let _ = writeln!(out, "Position: {}", or_not_set(&profile.position));
            let _ = writeln!(out, "Goal: {}", or_not_set(&profile.goal));
            if !profile.custom_fields.is_empty() {
                let _ = writeln!(out, "\n### Custom Profile Fields");
                for (label, value) in &profile.custom_fields {
                    let _ = writeln!(out, "{label}: {value}");
                }
            }
        }

        if !self.bosses.is_empty() {
            let _ = writeln!(out, "\n## Bosses");
            for boss in &self.bosses {
                let _ = writeln!(out, "\n### Boss: {}", boss.name);
                let _ = writeln!(out, "Position: {}", or_not_set(&boss.position));
                let _ = writeln!(out, "Department: {}", or_not_set(&boss.department));
                let _ = writeln!(out, "Management Style: {}", or_not_set(&boss.management_style));
                let _ = writeln!(out, "Working Hours: {}", or_not_set(&boss.working_hours));
                let _ = writeln!(out, "Started At: {}", or_not_set(&boss.started_at));
                if !boss.custom_fields.is_empty() {
                    let _ = writeln!(out, "\n#### Custom Boss Fields");
                    for (label, value) in &boss.custom_fields {
                        let _ = writeln!(out, "{label}: {value}");
                    }
                }
            }
        }

        if !self.entries.is_empty() {
            let _ = writeln!(out, "\n## Timeline Entries (Recent)");
            for entry in &self.entries {
                let kind = match (entry.kind.as_str(), entry.subtype.as_deref()) {
                    ("note", Some(sub)) if !sub.is_empty() => format!("Note ({sub})"),
                    ("note", _) => "Note".to_string(),
                    (other, _) => other.to_string(),
                };
                let _ = writeln!(
                    out,
                    "- [{}] {}: {}",
                    entry.timestamp.to_rfc3339(),
                    kind,
                    entry.title
                );
                if let Some(content) = entry.content.as_deref().filter(|c| !c.is_empty()) {
                    let _ = writeln!(out, "  Content: {content}");
                }
            }
        }

        if !self.sent_emails.is_empty() {
            let _ = writeln!(out, "\n## Previous Email Notifications Sent to User");
            for email in &self.sent_emails {
                let sent_at = email
                    .sent_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "Unknown time".to_string());
                let _ = writeln!(out, "\n### Email sent at {sent_at}");
                let _ = writeln!(out, "Subject: {}", email.subject);
                let _ = writeln!(out, "Body:\n{}", email.body_markdown);
            }
        }

        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{Boss, TimelineEntry, UserContext, UserProfile};
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_context_renders_nothing() {
        assert_eq!(UserContext::default().to_prompt_text(), "");
    }

    #[test]
    fn renders_profile_bosses_and_entries() {
        let context = UserContext {
            profile: Some(UserProfile {
                name: Some("Sarah".to_string()),
                position: None,
                goal: Some("Get promoted".to_string()),
                custom_fields: vec![("Team size".to_string(), "6".to_string())],
            }),
            bosses: vec![Boss {
                name: "Alex".to_string(),
                management_style: Some("Hands-off".to_string()),
                ..Boss::default()
            }],
            entries: vec![TimelineEntry {
                kind: "note".to_string(),
                subtype: Some("1on1".to_string()),
                title: "Weekly sync".to_string(),
                content: Some("Talked about scope".to_string()),
                timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap(),
            }],
            sent_emails: vec![],
        };

        let text = context.to_prompt_text();
        assert!(text.starts_with("## User Profile"));
        assert!(text.contains("Name: Sarah"));
        assert!(text.contains("Position: Not set"));
        assert!(text.contains("Team size: 6"));
        assert!(text.contains("### Boss: Alex"));
        assert!(text.contains("Management Style: Hands-off"));
        assert!(text.contains("Note (1on1): Weekly sync"));
        assert!(text.contains("  Content: Talked about scope"));
        assert!(!text.contains("Previous Email Notifications"));
    }
}

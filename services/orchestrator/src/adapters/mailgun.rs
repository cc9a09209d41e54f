//! services/orchestrator/src/adapters/mailgun.rs
//!
//! Reads the mailing provider's suppression list. Implements the
//! `UnsubscribeSource` port from the `core` crate.

use async_trait::async_trait;
use notification_core::ports::{PortError, PortResult, UnsubscribeSource};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

const API_BASE: &str = "https://api.mailgun.net/v3";
const PAGE_LIMIT: u32 = 1000;
const MAX_PAGES: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of the `/unsubscribes` listing.
#[derive(Debug, Default, Deserialize)]
pub struct UnsubscribePage {
    #[serde(default)]
    pub items: Vec<UnsubscribeItem>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeItem {
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    pub next: Option<String>,
}

/// Decides which URL to fetch after a page, or `None` to stop.
///
/// Pagination ends on an empty page, a missing or repeated `next` link, or
/// once `MAX_PAGES` pages were read.
fn next_url(page: &UnsubscribePage, current: &str, pages_read: usize) -> Option<String> {
    if page.items.is_empty() {
        return None;
    }
    if pages_read >= MAX_PAGES {
        error!(target: "alerts", pages_read, "Too many unsubscribe pages, stopping pagination");
        return None;
    }
    page.paging
        .next
        .as_deref()
        .filter(|next| !next.is_empty() && *next != current)
        .map(str::to_string)
}

/// An adapter that implements `UnsubscribeSource` against the Mailgun API.
#[derive(Clone)]
pub struct MailgunUnsubscribeAdapter {
    client: reqwest::Client,
    api_key: String,
    domain: String,
}

impl MailgunUnsubscribeAdapter {
    /// Creates a new adapter for one sending domain.
    pub fn new(api_key: String, domain: String) -> PortResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            domain,
        })
    }

    async fn fetch_page(&self, url: &str) -> PortResult<UnsubscribePage> {
        let response = self
            .client
            .get(url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Mailgun request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Failed to fetch Mailgun unsubscribes");
            return Err(PortError::Unexpected(format!(
                "Mailgun API returned status {}",
                status.as_u16()
            )));
        }

        response
            .json::<UnsubscribePage>()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed Mailgun response: {e}")))
    }
}

#[async_trait]
impl UnsubscribeSource for MailgunUnsubscribeAdapter {
    async fn fetch_unsubscribed(&self) -> PortResult<Vec<String>> {
        let mut url = format!(
            "{API_BASE}/{}/unsubscribes?limit={PAGE_LIMIT}",
            self.domain
        );
        let mut addresses = Vec::new();
        let mut pages_read = 0;

        loop {
            let page = self.fetch_page(&url).await?;
            pages_read += 1;
            addresses.extend(page.items.iter().filter_map(|item| item.address.clone()));

            match next_url(&page, &url, pages_read) {
                Some(next) => url = next,
                None => break,
            }
        }

        info!(
            domain = %self.domain,
            pages = pages_read,
            count = addresses.len(),
            "Fetched Mailgun unsubscribes"
        );
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> UnsubscribePage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn page_is_parsed_and_items_without_address_are_tolerated() {
        let parsed = page(
            r#"{"items": [{"address": "a@x.io", "tags": ["*"]}, {"created_at": "now"}],
                "paging": {"next": "https://api/next", "first": "https://api/first"}}"#,
        );
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].address.as_deref(), Some("a@x.io"));
        assert!(parsed.items[1].address.is_none());
        assert_eq!(parsed.paging.next.as_deref(), Some("https://api/next"));
    }

    #[test]
    fn pagination_follows_next_link() {
        let parsed = page(r#"{"items": [{"address": "a@x.io"}], "paging": {"next": "u2"}}"#);
        assert_eq!(next_url(&parsed, "u1", 1).as_deref(), Some("u2"));
    }

    #[test]
    fn pagination_stops() {
        let empty = page(r#"{"items": [], "paging": {"next": "u2"}}"#);
        assert_eq!(next_url(&empty, "u1", 1), None);

        let repeated = page(r#"{"items": [{"address": "a@x.io"}], "paging": {"next": "u1"}}"#);
        assert_eq!(next_url(&repeated, "u1", 1), None);

        let no_next = page(r#"{"items": [{"address": "a@x.io"}]}"#);
        assert_eq!(next_url(&no_next, "u1", 1), None);

        let full = page(r#"{"items": [{"address": "a@x.io"}], "paging": {"next": "u2"}}"#);
        assert_eq!(next_url(&full, "u1", MAX_PAGES), None);
    }
}

//! Reader API client.
//!
//! Pages the reading-history list endpoint across the three locations
//! (`new`, `later`, `archive`) with cursor-based pagination, honoring
//! `Retry-After` on HTTP 429 and validating that responses are JSON
//! before parsing. Documents appearing in more than one location are
//! deduplicated by identifier across the whole run.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::models::ReaderDoc;

/// Locations paged during a sync, in order.
pub const LOCATIONS: &[&str] = &["new", "later", "archive"];

const DEFAULT_BASE_URL: &str = "https://readwise.io/api/v3/list/";

/// Seconds to wait on a 429 that carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<ReaderDoc>,
    #[serde(default, rename = "nextPageCursor")]
    next_page_cursor: Option<String>,
}

pub struct ReaderClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ReaderClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    /// Point the client at a different list endpoint (tests, proxies).
    pub fn with_base_url(token: String, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token,
            base_url,
        })
    }

    /// Fetch every document across all locations, requesting HTML content.
    ///
    /// `updated_after` (ISO-8601) switches the listing to incremental mode.
    /// Rate limiting is retried in place; any other non-2xx fails the sync.
    pub async fn fetch_all(&self, updated_after: Option<&str>) -> Result<Vec<ReaderDoc>> {
        let mut docs: Vec<ReaderDoc> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for location in LOCATIONS {
            let mut cursor: Option<String> = None;

            loop {
                let mut query: Vec<(&str, String)> = vec![
                    ("withHtmlContent", "true".to_string()),
                    ("location", location.to_string()),
                ];
                if let Some(after) = updated_after {
                    query.push(("updatedAfter", after.to_string()));
                }
                if let Some(ref c) = cursor {
                    query.push(("pageCursor", c.clone()));
                }

                let response = self
                    .client
                    .get(&self.base_url)
                    .header("Authorization", format!("Token {}", self.token))
                    .query(&query)
                    .send()
                    .await
                    .with_context(|| format!("reader API request failed (location {})", location))?;

                let status = response.status();

                if status.as_u16() == 429 {
                    let wait = retry_after_secs(
                        response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok()),
                    );
                    eprintln!(
                        "warning: reader API rate limited, retrying in {}s",
                        wait
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }

                if status.as_u16() == 401 {
                    bail!("reader API rejected the token (HTTP 401)");
                }

                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    bail!("reader API error {}: {}", status, body);
                }

                let content_type = response
                    .headers()
                    .get("Content-Type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                if !content_type.contains("application/json") {
                    bail!(
                        "reader API returned unexpected content-type: {}",
                        content_type
                    );
                }

                let page: ListResponse = response
                    .json()
                    .await
                    .with_context(|| "failed to parse reader API response")?;

                for doc in page.results {
                    if seen.insert(doc.id.clone()) {
                        docs.push(doc);
                    }
                }

                match page.next_page_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }

        Ok(docs)
    }
}

fn retry_after_secs(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

//! External tweets provider.
//!
//! [`TweetsProvider`] is the seam the sync pipeline pages through.
//! [`XApiProvider`] implements it against the X API v2 bookmarks endpoint.

use crate::config::ProviderConfig;
use crate::error::{ProviderError, RateLimitInfo, Result, ShelfError};
use crate::model::{Credential, NewTweet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Largest page the bookmarks endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of provider records.
#[derive(Debug, Clone, Default)]
pub struct TweetPage {
    pub records: Vec<NewTweet>,
    pub next_cursor: Option<String>,
    pub count: usize,
}

impl TweetPage {
    #[must_use]
    pub fn new(records: Vec<NewTweet>, next_cursor: Option<String>) -> Self {
        let count = records.len();
        Self {
            records,
            next_cursor,
            count,
        }
    }
}

/// Source of a user's saved tweets, one page at a time.
#[async_trait]
pub trait TweetsProvider: Send + Sync {
    /// Fetch the page after `cursor` (the first page when `None`).
    ///
    /// # Errors
    ///
    /// A [`ProviderError`] classified by HTTP status, with rate-limit hints
    /// when the provider sent them.
    async fn fetch_page(
        &self,
        credential: &Credential,
        cursor: Option<&str>,
        page_size: u32,
    ) -> std::result::Result<TweetPage, ProviderError>;
}

// =============================================================================
// X API v2
// =============================================================================

#[derive(Debug, Deserialize)]
struct BookmarksResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    public_metrics: PublicMetrics,
    attachments: Option<Attachments>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: i64,
    #[serde(default)]
    reply_count: i64,
    #[serde(default)]
    like_count: i64,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: String,
    url: Option<String>,
    preview_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    title: Option<String>,
    detail: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    message: Option<String>,
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn rate_limit_info(headers: &HeaderMap) -> RateLimitInfo {
    RateLimitInfo {
        reset: header_value(headers, "x-rate-limit-reset"),
        remaining: header_value(headers, "x-rate-limit-remaining"),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .detail
                .or(parsed.title)
                .or_else(|| parsed.errors.into_iter().find_map(|e| e.message))
        })
        .unwrap_or_else(|| "unknown provider error".to_string())
}

impl BookmarksResponse {
    fn into_page(self) -> TweetPage {
        let authors: HashMap<&str, &ApiUser> = self
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u))
            .collect();
        let media: HashMap<&str, &str> = self
            .includes
            .media
            .iter()
            .filter_map(|m| {
                m.url
                    .as_deref()
                    .or(m.preview_image_url.as_deref())
                    .map(|url| (m.media_key.as_str(), url))
            })
            .collect();

        let records = self
            .data
            .iter()
            .map(|tweet| {
                let author = tweet
                    .author_id
                    .as_deref()
                    .and_then(|id| authors.get(id).copied());
                let media_urls = tweet
                    .attachments
                    .as_ref()
                    .map(|a| {
                        a.media_keys
                            .iter()
                            .filter_map(|key| media.get(key.as_str()).map(|u| (*u).to_string()))
                            .collect()
                    })
                    .unwrap_or_default();

                NewTweet {
                    tweet_id: tweet.id.clone(),
                    content: tweet.text.clone(),
                    author_id: tweet.author_id.clone(),
                    author_username: author.map(|a| a.username.clone()),
                    author_name: author.and_then(|a| a.name.clone()),
                    created_at_twitter: tweet.created_at,
                    reply_count: tweet.public_metrics.reply_count,
                    like_count: tweet.public_metrics.like_count,
                    retweet_count: tweet.public_metrics.retweet_count,
                    media_urls,
                    ..NewTweet::default()
                }
            })
            .collect();

        TweetPage::new(records, self.meta.next_token)
    }
}

/// `reqwest` client for `GET /2/users/{id}/bookmarks`.
pub struct XApiProvider {
    client: reqwest::Client,
    api_base: String,
}

impl XApiProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tweetshelf/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShelfError::with_context("failed to build provider client", e))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(config.api_base.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl TweetsProvider for XApiProvider {
    async fn fetch_page(
        &self,
        credential: &Credential,
        cursor: Option<&str>,
        page_size: u32,
    ) -> std::result::Result<TweetPage, ProviderError> {
        let url = format!("{}/2/users/{}/bookmarks", self.api_base, credential.account_id);
        let max_results = page_size.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("max_results", max_results.as_str()),
            ("tweet.fields", "created_at,public_metrics,author_id,attachments"),
            ("expansions", "author_id,attachments.media_keys"),
            ("user.fields", "username,name"),
            ("media.fields", "url,preview_image_url"),
        ];
        if let Some(token) = cursor {
            query.push(("pagination_token", token));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::transient(None, format!("connection failed: {e}")))?;

        let status = response.status();
        let limits = rate_limit_info(response.headers());
        debug!(
            status = status.as_u16(),
            remaining = ?limits.remaining,
            reset = ?limits.reset,
            "Provider response"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                status.as_u16(),
                error_message(&body),
                limits,
            ));
        }

        let parsed: BookmarksResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(Some(status.as_u16()), format!("invalid response body: {e}")))?;
        Ok(parsed.into_page())
    }
}

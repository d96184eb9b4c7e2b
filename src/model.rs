//! Data models for archived tweets, categories and sync bookkeeping.
//!
//! These structures mirror the rows stored in `SQLite` plus the transient
//! values produced by the classifiers and the provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the fallback category every user owns.
pub const GENERAL_CATEGORY: &str = "General";

/// Color given to categories created without one.
pub const DEFAULT_CATEGORY_COLOR: &str = "#6B7280";

/// Categories created for every new user: (name, description, color).
/// The first entry is the default category.
pub const DEFAULT_CATEGORIES: [(&str, &str, &str); 5] = [
    (GENERAL_CATEGORY, "Tweets without a more specific topic", "#6B7280"),
    ("Technology", "Programming, software and gadgets", "#3B82F6"),
    ("News", "Current events and breaking news", "#EF4444"),
    ("Education", "Courses, tutorials and learning material", "#10B981"),
    ("Inspiration", "Quotes, motivation and personal growth", "#F59E0B"),
];

/// Suggested display colors: (label, hex).
pub const CATEGORY_PALETTE: [(&str, &str); 10] = [
    ("Blue", "#3B82F6"),
    ("Green", "#10B981"),
    ("Red", "#EF4444"),
    ("Yellow", "#F59E0B"),
    ("Purple", "#8B5CF6"),
    ("Pink", "#EC4899"),
    ("Indigo", "#6366F1"),
    ("Gray", "#6B7280"),
    ("Orange", "#F97316"),
    ("Teal", "#14B8A6"),
];

/// Sort key for tweet listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TweetSort {
    #[default]
    BookmarkedAt,
    CreatedAt,
    LikeCount,
}

impl TweetSort {
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::BookmarkedAt => "t.bookmarked_at",
            Self::CreatedAt => "t.created_at_twitter",
            Self::LikeCount => "t.like_count",
        }
    }
}

/// An archived tweet owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub tweet_id: String,
    pub user_id: i64,
    pub content: String,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub author_name: Option<String>,
    pub created_at_twitter: Option<DateTime<Utc>>,
    pub bookmarked_at: DateTime<Utc>,
    pub reply_count: i64,
    pub like_count: i64,
    pub retweet_count: i64,
    /// Serialized JSON arrays; `None` when the list was empty at ingestion.
    pub media_urls_json: Option<String>,
    pub hashtags_json: Option<String>,
    pub mentions_json: Option<String>,
    pub category: Option<String>,
    pub is_archived: bool,
}

impl Tweet {
    #[must_use]
    pub fn media_urls(&self) -> Vec<String> {
        parse_json_list(self.media_urls_json.as_deref())
    }

    #[must_use]
    pub fn hashtags(&self) -> Vec<String> {
        parse_json_list(self.hashtags_json.as_deref())
    }

    #[must_use]
    pub fn mentions(&self) -> Vec<String> {
        parse_json_list(self.mentions_json.as_deref())
    }
}

fn parse_json_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// A normalized record coming from the provider or the extension importer,
/// not yet persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTweet {
    pub tweet_id: String,
    pub content: String,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub author_name: Option<String>,
    pub created_at_twitter: Option<DateTime<Utc>>,
    pub bookmarked_at: Option<DateTime<Utc>>,
    pub reply_count: i64,
    pub like_count: i64,
    pub retweet_count: i64,
    pub media_urls: Vec<String>,
    /// Filled from the content by entity extraction before storage.
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
}

/// A user-owned category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub is_default: bool,
    pub sort_order: i64,
    pub tweet_count: i64,
}

/// Which classifier produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMethod {
    Keywords,
    Context,
    Ai,
}

impl SignalMethod {
    /// Weight applied by the ranker when merging signals.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::Keywords => 1.2,
            Self::Ai => 1.0,
            Self::Context => 0.8,
        }
    }
}

impl std::fmt::Display for SignalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keywords => write!(f, "keywords"),
            Self::Context => write!(f, "context"),
            Self::Ai => write!(f, "ai"),
        }
    }
}

/// One category suggestion, either a raw classifier signal or a ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: String,
    pub confidence: f64,
    pub is_primary: bool,
    /// Contributing methods; a single entry for raw signals.
    pub methods: Vec<SignalMethod>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl CategoryResult {
    #[must_use]
    pub fn signal(category: impl Into<String>, confidence: f64, method: SignalMethod) -> Self {
        Self {
            category: category.into(),
            confidence,
            is_primary: false,
            methods: vec![method],
            details: BTreeMap::new(),
        }
    }

    /// The guaranteed result when no classifier produced anything.
    #[must_use]
    pub fn general_fallback() -> Self {
        Self {
            category: GENERAL_CATEGORY.to_string(),
            confidence: 0.3,
            is_primary: true,
            methods: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// A persisted tweet/category association joined with category display data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryView {
    pub category_id: i64,
    pub name: String,
    pub color: String,
    pub confidence: f64,
    pub is_primary: bool,
}

/// Outcome of categorizing one tweet inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub tweet_id: String,
    pub categories: Vec<CategoryResult>,
    pub error: bool,
}

/// Before/after report for a recategorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecategorizeReport {
    pub tweet_id: i64,
    pub old_primary: Option<String>,
    pub old_confidence: Option<f64>,
    pub new_primary: String,
    pub new_confidence: f64,
    pub category_count: usize,
}

impl RecategorizeReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.old_primary.as_deref() != Some(self.new_primary.as_str())
    }
}

/// Aggregate result of `recategorize_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecategorizeSummary {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub reports: Vec<RecategorizeReport>,
}

/// Suggested category name from a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub name: String,
    pub confidence: f64,
    pub frequency: usize,
}

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    Error,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid sync status: {s}")),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: i64,
    pub user_id: i64,
    pub status: SyncStatus,
    pub tweets_found: i64,
    pub tweets_new: i64,
    pub duration_ms: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Summary returned by a successful sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total_tweets: usize,
    pub new_tweets: usize,
    pub duration_ms: u64,
}

/// Aggregate returned by one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub twitter_id: String,
    pub username: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Access/refresh pair handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// External account id the bookmarks belong to.
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// A freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

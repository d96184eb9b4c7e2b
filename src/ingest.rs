//! Record normalization and ingestion.
//!
//! Shared by the sync pipeline and the scraped-bookmark importer: extract
//! entities, upsert by external id, and categorize records stored for the
//! first time.

use crate::categorize::CategorizationService;
use crate::error::Result;
use crate::model::NewTweet;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Hashtags and mentions, including Latin-1 and Latin Extended letters.
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[#@][\wÀ-ɏḀ-ỿ]+").expect("entity regex should compile")
});

/// Status id from a tweet permalink such as `https://x.com/a/status/123`.
static STATUS_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/status/(\d+)").expect("status regex should compile")
});

/// Hashtags and mentions in order of appearance.
#[must_use]
pub fn extract_entities(text: &str) -> (Vec<String>, Vec<String>) {
    let mut hashtags = Vec::new();
    let mut mentions = Vec::new();
    for m in ENTITY_RE.find_iter(text) {
        let token = m.as_str().to_string();
        if token.starts_with('#') {
            hashtags.push(token);
        } else {
            mentions.push(token);
        }
    }
    (hashtags, mentions)
}

#[must_use]
pub fn status_id_from_url(url: &str) -> Option<String> {
    STATUS_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Records stored or refreshed.
    pub stored: usize,
    /// Records inserted for the first time.
    pub new: usize,
    /// Records skipped as duplicates or unusable.
    pub skipped: usize,
}

/// Upsert `records` for `user_id`. Existing tweets only get their counters
/// refreshed; new ones are categorized.
///
/// A categorization failure on a new tweet is logged and leaves the tweet
/// stored without associations.
///
/// # Errors
///
/// Storage failures while upserting.
pub async fn ingest_records(
    categorizer: &CategorizationService,
    user_id: i64,
    records: Vec<NewTweet>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    ingest_into(categorizer, user_id, records, &mut report).await?;
    Ok(report)
}

/// Like [`ingest_records`], but tallies into `report` as it goes so the
/// counts stay accurate when a later record fails.
///
/// # Errors
///
/// Storage failures while upserting.
pub async fn ingest_into(
    categorizer: &CategorizationService,
    user_id: i64,
    records: Vec<NewTweet>,
    report: &mut IngestReport,
) -> Result<()> {
    let now = Utc::now();

    for mut record in records {
        if record.tweet_id.trim().is_empty() {
            report.skipped += 1;
            continue;
        }
        if record.hashtags.is_empty() && record.mentions.is_empty() {
            let (hashtags, mentions) = extract_entities(&record.content);
            record.hashtags = hashtags;
            record.mentions = mentions;
        }
        record.bookmarked_at.get_or_insert(now);

        let outcome = categorizer.storage().lock().upsert_tweet(user_id, &record)?;
        report.stored += 1;
        if !outcome.is_new() {
            continue;
        }
        report.new += 1;

        let categories = categorizer.categorize(&record.content).await;
        if let Err(e) = categorizer.persist_categories(outcome.id(), &categories, user_id) {
            warn!(user_id, tweet_id = %record.tweet_id, error = %e, "Stored tweet without categories");
        }
    }

    debug!(user_id, stored = report.stored, new = report.new, "Ingested records");
    Ok(())
}

/// A bookmark scraped from the web client by the browser extension.
///
/// Missing values arrive as `"N/A"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedTweet {
    pub tweet_url: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_handle: Option<String>,
    #[serde(default)]
    pub user_image_url: Option<String>,
    #[serde(default)]
    pub tweet_content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_link: Option<String>,
}

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "N/A")
        .map(str::to_string)
}

impl ScrapedTweet {
    /// Normalized record, or `None` without a usable status id.
    #[must_use]
    pub fn to_record(&self) -> Option<NewTweet> {
        let tweet_id = status_id_from_url(&self.tweet_url)?;
        let media_urls = [self.media_url.as_ref(), self.media_link.as_ref()]
            .into_iter()
            .filter_map(present)
            .collect();
        Some(NewTweet {
            tweet_id,
            content: present(self.tweet_content.as_ref()).unwrap_or_default(),
            author_username: present(self.user_handle.as_ref())
                .map(|h| h.trim_start_matches('@').to_string()),
            author_name: present(self.user_name.as_ref()),
            media_urls,
            ..NewTweet::default()
        })
    }
}

/// Import extension-scraped bookmarks. Records without a status id and
/// tweets already stored are skipped.
///
/// # Errors
///
/// Storage failures.
pub async fn import_scraped(
    categorizer: &CategorizationService,
    user_id: i64,
    scraped: &[ScrapedTweet],
) -> Result<IngestReport> {
    let mut skipped = 0;
    let mut fresh = Vec::new();
    {
        let storage = categorizer.storage().lock();
        if storage.get_user(user_id)?.is_none() {
            return Err(crate::error::ShelfError::not_found("User", user_id));
        }
        for item in scraped {
            match item.to_record() {
                Some(record)
                    if !storage.tweet_exists(&record.tweet_id)?
                        && !fresh.iter().any(|r: &NewTweet| r.tweet_id == record.tweet_id) =>
                {
                    fresh.push(record);
                }
                _ => skipped += 1,
            }
        }
    }

    let mut report = ingest_records(categorizer, user_id, fresh).await?;
    report.skipped += skipped;
    if let Err(e) = categorizer.recompute_tweet_counts(user_id) {
        warn!(user_id, error = %e, "Count refresh after import failed");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn service() -> (CategorizationService, i64) {
        let mut storage = Storage::open_memory().unwrap();
        let (user, _) = storage
            .bootstrap_user("1", "alice", None, Some("tok"), None)
            .unwrap();
        (CategorizationService::keyword_only(storage.into_shared()), user.id)
    }

    fn scraped(url: &str, text: &str) -> ScrapedTweet {
        ScrapedTweet {
            tweet_url: url.to_string(),
            user_name: Some("Ferris".to_string()),
            user_handle: Some("@ferris".to_string()),
            tweet_content: Some(text.to_string()),
            media_url: Some("N/A".to_string()),
            ..ScrapedTweet::default()
        }
    }

    #[test]
    fn entities_split_by_sigil() {
        let (hashtags, mentions) = extract_entities("Olá #café with @josé and #rust_lang!");
        assert_eq!(hashtags, vec!["#café", "#rust_lang"]);
        assert_eq!(mentions, vec!["@josé"]);
        let (hashtags, mentions) = extract_entities("plain");
        assert!(hashtags.is_empty() && mentions.is_empty());
    }

    #[test]
    fn status_id_is_taken_from_url() {
        assert_eq!(
            status_id_from_url("https://x.com/ferris/status/1234567890?s=20").as_deref(),
            Some("1234567890")
        );
        assert_eq!(status_id_from_url("https://x.com/ferris"), None);
    }

    #[test]
    fn scraped_placeholders_become_none() {
        let record = scraped("https://twitter.com/f/status/9", "hello").to_record().unwrap();
        assert_eq!(record.tweet_id, "9");
        assert_eq!(record.author_username.as_deref(), Some("ferris"));
        assert!(record.media_urls.is_empty());
    }

    #[tokio::test]
    async fn ingest_stores_entities_and_categorizes_new_records() {
        let (service, user_id) = service();
        let records = vec![NewTweet {
            tweet_id: "t1".to_string(),
            content: "Learning #python with @guido".to_string(),
            ..NewTweet::default()
        }];
        let report = ingest_records(&service, user_id, records.clone()).await.unwrap();
        assert_eq!(report, IngestReport { stored: 1, new: 1, skipped: 0 });

        let tweet = service
            .storage()
            .lock()
            .get_tweet_by_external_id("t1")
            .unwrap()
            .unwrap();
        assert_eq!(tweet.hashtags(), vec!["#python"]);
        assert_eq!(tweet.mentions(), vec!["@guido"]);
        assert!(tweet.media_urls_json.is_none());
        assert!(tweet.category.is_some());
        assert!(!service.get_categories(tweet.id).unwrap().is_empty());

        let again = ingest_records(&service, user_id, records).await.unwrap();
        assert_eq!(again.new, 0);
        assert_eq!(again.stored, 1);
    }

    #[tokio::test]
    async fn import_skips_duplicates_and_bad_urls() {
        let (service, user_id) = service();
        let batch = vec![
            scraped("https://x.com/a/status/1", "docker tips"),
            scraped("https://x.com/a/status/1", "docker tips"),
            scraped("https://x.com/a", "no id"),
            scraped("https://x.com/b/status/2", "breaking news"),
        ];
        let report = import_scraped(&service, user_id, &batch).await.unwrap();
        assert_eq!(report.new, 2);
        assert_eq!(report.skipped, 2);

        let again = import_scraped(&service, user_id, &batch[..1]).await.unwrap();
        assert_eq!(again.new, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(service.storage().lock().count_tweets(user_id).unwrap(), 2);
    }

    #[tokio::test]
    async fn import_for_unknown_user_is_not_found() {
        let (service, _) = service();
        let err = import_scraped(&service, 99, &[]).await.unwrap_err();
        assert!(matches!(err, crate::error::ShelfError::NotFound { .. }));
    }
}

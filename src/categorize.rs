//! Categorization service.
//!
//! Runs the signal sources in fixed order (keywords, context, ai), ranks the
//! merged signals and stores the outcome as tweet/category associations.

use crate::classify::{
    ContextClassifier, HttpModelBackend, KeywordClassifier, SentimentAdapter, SignalSource, rank,
};
use crate::config::CategorizationConfig;
use crate::error::{Result, ShelfError};
use crate::logging::OperationGuard;
use crate::model::{
    BatchItem, CategoryResult, CategorySuggestion, CategoryView, GENERAL_CATEGORY,
    RecategorizeReport, RecategorizeSummary, Tweet,
};
use crate::storage::SharedStorage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Recent tweets sampled for suggestions.
pub const SUGGESTION_SAMPLE: usize = 50;
/// Only primaries above this confidence count toward a suggestion.
pub const SUGGESTION_MIN_CONFIDENCE: f64 = 0.5;

pub struct CategorizationService {
    storage: SharedStorage,
    keywords: Arc<KeywordClassifier>,
    sources: Vec<Arc<dyn SignalSource>>,
}

impl CategorizationService {
    /// Service with the built-in classifiers and the given model adapter.
    #[must_use]
    pub fn new(storage: SharedStorage, adapter: SentimentAdapter) -> Self {
        let keywords = Arc::new(KeywordClassifier::new());
        let sources: Vec<Arc<dyn SignalSource>> = vec![
            keywords.clone(),
            Arc::new(ContextClassifier::new()),
            Arc::new(adapter),
        ];
        Self {
            storage,
            keywords,
            sources,
        }
    }

    /// Service without a model backend.
    #[must_use]
    pub fn keyword_only(storage: SharedStorage) -> Self {
        Self::new(storage, SentimentAdapter::disabled())
    }

    /// Wire the HTTP model backend when the config enables one.
    ///
    /// # Errors
    ///
    /// Returns `Classification` if the backend client cannot be built.
    pub fn from_config(storage: SharedStorage, config: &CategorizationConfig) -> Result<Self> {
        let labels = KeywordClassifier::new().category_names();
        let adapter = match HttpModelBackend::from_config(config)? {
            Some(backend) => SentimentAdapter::new(Arc::new(backend), labels),
            None => SentimentAdapter::disabled(),
        };
        Ok(Self::new(storage, adapter))
    }

    #[must_use]
    pub fn keywords(&self) -> &KeywordClassifier {
        &self.keywords
    }

    #[must_use]
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Rank every signal for `text`. Never empty: falls back to General.
    pub async fn categorize(&self, text: &str) -> Vec<CategoryResult> {
        let mut signals = Vec::new();
        for source in &self.sources {
            signals.extend(source.signals(text).await);
        }
        let ranked = rank(&signals);
        if ranked.is_empty() {
            vec![CategoryResult::general_fallback()]
        } else {
            ranked
        }
    }

    /// Replace a tweet's associations with `categories`.
    ///
    /// The first entry is promoted when none is flagged primary, and only the
    /// first flagged entry stays primary.
    ///
    /// # Errors
    ///
    /// `Categorization` wrapping the storage failure; nothing is changed then.
    pub fn persist_categories(
        &self,
        tweet_id: i64,
        categories: &[CategoryResult],
        user_id: i64,
    ) -> Result<()> {
        let normalized = normalize_primary(categories);
        let result = self
            .storage
            .lock()
            .replace_tweet_categories(tweet_id, user_id, &normalized);

        match result {
            Ok(primary) => {
                debug!(tweet_id, user_id, primary = ?primary, count = normalized.len(), "Stored categories");
                Ok(())
            }
            Err(e) => {
                error!(tweet_id, user_id, error = %e, "Failed to store categories");
                Err(ShelfError::categorization(format!("tweet {tweet_id}"), e))
            }
        }
    }

    /// Stored associations, primary first then by confidence.
    ///
    /// # Errors
    ///
    /// `Categorization` wrapping the storage failure.
    pub fn get_categories(&self, tweet_id: i64) -> Result<Vec<CategoryView>> {
        self.storage
            .lock()
            .get_tweet_categories(tweet_id)
            .map_err(|e| ShelfError::categorization(format!("tweet {tweet_id}"), e))
    }

    /// # Errors
    ///
    /// `Categorization` wrapping the storage failure.
    pub fn recompute_tweet_counts(&self, user_id: i64) -> Result<usize> {
        self.storage
            .lock()
            .recompute_counts(user_id)
            .map_err(|e| ShelfError::categorization(format!("counts for user {user_id}"), e))
    }

    /// Categorize and store each tweet independently. A tweet that cannot be
    /// stored is reported with a low-confidence General entry and `error`.
    pub async fn batch_categorize(&self, user_id: i64, tweets: &[Tweet]) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(tweets.len());
        for tweet in tweets {
            let categories = self.categorize(&tweet.content).await;
            match self.persist_categories(tweet.id, &categories, user_id) {
                Ok(()) => items.push(BatchItem {
                    tweet_id: tweet.tweet_id.clone(),
                    categories,
                    error: false,
                }),
                Err(e) => {
                    warn!(tweet_id = %tweet.tweet_id, error = %e, "Batch item failed");
                    let mut fallback = CategoryResult::general_fallback();
                    fallback.confidence = 0.2;
                    items.push(BatchItem {
                        tweet_id: tweet.tweet_id.clone(),
                        categories: vec![fallback],
                        error: true,
                    });
                }
            }
        }
        if let Err(e) = self.recompute_tweet_counts(user_id) {
            warn!(user_id, error = %e, "Count refresh after batch failed");
        }
        items
    }

    async fn recategorize_tweet(&self, tweet: &Tweet) -> Result<RecategorizeReport> {
        let old = self
            .get_categories(tweet.id)?
            .into_iter()
            .find(|view| view.is_primary);

        let categories = self.categorize(&tweet.content).await;
        self.persist_categories(tweet.id, &categories, tweet.user_id)?;

        let new_primary = categories
            .iter()
            .find(|c| c.is_primary)
            .or_else(|| categories.first());
        Ok(RecategorizeReport {
            tweet_id: tweet.id,
            old_primary: old.as_ref().map(|v| v.name.clone()).or_else(|| tweet.category.clone()),
            old_confidence: old.map(|v| v.confidence),
            new_primary: new_primary.map_or_else(|| GENERAL_CATEGORY.to_string(), |c| c.category.clone()),
            new_confidence: new_primary.map_or(0.0, |c| c.confidence),
            category_count: categories.len(),
        })
    }

    fn load_recent(&self, user_id: i64, limit: usize) -> Result<Vec<Tweet>> {
        let loaded = self.storage.lock().recent_tweets(user_id, limit);
        loaded.map_err(|e| {
            error!(user_id, error = %e, "Failed to load recent tweets");
            ShelfError::categorization(format!("recent tweets for user {user_id}"), e)
        })
    }

    /// Re-run classification for one tweet and refresh counts.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown tweet, `Categorization` on storage failure.
    pub async fn recategorize_one(&self, tweet_id: i64, user_id: i64) -> Result<RecategorizeReport> {
        let loaded = self.storage.lock().get_user_tweet(user_id, tweet_id);
        let tweet = match loaded {
            Ok(tweet) => tweet,
            Err(e @ ShelfError::NotFound { .. }) => return Err(e),
            Err(e) => {
                error!(tweet_id, user_id, error = %e, "Failed to load tweet");
                return Err(ShelfError::categorization(format!("tweet {tweet_id}"), e));
            }
        };
        let report = self.recategorize_tweet(&tweet).await?;
        self.recompute_tweet_counts(user_id)?;
        Ok(report)
    }

    /// Re-run classification for the user's most recent `limit` tweets.
    /// Individual failures are counted, not propagated.
    ///
    /// # Errors
    ///
    /// `Categorization` when loading tweets or refreshing counts fails.
    pub async fn recategorize_all(&self, user_id: i64, limit: usize) -> Result<RecategorizeSummary> {
        let guard = OperationGuard::new("recategorize", Some(user_id));
        let tweets = match self.load_recent(user_id, limit) {
            Ok(tweets) => tweets,
            Err(e) => {
                guard.fail(&e);
                return Err(e);
            }
        };
        let total = tweets.len();
        let mut summary = RecategorizeSummary::default();

        for tweet in &tweets {
            summary.processed += 1;
            match self.recategorize_tweet(tweet).await {
                Ok(report) => {
                    if report.changed() {
                        summary.updated += 1;
                    }
                    summary.reports.push(report);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(tweet_id = tweet.id, error = %e, "Recategorization failed");
                }
            }
            if summary.processed % 25 == 0 {
                crate::log_progress!(summary.processed, total, "Recategorizing");
            }
        }

        match self.recompute_tweet_counts(user_id) {
            Ok(_) => guard.complete(),
            Err(e) => {
                guard.fail(&e);
                return Err(e);
            }
        }
        Ok(summary)
    }

    /// Category names the user's recent history leans toward.
    ///
    /// # Errors
    ///
    /// `Categorization` when loading tweets fails.
    pub async fn suggested_categories(&self, user_id: i64) -> Result<Vec<CategorySuggestion>> {
        let tweets = self.load_recent(user_id, SUGGESTION_SAMPLE)?;
        if tweets.is_empty() {
            return Ok(self
                .keywords
                .category_names()
                .into_iter()
                .map(|name| CategorySuggestion {
                    name,
                    confidence: 0.5,
                    frequency: 0,
                })
                .collect());
        }

        let mut order: Vec<String> = Vec::new();
        let mut frequency: HashMap<String, usize> = HashMap::new();
        for tweet in &tweets {
            let ranked = self.categorize(&tweet.content).await;
            if let Some(top) = ranked.first().filter(|c| c.confidence > SUGGESTION_MIN_CONFIDENCE) {
                let count = frequency.entry(top.category.clone()).or_insert_with(|| {
                    order.push(top.category.clone());
                    0
                });
                *count += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let sample = tweets.len() as f64;
        let mut suggestions: Vec<CategorySuggestion> = order
            .into_iter()
            .map(|name| {
                let count = frequency.get(&name).copied().unwrap_or_default();
                #[allow(clippy::cast_precision_loss)]
                let confidence = (count as f64 / sample).min(1.0);
                CategorySuggestion {
                    name,
                    confidence,
                    frequency: count,
                }
            })
            .collect();
        suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(suggestions)
    }
}

/// Exactly one primary: the first flagged entry, else the first entry.
fn normalize_primary(categories: &[CategoryResult]) -> Vec<CategoryResult> {
    if categories.is_empty() {
        return vec![CategoryResult::general_fallback()];
    }
    let primary_idx = categories.iter().position(|c| c.is_primary).unwrap_or(0);
    categories
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let mut c = c.clone();
            c.is_primary = idx == primary_idx;
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ModelBackend;
    use crate::model::{NewTweet, SignalMethod};
    use crate::storage::Storage;
    use async_trait::async_trait;

    struct StubModel(&'static str, f64);

    #[async_trait]
    impl ModelBackend for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        async fn classify(&self, _text: &str, _labels: &[String]) -> Result<Option<(String, f64)>> {
            Ok(Some((self.0.to_string(), self.1)))
        }
    }

    fn setup() -> (CategorizationService, i64) {
        let mut storage = Storage::open_memory().unwrap();
        let (user, _) = storage
            .bootstrap_user("1", "alice", None, Some("tok"), None)
            .unwrap();
        (CategorizationService::keyword_only(storage.into_shared()), user.id)
    }

    fn insert(service: &CategorizationService, user_id: i64, id: &str, text: &str) -> Tweet {
        let storage = service.storage().lock();
        let row = storage
            .upsert_tweet(
                user_id,
                &NewTweet {
                    tweet_id: id.to_string(),
                    content: text.to_string(),
                    ..NewTweet::default()
                },
            )
            .unwrap()
            .id();
        storage.get_tweet(row).unwrap().unwrap()
    }

    #[tokio::test]
    async fn categorize_always_returns_valid_results() {
        let (service, _) = setup();
        for text in ["", "hello there", "Breaking news: new Python framework released #coding"] {
            let results = service.categorize(text).await;
            assert!(!results.is_empty());
            assert!(results.len() <= 5);
            assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
            assert!(results.iter().filter(|r| r.is_primary).count() <= 1);
        }
        let fallback = service.categorize("").await;
        assert_eq!(fallback[0].category, GENERAL_CATEGORY);
        assert!((fallback[0].confidence - 0.3).abs() < f64::EPSILON);
        assert!(fallback[0].is_primary);
    }

    #[tokio::test]
    async fn keyword_only_text_ranks_its_category_first() {
        let (service, _) = setup();
        let results = service
            .categorize("Great football match, the team played the championship league")
            .await;
        assert_eq!(results[0].category, "Sports");
    }

    #[tokio::test]
    async fn model_signal_is_blended() {
        let storage = Storage::open_memory().unwrap().into_shared();
        let adapter = SentimentAdapter::new(
            Arc::new(StubModel("Inspiration", 0.9)),
            vec!["Inspiration".to_string()],
        );
        let service = CategorizationService::new(storage, adapter);
        let results = service.categorize("nothing matches here").await;
        assert_eq!(results[0].category, "Inspiration");
        assert_eq!(results[0].methods, vec![SignalMethod::Ai]);
        assert!((results[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn persist_then_get_round_trips() {
        let (service, user_id) = setup();
        let tweet = insert(&service, user_id, "t1", "Docker and Kubernetes on AWS #devops");
        let categories = service.categorize(&tweet.content).await;
        service
            .persist_categories(tweet.id, &categories, user_id)
            .unwrap();

        let views = service.get_categories(tweet.id).unwrap();
        assert_eq!(views.len(), categories.len());
        assert_eq!(views[0].name, categories[0].category);
        assert!(views[0].is_primary);
        assert_eq!(views.iter().filter(|v| v.is_primary).count(), 1);
    }

    #[tokio::test]
    async fn persist_promotes_first_entry_when_no_primary() {
        let (service, user_id) = setup();
        let tweet = insert(&service, user_id, "t1", "text");
        let weak = vec![
            CategoryResult::signal("News", 0.35, SignalMethod::Context),
            CategoryResult::signal("Education", 0.3, SignalMethod::Context),
        ];
        service.persist_categories(tweet.id, &weak, user_id).unwrap();

        let views = service.get_categories(tweet.id).unwrap();
        assert_eq!(views[0].name, "News");
        assert!(views[0].is_primary);
        assert!(!views[1].is_primary);
        let stored = service.storage().lock().get_tweet(tweet.id).unwrap().unwrap();
        assert_eq!(stored.category.as_deref(), Some("News"));
    }

    #[tokio::test]
    async fn persist_failure_is_categorization_error() {
        let (service, user_id) = setup();
        let err = service
            .persist_categories(999, &[CategoryResult::general_fallback()], user_id)
            .unwrap_err();
        assert!(matches!(err, ShelfError::Categorization { .. }));
        assert_eq!(err.public_code(), "CATEGORIZATION_ERROR");
    }

    #[tokio::test]
    async fn batch_reports_failures_per_item() {
        let (service, user_id) = setup();
        let good = insert(&service, user_id, "t1", "python tutorial");
        let mut missing = good.clone();
        missing.id = 4242;
        missing.tweet_id = "ghost".to_string();

        let items = service.batch_categorize(user_id, &[good, missing]).await;
        assert_eq!(items.len(), 2);
        assert!(!items[0].error);
        assert!(items[1].error);
        assert_eq!(items[1].categories[0].category, GENERAL_CATEGORY);
        assert!((items[1].categories[0].confidence - 0.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn recategorize_reports_old_and_new() {
        let (service, user_id) = setup();
        let tweet = insert(&service, user_id, "t1", "new javascript framework on github");
        service
            .persist_categories(
                tweet.id,
                &[CategoryResult::signal("News", 0.6, SignalMethod::Keywords)],
                user_id,
            )
            .unwrap();

        let report = service.recategorize_one(tweet.id, user_id).await.unwrap();
        assert_eq!(report.old_primary.as_deref(), Some("News"));
        assert_eq!(report.new_primary, "Technology");
        assert!(report.changed());

        let tech = service
            .storage()
            .lock()
            .get_category_by_name(user_id, "Technology")
            .unwrap()
            .unwrap();
        assert_eq!(tech.tweet_count, 1);

        let summary = service.recategorize_all(user_id, 10).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn recategorize_unknown_tweet_is_not_found() {
        let (service, user_id) = setup();
        let err = service.recategorize_one(77, user_id).await.unwrap_err();
        assert!(matches!(err, ShelfError::NotFound { .. }));
    }

    #[tokio::test]
    async fn suggestions_without_history_list_every_keyword_category() {
        let (service, user_id) = setup();
        let suggestions = service.suggested_categories(user_id).await.unwrap();
        assert_eq!(suggestions.len(), service.keywords().category_names().len());
        assert!(suggestions
            .iter()
            .all(|s| (s.confidence - 0.5).abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn suggestions_follow_history() {
        let (service, user_id) = setup();
        insert(&service, user_id, "t1", "python docker kubernetes");
        insert(&service, user_id, "t2", "javascript react frontend");
        insert(&service, user_id, "t3", "nice weather");

        let suggestions = service.suggested_categories(user_id).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].name, "Technology");
        assert_eq!(suggestions[0].frequency, 2);
        assert!((suggestions[0].confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn storage_failures_surface_as_categorization_errors() {
        let (service, user_id) = setup();
        let tweet = insert(&service, user_id, "t1", "python docker kubernetes");
        service
            .storage()
            .lock()
            .connection()
            .execute_batch("ALTER TABLE tweets RENAME TO tweets_moved")
            .unwrap();

        let err = service.recategorize_one(tweet.id, user_id).await.unwrap_err();
        assert!(matches!(err, ShelfError::Categorization { .. }), "got {err:?}");
        let err = service.recategorize_all(user_id, 10).await.unwrap_err();
        assert!(matches!(err, ShelfError::Categorization { .. }), "got {err:?}");
        let err = service.suggested_categories(user_id).await.unwrap_err();
        assert!(matches!(err, ShelfError::Categorization { .. }), "got {err:?}");
    }
}

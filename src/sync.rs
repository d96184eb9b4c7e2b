//! Rate-limit-aware bookmark synchronization.
//!
//! A run moves `running -> success | error`. The sync log row is created
//! when the run starts and finalized on every exit path; a run that dies
//! without finalizing is reconciled to `error` ("interrupted") by the next
//! run for the same user once it is older than the stale threshold.

use crate::auth::{TokenRefresher, TokenStore};
use crate::categorize::CategorizationService;
use crate::config::SyncConfig;
use crate::error::{Result, ShelfError};
use crate::ingest::{IngestReport, ingest_into};
use crate::logging::OperationGuard;
use crate::model::{Credential, NewTweet, SyncStatus, SyncSummary};
use crate::provider::{TweetPage, TweetsProvider};
use crate::storage::SharedStorage;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Shortest wait after a rate limit with a known reset time.
pub const MIN_RATE_LIMIT_WAIT_MS: i64 = 60_000;
/// Slack added on top of the provider's reset time.
pub const RESET_SLACK_MS: i64 = 5_000;
const BACKOFF_BASE_MS: u64 = 10_000;
const BACKOFF_CAP_MS: u64 = 300_000;

/// How long to wait before retry `attempt` (zero-based) after a rate limit.
///
/// With a reset time (epoch seconds) the wait is
/// `max(60 s, reset*1000 - now + 5 s)`; without one it is exponential,
/// `10 s * 2^attempt` capped at five minutes.
#[must_use]
pub fn rate_limit_delay(reset: Option<i64>, attempt: u32, now_ms: i64) -> Duration {
    match reset {
        Some(reset) => {
            let until_reset = reset
                .saturating_mul(1000)
                .saturating_sub(now_ms)
                .saturating_add(RESET_SLACK_MS);
            let wait = until_reset.max(MIN_RATE_LIMIT_WAIT_MS);
            Duration::from_millis(u64::try_from(wait).unwrap_or(u64::MAX))
        }
        None => {
            let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
            Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS))
        }
    }
}

/// What a run got through before it finished or failed.
#[derive(Debug, Default)]
struct RunProgress {
    fetched: usize,
    ingested: IngestReport,
}

/// Pages a user's bookmarks into storage.
pub struct SyncPipeline {
    storage: SharedStorage,
    provider: Arc<dyn TweetsProvider>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    categorizer: Arc<CategorizationService>,
    tokens: TokenStore,
    config: SyncConfig,
    user_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncPipeline {
    #[must_use]
    pub fn new(
        categorizer: Arc<CategorizationService>,
        provider: Arc<dyn TweetsProvider>,
        refresher: Option<Arc<dyn TokenRefresher>>,
        config: SyncConfig,
    ) -> Self {
        let storage = categorizer.storage().clone();
        Self {
            tokens: TokenStore::new(storage.clone()),
            storage,
            provider,
            refresher,
            categorizer,
            config,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    #[must_use]
    pub fn categorizer(&self) -> &CategorizationService {
        &self.categorizer
    }

    fn user_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one sync for `user_id`. Concurrent calls for the same user wait
    /// for each other.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user, `Auth` for a missing or unrefreshable
    /// credential, `Provider` when the provider fails (rate limits only after
    /// `max_retries` retries), `Sync` wrapping anything else.
    pub async fn sync_user(&self, user_id: i64) -> Result<SyncSummary> {
        let lock = self.user_lock(user_id);
        let _held = lock.lock().await;

        let started = Instant::now();
        let guard = OperationGuard::new("sync", Some(user_id));

        let log_id = match self.open_log(user_id) {
            Ok(id) => id,
            Err(e) => {
                guard.fail(&e);
                return Err(ShelfError::sync(user_id, e));
            }
        };

        let mut progress = RunProgress::default();
        let outcome = self.run(user_id, &mut progress).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let finalized = {
            let storage = self.storage.lock();
            match &outcome {
                Ok(summary) => storage.finish_sync_log(
                    log_id,
                    SyncStatus::Success,
                    summary.total_tweets,
                    summary.new_tweets,
                    duration_ms,
                    None,
                ),
                Err(e) => storage.finish_sync_log(
                    log_id,
                    SyncStatus::Error,
                    progress.fetched,
                    progress.ingested.new,
                    duration_ms,
                    Some(&e.to_string()),
                ),
            }
        };
        if let Err(e) = &finalized {
            warn!(user_id, log_id, error = %e, "Failed to finalize sync log");
        }

        match outcome {
            Ok(mut summary) => {
                summary.duration_ms = duration_ms;
                info!(
                    user_id,
                    total_tweets = summary.total_tweets,
                    new_tweets = summary.new_tweets,
                    duration_ms,
                    "Sync completed"
                );
                guard.complete();
                Ok(summary)
            }
            Err(e) => {
                guard.fail(&e);
                Err(ShelfError::sync(user_id, e))
            }
        }
    }

    /// Resolve the user, reconcile interrupted runs and open a log row.
    fn open_log(&self, user_id: i64) -> Result<i64> {
        let storage = self.storage.lock();
        if storage.get_user(user_id)?.is_none() {
            return Err(ShelfError::not_found("User", user_id));
        }
        let now = Utc::now();
        let cutoff = now - chrono::Duration::minutes(self.config.stale_running_minutes);
        let reconciled = storage.reconcile_stale_logs(user_id, cutoff)?;
        if reconciled > 0 {
            warn!(user_id, reconciled, "Marked interrupted sync runs as failed");
        }
        storage.create_sync_log(user_id, now)
    }

    async fn run(&self, user_id: i64, progress: &mut RunProgress) -> Result<SyncSummary> {
        let mut credential = self.tokens.get(user_id)?;
        let records = self
            .fetch_all(user_id, &mut credential, &mut progress.fetched)
            .await?;
        let total_tweets = records.len();

        ingest_into(&self.categorizer, user_id, records, &mut progress.ingested).await?;
        self.categorizer.recompute_tweet_counts(user_id)?;
        self.storage.lock().touch_last_sync(user_id, Utc::now())?;

        Ok(SyncSummary {
            total_tweets,
            new_tweets: progress.ingested.new,
            duration_ms: 0,
        })
    }

    async fn fetch_all(
        &self,
        user_id: i64,
        credential: &mut Credential,
        fetched: &mut usize,
    ) -> Result<Vec<NewTweet>> {
        let cap = self.config.max_tweets_per_sync;
        let mut records: Vec<NewTweet> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .fetch_with_retry(user_id, credential, cursor.as_deref())
                .await?;
            let batch_size = page.count;
            records.extend(page.records);
            *fetched = records.len();

            let has_next = page.next_cursor.is_some() && batch_size > 0;
            info!(
                user_id,
                batch_size,
                total_so_far = records.len(),
                has_next,
                "Fetched bookmark page"
            );

            if !has_next || records.len() >= cap {
                break;
            }
            cursor = page.next_cursor;
            tokio::time::sleep(self.config.inter_page_delay()).await;
        }

        records.truncate(cap);
        *fetched = records.len();
        Ok(records)
    }

    async fn fetch_with_retry(
        &self,
        user_id: i64,
        credential: &mut Credential,
        cursor: Option<&str>,
    ) -> Result<TweetPage> {
        let mut attempt = 0;
        loop {
            let result = self
                .tokens
                .fetch_page(
                    self.provider.as_ref(),
                    self.refresher.as_deref(),
                    user_id,
                    credential,
                    cursor,
                    self.config.page_size,
                )
                .await;

            match result {
                Err(e) if e.is_rate_limited() && attempt < self.config.max_retries => {
                    let reset = e.as_provider().and_then(|p| p.rate_limit).and_then(|r| r.reset);
                    let wait = rate_limit_delay(reset, attempt, Utc::now().timestamp_millis());
                    attempt += 1;
                    warn!(
                        user_id,
                        attempt,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited; waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

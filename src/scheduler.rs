//! Periodic sync of every eligible user plus housekeeping.

use crate::error::Result;
use crate::model::SchedulerSummary;
use crate::sync::SyncPipeline;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Users without a sync for this long count as inactive.
pub const INACTIVE_AFTER_DAYS: i64 = 30;

/// Result of one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub purged_logs: usize,
    pub recounted_users: usize,
    pub inactive_users: i64,
}

/// Drives [`SyncPipeline`] across users, one at a time.
pub struct SyncScheduler {
    pipeline: Arc<SyncPipeline>,
}

impl SyncScheduler {
    #[must_use]
    pub const fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self { pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    /// Sync every active user with a stored credential.
    ///
    /// Per-user failures are counted, never propagated. Between users the
    /// scheduler pauses: the inter-user delay after a success, the long
    /// cooldown after a rate limit, the short pause after any other error.
    ///
    /// # Errors
    ///
    /// Only when the user list itself cannot be loaded.
    pub async fn sync_all_users(&self) -> Result<SchedulerSummary> {
        let users = self.pipeline.storage().lock().list_syncable_users()?;
        let config = self.pipeline.config();
        let mut summary = SchedulerSummary {
            total: users.len(),
            ..SchedulerSummary::default()
        };
        if users.is_empty() {
            info!("No users to sync");
            return Ok(summary);
        }
        info!(users = summary.total, "Starting sync pass");

        for (idx, user) in users.iter().enumerate() {
            let pause = match self.pipeline.sync_user(user.id).await {
                Ok(result) => {
                    summary.succeeded += 1;
                    info!(
                        user_id = user.id,
                        username = %user.username,
                        new_tweets = result.new_tweets,
                        "User synced"
                    );
                    config.inter_user_delay()
                }
                Err(e) if e.is_rate_limited() => {
                    summary.failed += 1;
                    warn!(user_id = user.id, username = %user.username, "Rate limited; cooling down");
                    config.rate_limit_cooldown()
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(user_id = user.id, username = %user.username, error = %e, "User sync failed");
                    config.error_pause()
                }
            };
            if idx + 1 < users.len() {
                tokio::time::sleep(pause).await;
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Sync pass finished"
        );
        Ok(summary)
    }

    /// Purge expired sync logs, refresh every user's cached category counts
    /// and count inactive users.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn maintenance(&self) -> Result<MaintenanceReport> {
        let config = self.pipeline.config();
        let now = Utc::now();
        let storage = self.pipeline.storage().lock();

        let purged_logs =
            storage.purge_sync_logs(now - chrono::Duration::days(config.log_retention_days))?;
        let users = storage.list_users()?;
        for user in &users {
            storage.recompute_counts(user.id)?;
        }
        let inactive_users =
            storage.count_inactive_users(now - chrono::Duration::days(INACTIVE_AFTER_DAYS))?;
        if inactive_users > 0 {
            warn!(inactive_users, "Users without a recent sync");
        }

        Ok(MaintenanceReport {
            purged_logs,
            recounted_users: users.len(),
            inactive_users,
        })
    }

    /// Run a sync pass and a maintenance pass on every tick until `shutdown`
    /// resolves. The first tick fires immediately.
    ///
    /// A pass in progress finishes before shutdown is observed.
    pub async fn run_forever<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.pipeline.config().interval().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(interval_secs = period.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_all_users().await {
                        error!(error = %e, "Sync pass failed");
                    }
                    match self.maintenance() {
                        Ok(report) => info!(
                            purged_logs = report.purged_logs,
                            recounted_users = report.recounted_users,
                            "Maintenance finished"
                        ),
                        Err(e) => error!(error = %e, "Maintenance failed"),
                    }
                }
            }
        }
    }
}

//! Per-user statistics: bookmarks, categories and sync history.

use crate::Result;
use crate::error::ShelfError;
use crate::model::{DEFAULT_CATEGORY_COLOR, SyncLog, SyncStatus};
use crate::storage::{Storage, SyncStatusAggregate};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Most recent logs included in [`SyncStats`].
pub const RECENT_LOG_LIMIT: usize = 50;

/// Sync history over a window of days.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub days: i64,
    pub by_status: Vec<SyncStatusAggregate>,
    pub total_runs: i64,
    pub successful_runs: i64,
    /// Percentage of successful runs, 0 when there were none.
    pub success_rate: u8,
    /// Mean duration of runs that recorded one.
    pub avg_duration_ms: Option<f64>,
    pub tweets_found: i64,
    pub tweets_new: i64,
    pub recent: Vec<SyncLog>,
}

impl SyncStats {
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn compute(storage: &Storage, user_id: i64, days: i64) -> Result<Self> {
        let since = Utc::now() - Duration::days(days.max(0));
        let by_status = storage.sync_status_aggregates(user_id, since)?;
        let recent = storage.recent_sync_logs(user_id, since, RECENT_LOG_LIMIT)?;

        let total_runs: i64 = by_status.iter().map(|a| a.runs).sum();
        let successful_runs = by_status
            .iter()
            .filter(|a| a.status == SyncStatus::Success)
            .map(|a| a.runs)
            .sum::<i64>();
        let success_rate = if total_runs > 0 {
            ((successful_runs as f64 / total_runs as f64) * 100.0).round() as u8
        } else {
            0
        };

        // Weighted by runs per status; statuses without any duration are skipped.
        let (weighted, weight) = by_status
            .iter()
            .filter_map(|a| a.avg_duration_ms.map(|avg| (avg * a.runs as f64, a.runs as f64)))
            .fold((0.0, 0.0), |acc, (w, n)| (acc.0 + w, acc.1 + n));
        let avg_duration_ms = (weight > 0.0).then(|| weighted / weight);

        Ok(Self {
            days,
            total_runs,
            successful_runs,
            success_rate,
            avg_duration_ms,
            tweets_found: by_status.iter().map(|a| a.tweets_found).sum(),
            tweets_new: by_status.iter().map(|a| a.tweets_new).sum(),
            by_status,
            recent,
        })
    }
}

/// Live tweet count of one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStat {
    pub name: String,
    pub color: String,
    pub count: i64,
}

/// A day's bookmark count.
#[derive(Debug, Clone, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// Overview of a user's shelf.
#[derive(Debug, Clone, Serialize)]
pub struct ShelfStats {
    pub total_tweets: i64,
    pub total_categories: usize,
    pub tweets_this_week: i64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Ordered by count, most popular first.
    pub categories: Vec<CategoryStat>,
    pub daily: Vec<DailyCount>,
}

impl ShelfStats {
    /// # Errors
    ///
    /// `NotFound` for an unknown user, otherwise database failures.
    #[allow(clippy::cast_sign_loss)]
    pub fn compute(storage: &Storage, user_id: i64, days: i64) -> Result<Self> {
        let user = storage
            .get_user(user_id)?
            .ok_or_else(|| ShelfError::not_found("User", user_id))?;
        let now = Utc::now();

        let colors: HashMap<String, String> = storage
            .list_categories(user_id)?
            .into_iter()
            .map(|c| (c.name, c.color))
            .collect();
        let categories: Vec<CategoryStat> = storage
            .category_counts(user_id)?
            .into_iter()
            .map(|(name, count)| CategoryStat {
                color: colors
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
                name,
                count,
            })
            .collect();

        let daily = storage
            .daily_bookmark_counts(user_id, now - Duration::days(days.max(1)))?
            .into_iter()
            .map(|(date, count)| DailyCount {
                date,
                count: count.max(0) as u64,
            })
            .collect();

        Ok(Self {
            total_tweets: storage.count_tweets(user_id)?,
            total_categories: categories.len(),
            tweets_this_week: storage.count_tweets_since(user_id, now - Duration::days(7))?,
            last_sync: user.last_sync,
            categories,
            daily,
        })
    }

    #[must_use]
    pub fn most_popular(&self) -> Option<&CategoryStat> {
        self.categories.first().filter(|c| c.count > 0)
    }
}

/// Render values as a row of block characters, bucketing to `width`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn sparkline(values: &[u64], width: usize) -> String {
    if values.is_empty() || width == 0 {
        return String::new();
    }

    let blocks = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let bucketed: Vec<u64> = if values.len() <= width {
        values.to_vec()
    } else {
        let bucket_size = values.len().div_ceil(width);
        values
            .chunks(bucket_size)
            .map(|chunk| chunk.iter().sum::<u64>() / chunk.len() as u64)
            .collect()
    };

    let max = bucketed.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return "▁".repeat(bucketed.len().min(width));
    }
    bucketed
        .iter()
        .take(width)
        .map(|&v| blocks[(((v as f64 / max as f64) * 7.0) as usize).min(7)])
        .collect()
}

/// Daily counts laid out over `days` consecutive days ending today, with
/// zero-filled gaps.
#[must_use]
pub fn fill_days(daily: &[DailyCount], days: i64, today: NaiveDate) -> Vec<u64> {
    let counts: HashMap<NaiveDate, u64> = daily.iter().map(|d| (d.date, d.count)).collect();
    (0..days.max(1))
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset);
            counts.get(&date).copied().unwrap_or(0)
        })
        .collect()
}

//! `SQLite` storage for users, archived tweets, categories and sync logs.
//!
//! `tweet_categories` is the source of truth for category membership;
//! `tweets.category` mirrors the primary row so older readers keep working.

use crate::error::{Result, ShelfError};
use crate::model::{
    CATEGORY_PALETTE, Category, CategoryResult, CategoryView, DEFAULT_CATEGORIES,
    DEFAULT_CATEGORY_COLOR, NewTweet, SyncLog, SyncStatus, Tweet, TweetSort, User,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

/// Categories created by the classifier sort after every manual one.
const AUTO_CATEGORY_SORT_BASE: i64 = 100;

/// Storage handle shared between the pipeline, the scheduler and the CLI.
///
/// Never hold the guard across an `.await`.
pub type SharedStorage = Arc<Mutex<Storage>>;

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn epoch_utc() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

fn parse_rfc3339_or_epoch(value: Option<String>) -> DateTime<Utc> {
    parse_rfc3339_opt(value).unwrap_or_else(epoch_utc)
}

fn parse_rfc3339_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(values)?))
    }
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// `SQLite` storage manager.
pub struct Storage {
    conn: Connection,
}

/// Whether an upsert created the row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    #[must_use]
    pub const fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) => id,
        }
    }

    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Filters for listing a user's tweets.
#[derive(Debug, Clone)]
pub struct TweetQuery {
    /// Only tweets associated with this category name.
    pub category: Option<String>,
    /// Substring over content, author handle and author name.
    pub search: Option<String>,
    pub include_archived: bool,
    pub sort: TweetSort,
    pub ascending: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TweetQuery {
    fn default() -> Self {
        Self {
            category: None,
            search: None,
            include_archived: false,
            sort: TweetSort::default(),
            ascending: false,
            limit: 20,
            offset: 0,
        }
    }
}

/// Partial update for a category. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub sort_order: Option<i64>,
}

/// Per-status aggregate over a window of sync logs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatusAggregate {
    pub status: SyncStatus,
    pub runs: i64,
    pub avg_duration_ms: Option<f64>,
    pub tweets_found: i64,
    pub tweets_new: i64,
}

const TWEET_COLUMNS: &str = "t.id, t.tweet_id, t.user_id, t.content, t.author_id, \
     t.author_username, t.author_name, t.created_at_twitter, t.bookmarked_at, \
     t.reply_count, t.like_count, t.retweet_count, t.media_urls, t.hashtags, \
     t.mentions, t.category, t.is_archived";

fn tweet_from_row(row: &Row<'_>) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: row.get(0)?,
        tweet_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        author_id: row.get(4)?,
        author_username: row.get(5)?,
        author_name: row.get(6)?,
        created_at_twitter: parse_rfc3339_opt(row.get(7)?),
        bookmarked_at: parse_rfc3339_or_epoch(row.get(8)?),
        reply_count: row.get(9)?,
        like_count: row.get(10)?,
        retweet_count: row.get(11)?,
        media_urls_json: row.get(12)?,
        hashtags_json: row.get(13)?,
        mentions_json: row.get(14)?,
        category: row.get(15)?,
        is_archived: row.get::<_, i32>(16)? != 0,
    })
}

const CATEGORY_COLUMNS: &str =
    "id, user_id, name, description, color, is_default, sort_order, tweet_count";

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        color: row.get(4)?,
        is_default: row.get::<_, i32>(5)? != 0,
        sort_order: row.get(6)?,
        tweet_count: row.get(7)?,
    })
}

const USER_COLUMNS: &str = "id, twitter_id, username, display_name, access_token, \
     refresh_token, is_active, last_sync, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        twitter_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        is_active: row.get::<_, i32>(6)? != 0,
        last_sync: parse_rfc3339_opt(row.get(7)?),
        created_at: parse_rfc3339_or_epoch(row.get(8)?),
    })
}

const SYNC_LOG_COLUMNS: &str =
    "id, user_id, status, tweets_found, tweets_new, duration_ms, started_at, completed_at, error";

fn sync_log_from_row(row: &Row<'_>) -> rusqlite::Result<SyncLog> {
    let status: String = row.get(2)?;
    Ok(SyncLog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: status.parse().unwrap_or(SyncStatus::Error),
        tweets_found: row.get(3)?,
        tweets_new: row.get(4)?,
        duration_ms: row.get(5)?,
        started_at: parse_rfc3339_or_epoch(row.get(6)?),
        completed_at: parse_rfc3339_opt(row.get(7)?),
        error: row.get(8)?,
    })
}

/// Look up a category id by name, creating the category when missing.
fn ensure_category(tx: &Transaction<'_>, user_id: i64, name: &str) -> Result<i64> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM categories WHERE user_id = ? AND name = ?",
            params![user_id, name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let sort_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order), ?) + 1 FROM categories
         WHERE user_id = ? AND sort_order >= ?",
        params![AUTO_CATEGORY_SORT_BASE - 1, user_id, AUTO_CATEGORY_SORT_BASE],
        |row| row.get(0),
    )?;
    let color = CATEGORY_PALETTE
        .choose(&mut rand::thread_rng())
        .map_or(DEFAULT_CATEGORY_COLOR, |(_, hex)| *hex);

    tx.execute(
        "INSERT INTO categories (user_id, name, description, color, is_default, sort_order, created_at)
         VALUES (?, ?, ?, ?, 0, ?, ?)",
        params![
            user_id,
            name,
            format!("Created automatically for {name}"),
            color,
            sort_order,
            fmt_ts(Utc::now())
        ],
    )?;
    debug!(user_id, category = name, sort_order, "Created category from classifier");
    Ok(tx.last_insert_rowid())
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            ShelfError::with_context(format!("Failed to open database at {}", path.display()), e)
        })?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Wrap into the shared handle used by async components.
    #[must_use]
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }
        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: rusqlite::Result<i32> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );
        // Missing meta table means a fresh database.
        result.unwrap_or_default()
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    #[must_use]
    pub fn schema_version(&self) -> i32 {
        self.get_schema_version()
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                twitter_id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL,
                display_name TEXT,
                access_token TEXT,
                refresh_token TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_sync TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                color TEXT NOT NULL DEFAULT '#6B7280',
                is_default INTEGER NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                tweet_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS tweets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tweet_id TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                author_id TEXT,
                author_username TEXT,
                author_name TEXT,
                created_at_twitter TEXT,
                bookmarked_at TEXT NOT NULL,
                reply_count INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0,
                retweet_count INTEGER NOT NULL DEFAULT 0,
                media_urls TEXT,
                hashtags TEXT,
                mentions TEXT,
                category TEXT,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tweet_categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tweet_id INTEGER NOT NULL REFERENCES tweets(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                is_primary INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (tweet_id, category_id)
            );

            CREATE TABLE IF NOT EXISTS sync_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                tweets_found INTEGER NOT NULL DEFAULT 0,
                tweets_new INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tweets_user_bookmarked
                ON tweets(user_id, is_archived, bookmarked_at);
            CREATE INDEX IF NOT EXISTS idx_tweets_user_category ON tweets(user_id, category);
            CREATE INDEX IF NOT EXISTS idx_tweet_categories_category
                ON tweet_categories(category_id);
            CREATE INDEX IF NOT EXISTS idx_sync_logs_user_started
                ON sync_logs(user_id, started_at);
            ",
        )?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Upsert a user by external account id. A newly created user gets the
    /// default category set. Returns the user and whether it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written then.
    pub fn bootstrap_user(
        &mut self,
        twitter_id: &str,
        username: &str,
        display_name: Option<&str>,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(User, bool)> {
        if twitter_id.trim().is_empty() || username.trim().is_empty() {
            return Err(ShelfError::validation("account id and username are required"));
        }
        let now = fmt_ts(Utc::now());
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE twitter_id = ?",
                params![twitter_id],
                |row| row.get(0),
            )
            .optional()?;

        let (user_id, created) = if let Some(id) = existing {
            tx.execute(
                "UPDATE users SET username = ?, display_name = COALESCE(?, display_name),
                        access_token = COALESCE(?, access_token),
                        refresh_token = COALESCE(?, refresh_token), is_active = 1
                 WHERE id = ?",
                params![username, display_name, access_token, refresh_token, id],
            )?;
            (id, false)
        } else {
            tx.execute(
                "INSERT INTO users (twitter_id, username, display_name, access_token, refresh_token, is_active, created_at)
                 VALUES (?, ?, ?, ?, ?, 1, ?)",
                params![twitter_id, username, display_name, access_token, refresh_token, now],
            )?;
            let id = tx.last_insert_rowid();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO categories (user_id, name, description, color, is_default, sort_order, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )?;
                for (order, (name, description, color)) in DEFAULT_CATEGORIES.iter().enumerate() {
                    stmt.execute(params![
                        id,
                        name,
                        description,
                        color,
                        i32::from(order == 0),
                        limit_to_i64(order),
                        now
                    ])?;
                }
            }
            (id, true)
        };

        tx.commit()?;
        if created {
            info!(user_id, username, "Registered user with default categories");
        }
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| ShelfError::not_found("User", user_id))?;
        Ok((user, created))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![user_id], user_from_row)
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_user_by_twitter_id(&self, twitter_id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE twitter_id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![twitter_id], user_from_row)
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Active users that still hold an access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_syncable_users(&self) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE is_active = 1 AND access_token IS NOT NULL ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Store a fresh token pair. A `None` refresh token keeps the old one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn set_tokens(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET access_token = ?, refresh_token = COALESCE(?, refresh_token)
             WHERE id = ?",
            params![access_token, refresh_token, user_id],
        )?;
        if changed == 0 {
            return Err(ShelfError::not_found("User", user_id));
        }
        Ok(())
    }

    /// Logout: drop both tokens.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn clear_tokens(&self, user_id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET access_token = NULL, refresh_token = NULL WHERE id = ?",
            params![user_id],
        )?;
        if changed == 0 {
            return Err(ShelfError::not_found("User", user_id));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn touch_last_sync(&self, user_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET last_sync = ? WHERE id = ?",
            params![fmt_ts(at), user_id],
        )?;
        Ok(())
    }

    /// Active users that never synced or last synced before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_inactive_users(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM users
             WHERE is_active = 1 AND (last_sync IS NULL OR last_sync < ?)",
            params![fmt_ts(cutoff)],
            |row| row.get(0),
        )?)
    }

    /// Delete a user and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?", params![user_id])?;
        if changed == 0 {
            return Err(ShelfError::not_found("User", user_id));
        }
        Ok(())
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_categories(&self, user_id: i64) -> Result<Vec<Category>> {
        let sql = format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE user_id = ? ORDER BY sort_order, name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let categories = stmt
            .query_map(params![user_id], category_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_category(&self, user_id: i64, category_id: i64) -> Result<Option<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE user_id = ? AND id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![user_id, category_id], category_from_row)
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_category_by_name(&self, user_id: i64, name: &str) -> Result<Option<Category>> {
        let sql =
            format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE user_id = ? AND name = ?");
        Ok(self
            .conn
            .query_row(&sql, params![user_id, name], category_from_row)
            .optional()?)
    }

    fn require_category(&self, user_id: i64, category_id: i64) -> Result<Category> {
        self.get_category(user_id, category_id)?
            .ok_or_else(|| ShelfError::not_found("Category", category_id))
    }

    /// Create a manual category after the existing ones.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty or duplicate name.
    pub fn create_category(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ShelfError::validation("category name is required"));
        }
        if self.get_category_by_name(user_id, name)?.is_some() {
            return Err(ShelfError::validation(format!(
                "a category named '{name}' already exists"
            )));
        }

        // Manual categories stay below the auto-created range.
        let sort_order: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM categories
             WHERE user_id = ? AND sort_order < ?",
            params![user_id, AUTO_CATEGORY_SORT_BASE],
            |row| row.get(0),
        )?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        self.conn.execute(
            "INSERT INTO categories (user_id, name, description, color, is_default, sort_order, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                user_id,
                name,
                description,
                color.unwrap_or(DEFAULT_CATEGORY_COLOR),
                sort_order,
                fmt_ts(Utc::now())
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(user_id, category_id = id, category = name, "Category created");
        self.require_category(user_id, id)
    }

    /// Update a category. A rename also rewrites the legacy label on tweets.
    ///
    /// # Errors
    ///
    /// `Validation` for the default category or a duplicate name,
    /// `NotFound` for an unknown category.
    pub fn update_category(
        &mut self,
        user_id: i64,
        category_id: i64,
        update: &CategoryUpdate,
    ) -> Result<Category> {
        let existing = self.require_category(user_id, category_id)?;
        if existing.is_default {
            return Err(ShelfError::validation("the default category cannot be edited"));
        }

        let new_name = update
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != existing.name);
        if let Some(name) = new_name {
            if self.get_category_by_name(user_id, name)?.is_some() {
                return Err(ShelfError::validation(format!(
                    "a category named '{name}' already exists"
                )));
            }
        }

        let tx = self.conn.transaction()?;
        if let Some(name) = new_name {
            tx.execute(
                "UPDATE categories SET name = ? WHERE id = ?",
                params![name, category_id],
            )?;
            let renamed = tx.execute(
                "UPDATE tweets SET category = ? WHERE user_id = ? AND category = ?",
                params![name, user_id, existing.name],
            )?;
            info!(
                user_id,
                category_id,
                old_name = %existing.name,
                new_name = name,
                tweets = renamed,
                "Category renamed"
            );
        }
        if let Some(description) = &update.description {
            let description = description.as_deref().map(str::trim).filter(|d| !d.is_empty());
            tx.execute(
                "UPDATE categories SET description = ? WHERE id = ?",
                params![description, category_id],
            )?;
        }
        if let Some(color) = &update.color {
            tx.execute(
                "UPDATE categories SET color = ? WHERE id = ?",
                params![color, category_id],
            )?;
        }
        if let Some(sort_order) = update.sort_order {
            tx.execute(
                "UPDATE categories SET sort_order = ? WHERE id = ?",
                params![sort_order, category_id],
            )?;
        }
        tx.commit()?;

        self.require_category(user_id, category_id)
    }

    /// Non-archived tweets associated with a category.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn live_tweet_count(&self, category_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM tweet_categories tc
             JOIN tweets t ON t.id = tc.tweet_id
             WHERE tc.category_id = ? AND t.is_archived = 0",
            params![category_id],
            |row| row.get(0),
        )?)
    }

    /// Delete an empty, non-default category.
    ///
    /// # Errors
    ///
    /// `Validation` when the category is the default or still has tweets.
    pub fn delete_category(&self, user_id: i64, category_id: i64) -> Result<()> {
        let category = self.require_category(user_id, category_id)?;
        if category.is_default {
            return Err(ShelfError::validation("the default category cannot be deleted"));
        }
        let count = self.live_tweet_count(category_id)?.max(category.tweet_count);
        if count > 0 {
            return Err(ShelfError::validation(format!(
                "category '{}' still has {count} tweets",
                category.name
            )));
        }
        self.conn
            .execute("DELETE FROM categories WHERE id = ?", params![category_id])?;
        info!(user_id, category_id, category = %category.name, "Category deleted");
        Ok(())
    }

    /// Move every non-archived tweet of `from_id` into `to_id`. Tweets already
    /// in the target keep that row; primary status carries over. Returns the
    /// number of tweets moved.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown categories, `Validation` when both are equal.
    pub fn move_tweets(&mut self, user_id: i64, from_id: i64, to_id: i64) -> Result<usize> {
        if from_id == to_id {
            return Err(ShelfError::validation("source and target category are the same"));
        }
        let source = self.require_category(user_id, from_id)?;
        let target = self.require_category(user_id, to_id)?;

        let tx = self.conn.transaction()?;
        let tweet_ids: Vec<(i64, bool)> = {
            let mut stmt = tx.prepare(
                "SELECT tc.tweet_id, tc.is_primary FROM tweet_categories tc
                 JOIN tweets t ON t.id = tc.tweet_id
                 WHERE tc.category_id = ? AND t.is_archived = 0",
            )?;
            stmt.query_map(params![from_id], |row| {
                Ok((row.get(0)?, row.get::<_, i32>(1)? != 0))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (tweet_id, was_primary) in &tweet_ids {
            let in_target: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM tweet_categories WHERE tweet_id = ? AND category_id = ?)",
                params![tweet_id, to_id],
                |row| row.get(0),
            )?;
            if in_target {
                tx.execute(
                    "DELETE FROM tweet_categories WHERE tweet_id = ? AND category_id = ?",
                    params![tweet_id, from_id],
                )?;
                if *was_primary {
                    tx.execute(
                        "UPDATE tweet_categories SET is_primary = 1 WHERE tweet_id = ? AND category_id = ?",
                        params![tweet_id, to_id],
                    )?;
                }
            } else {
                tx.execute(
                    "UPDATE tweet_categories SET category_id = ? WHERE tweet_id = ? AND category_id = ?",
                    params![to_id, tweet_id, from_id],
                )?;
            }
        }

        tx.execute(
            "UPDATE tweets SET category = ? WHERE user_id = ? AND category = ? AND is_archived = 0",
            params![target.name, user_id, source.name],
        )?;
        tx.commit()?;

        self.recompute_counts(user_id)?;
        info!(
            user_id,
            from = %source.name,
            to = %target.name,
            moved = tweet_ids.len(),
            "Tweets moved between categories"
        );
        Ok(tweet_ids.len())
    }

    // =========================================================================
    // Tweets
    // =========================================================================

    /// Insert a tweet, or refresh engagement counters when the external id is
    /// already stored. Content and author fields are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn upsert_tweet(&self, user_id: i64, tweet: &NewTweet) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM tweets WHERE tweet_id = ?",
                params![tweet.tweet_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE tweets SET reply_count = ?, like_count = ?, retweet_count = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    tweet.reply_count,
                    tweet.like_count,
                    tweet.retweet_count,
                    fmt_ts(now),
                    id
                ],
            )?;
            return Ok(UpsertOutcome::Updated(id));
        }

        self.conn.execute(
            "INSERT INTO tweets (tweet_id, user_id, content, author_id, author_username, author_name,
                 created_at_twitter, bookmarked_at, reply_count, like_count, retweet_count,
                 media_urls, hashtags, mentions, category, is_archived, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, ?, ?)",
            params![
                tweet.tweet_id,
                user_id,
                tweet.content,
                tweet.author_id,
                tweet.author_username,
                tweet.author_name,
                tweet.created_at_twitter.map(fmt_ts),
                fmt_ts(tweet.bookmarked_at.unwrap_or(now)),
                tweet.reply_count,
                tweet.like_count,
                tweet.retweet_count,
                json_list(&tweet.media_urls)?,
                json_list(&tweet.hashtags)?,
                json_list(&tweet.mentions)?,
                fmt_ts(now),
                fmt_ts(now)
            ],
        )?;
        Ok(UpsertOutcome::Inserted(self.conn.last_insert_rowid()))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tweet_exists(&self, tweet_id: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tweets WHERE tweet_id = ?)",
            params![tweet_id],
            |row| row.get(0),
        )?)
    }

    /// Fetch by internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_tweet(&self, id: i64) -> Result<Option<Tweet>> {
        let sql = format!("SELECT {TWEET_COLUMNS} FROM tweets t WHERE t.id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![id], tweet_from_row)
            .optional()?)
    }

    /// Fetch by internal id, scoped to the owning user.
    ///
    /// # Errors
    ///
    /// `NotFound` when the tweet does not exist or belongs to someone else.
    pub fn get_user_tweet(&self, user_id: i64, id: i64) -> Result<Tweet> {
        self.get_tweet(id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| ShelfError::not_found("Tweet", id))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_tweet_by_external_id(&self, tweet_id: &str) -> Result<Option<Tweet>> {
        let sql = format!("SELECT {TWEET_COLUMNS} FROM tweets t WHERE t.tweet_id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![tweet_id], tweet_from_row)
            .optional()?)
    }

    /// Filtered, paginated listing. Returns the page and the total match count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tweets(&self, user_id: i64, query: &TweetQuery) -> Result<(Vec<Tweet>, i64)> {
        let mut clauses = vec!["t.user_id = ?".to_string()];
        let mut args: Vec<Value> = vec![Value::Integer(user_id)];

        if !query.include_archived {
            clauses.push("t.is_archived = 0".to_string());
        }
        if let Some(category) = query.category.as_deref().filter(|c| *c != "all") {
            clauses.push(
                "EXISTS (SELECT 1 FROM tweet_categories tc JOIN categories c ON c.id = tc.category_id
                         WHERE tc.tweet_id = t.id AND c.name = ?)"
                    .to_string(),
            );
            args.push(Value::Text(category.to_string()));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            clauses.push(
                "(instr(lower(t.content), lower(?)) > 0
                  OR instr(lower(COALESCE(t.author_username, '')), lower(?)) > 0
                  OR instr(lower(COALESCE(t.author_name, '')), lower(?)) > 0)"
                    .to_string(),
            );
            for _ in 0..3 {
                args.push(Value::Text(search.to_string()));
            }
        }
        let where_sql = clauses.join(" AND ");

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM tweets t WHERE {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let direction = if query.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT {TWEET_COLUMNS} FROM tweets t WHERE {where_sql}
             ORDER BY {} {direction}, t.id {direction} LIMIT ? OFFSET ?",
            query.sort.column()
        );
        args.push(Value::Integer(limit_to_i64(query.limit)));
        args.push(Value::Integer(limit_to_i64(query.offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let tweets = stmt
            .query_map(params_from_iter(args.iter()), tweet_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((tweets, total))
    }

    /// Most recent non-archived tweets, newest bookmark first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_tweets(&self, user_id: i64, limit: usize) -> Result<Vec<Tweet>> {
        let query = TweetQuery {
            limit,
            ..TweetQuery::default()
        };
        Ok(self.list_tweets(user_id, &query)?.0)
    }

    /// Soft delete.
    ///
    /// # Errors
    ///
    /// `NotFound` when the tweet is unknown for this user.
    pub fn archive_tweet(&self, user_id: i64, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tweets SET is_archived = 1, updated_at = ? WHERE id = ? AND user_id = ?",
            params![fmt_ts(Utc::now()), id, user_id],
        )?;
        if changed == 0 {
            return Err(ShelfError::not_found("Tweet", id));
        }
        Ok(())
    }

    /// Non-archived tweet count per category name, from the association table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn category_counts(&self, user_id: i64) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, COUNT(t.id) FROM categories c
             LEFT JOIN tweet_categories tc ON tc.category_id = c.id
             LEFT JOIN tweets t ON t.id = tc.tweet_id AND t.is_archived = 0
             WHERE c.user_id = ?
             GROUP BY c.id ORDER BY COUNT(t.id) DESC, c.sort_order",
        )?;
        let counts = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_tweets(&self, user_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM tweets WHERE user_id = ? AND is_archived = 0",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    /// Non-archived tweets bookmarked at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_tweets_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM tweets
             WHERE user_id = ? AND is_archived = 0 AND bookmarked_at >= ?",
            params![user_id, fmt_ts(since)],
            |row| row.get(0),
        )?)
    }

    /// Bookmarks per UTC day since `since`, oldest first. Days without
    /// bookmarks are absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn daily_bookmark_counts(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(bookmarked_at, 1, 10) AS day, COUNT(*) FROM tweets
             WHERE user_id = ? AND is_archived = 0 AND bookmarked_at >= ?
             GROUP BY day ORDER BY day",
        )?;
        let rows = stmt
            .query_map(params![user_id, fmt_ts(since)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(day, count)| {
                NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .ok()
                    .map(|date| (date, count))
            })
            .collect())
    }

    // =========================================================================
    // Tweet/category associations
    // =========================================================================

    /// Replace every association of a tweet in one transaction, creating
    /// missing categories, and mirror the primary name onto the tweet.
    /// Returns the primary category name.
    ///
    /// # Errors
    ///
    /// On any failure the transaction is rolled back and the previous
    /// associations stay intact.
    pub fn replace_tweet_categories(
        &mut self,
        tweet_id: i64,
        user_id: i64,
        categories: &[CategoryResult],
    ) -> Result<Option<String>> {
        let tx = self.conn.transaction()?;

        let owner: Option<i64> = tx
            .query_row(
                "SELECT user_id FROM tweets WHERE id = ?",
                params![tweet_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner != Some(user_id) {
            return Err(ShelfError::not_found("Tweet", tweet_id));
        }

        tx.execute(
            "DELETE FROM tweet_categories WHERE tweet_id = ?",
            params![tweet_id],
        )?;

        let now = fmt_ts(Utc::now());
        let mut primary = None;
        for result in categories {
            let category_id = ensure_category(&tx, user_id, &result.category)?;
            tx.execute(
                "INSERT INTO tweet_categories (tweet_id, category_id, confidence, is_primary, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (tweet_id, category_id) DO UPDATE SET
                     confidence = MAX(confidence, excluded.confidence),
                     is_primary = MAX(is_primary, excluded.is_primary)",
                params![
                    tweet_id,
                    category_id,
                    result.confidence,
                    i32::from(result.is_primary),
                    now
                ],
            )?;
            if result.is_primary && primary.is_none() {
                primary = Some(result.category.clone());
            }
        }

        tx.execute(
            "UPDATE tweets SET category = ?, updated_at = ? WHERE id = ?",
            params![primary, now, tweet_id],
        )?;
        tx.commit()?;
        Ok(primary)
    }

    /// Associations of a tweet, primary first then by confidence.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_tweet_categories(&self, tweet_id: i64) -> Result<Vec<CategoryView>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.color, tc.confidence, tc.is_primary
             FROM tweet_categories tc JOIN categories c ON c.id = tc.category_id
             WHERE tc.tweet_id = ?
             ORDER BY tc.is_primary DESC, tc.confidence DESC, c.name",
        )?;
        let views = stmt
            .query_map(params![tweet_id], |row| {
                Ok(CategoryView {
                    category_id: row.get(0)?,
                    name: row.get(1)?,
                    color: row.get(2)?,
                    confidence: row.get(3)?,
                    is_primary: row.get::<_, i32>(4)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(views)
    }

    /// Manual override: the tweet ends up with exactly one association.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown tweet or category.
    pub fn set_tweet_category(&mut self, user_id: i64, tweet_id: i64, category_id: i64) -> Result<()> {
        let category = self.require_category(user_id, category_id)?;
        let manual = CategoryResult {
            category: category.name,
            confidence: 1.0,
            is_primary: true,
            methods: Vec::new(),
            details: std::collections::BTreeMap::new(),
        };
        self.replace_tweet_categories(tweet_id, user_id, std::slice::from_ref(&manual))?;
        Ok(())
    }

    /// Rewrite cached `tweet_count` for all of a user's categories.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn recompute_counts(&self, user_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE categories SET tweet_count = (
                 SELECT COUNT(*) FROM tweet_categories tc
                 JOIN tweets t ON t.id = tc.tweet_id
                 WHERE tc.category_id = categories.id AND t.is_archived = 0
             ) WHERE user_id = ?",
            params![user_id],
        )?)
    }

    // =========================================================================
    // Sync logs
    // =========================================================================

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_sync_log(&self, user_id: i64, started_at: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_logs (user_id, status, started_at) VALUES (?, ?, ?)",
            params![user_id, SyncStatus::Running.as_str(), fmt_ts(started_at)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn finish_sync_log(
        &self,
        log_id: i64,
        status: SyncStatus,
        tweets_found: usize,
        tweets_new: usize,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_logs SET status = ?, tweets_found = ?, tweets_new = ?, duration_ms = ?,
                    completed_at = ?, error = ?
             WHERE id = ?",
            params![
                status.as_str(),
                limit_to_i64(tweets_found),
                limit_to_i64(tweets_new),
                i64::try_from(duration_ms).unwrap_or(i64::MAX),
                fmt_ts(Utc::now()),
                error,
                log_id
            ],
        )?;
        Ok(())
    }

    /// Mark a user's `running` logs started before `cutoff` as interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn reconcile_stale_logs(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE sync_logs SET status = ?, error = 'interrupted', completed_at = ?
             WHERE user_id = ? AND status = ? AND started_at < ?",
            params![
                SyncStatus::Error.as_str(),
                fmt_ts(Utc::now()),
                user_id,
                SyncStatus::Running.as_str(),
                fmt_ts(cutoff)
            ],
        )?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_sync_log(&self, log_id: i64) -> Result<Option<SyncLog>> {
        let sql = format!("SELECT {SYNC_LOG_COLUMNS} FROM sync_logs WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![log_id], sync_log_from_row)
            .optional()?)
    }

    /// Logs started at or after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_sync_logs(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SyncLog>> {
        let sql = format!(
            "SELECT {SYNC_LOG_COLUMNS} FROM sync_logs
             WHERE user_id = ? AND started_at >= ?
             ORDER BY started_at DESC, id DESC LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let logs = stmt
            .query_map(
                params![user_id, fmt_ts(since), limit_to_i64(limit)],
                sync_log_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sync_status_aggregates(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncStatusAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*), AVG(duration_ms),
                    COALESCE(SUM(tweets_found), 0), COALESCE(SUM(tweets_new), 0)
             FROM sync_logs WHERE user_id = ? AND started_at >= ?
             GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map(params![user_id, fmt_ts(since)], |row| {
                let status: String = row.get(0)?;
                Ok(SyncStatusAggregate {
                    status: status.parse().unwrap_or(SyncStatus::Error),
                    runs: row.get(1)?,
                    avg_duration_ms: row.get(2)?,
                    tweets_found: row.get(3)?,
                    tweets_new: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete logs of every user started before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_sync_logs(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM sync_logs WHERE started_at < ?",
            params![fmt_ts(cutoff)],
        )?;
        if purged > 0 {
            info!(purged, "Purged old sync logs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GENERAL_CATEGORY, SignalMethod};
    use chrono::Duration;

    fn test_user(storage: &mut Storage) -> User {
        storage
            .bootstrap_user("1001", "alice", Some("Alice"), Some("tok"), Some("ref"))
            .unwrap()
            .0
    }

    fn create_test_tweet(id: &str, text: &str) -> NewTweet {
        NewTweet {
            tweet_id: id.to_string(),
            content: text.to_string(),
            author_username: Some("rustlang".to_string()),
            author_name: Some("Rust".to_string()),
            like_count: 3,
            ..NewTweet::default()
        }
    }

    fn ranked(name: &str, confidence: f64, primary: bool) -> CategoryResult {
        let mut result = CategoryResult::signal(name, confidence, SignalMethod::Keywords);
        result.is_primary = primary;
        result
    }

    #[test]
    fn test_create_database() {
        let storage = Storage::open_memory().unwrap();
        assert_eq!(storage.schema_version(), SCHEMA_VERSION);
        assert!(storage.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_creates_default_categories_once() {
        let mut storage = Storage::open_memory().unwrap();
        let (user, created) = storage
            .bootstrap_user("1001", "alice", None, Some("a"), None)
            .unwrap();
        assert!(created);

        let categories = storage.list_categories(user.id).unwrap();
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![GENERAL_CATEGORY, "Technology", "News", "Education", "Inspiration"]
        );
        assert_eq!(categories.iter().filter(|c| c.is_default).count(), 1);
        assert!(categories[0].is_default);

        let (again, created) = storage
            .bootstrap_user("1001", "alice2", None, Some("b"), None)
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, user.id);
        assert_eq!(again.username, "alice2");
        assert_eq!(again.access_token.as_deref(), Some("b"));
        assert_eq!(storage.list_categories(user.id).unwrap().len(), 5);
    }

    #[test]
    fn test_tokens_set_and_clear() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);

        storage.set_tokens(user.id, "new-access", None).unwrap();
        let reloaded = storage.get_user(user.id).unwrap().unwrap();
        assert_eq!(reloaded.access_token.as_deref(), Some("new-access"));
        assert_eq!(reloaded.refresh_token.as_deref(), Some("ref"));
        assert_eq!(storage.list_syncable_users().unwrap().len(), 1);

        storage.clear_tokens(user.id).unwrap();
        let cleared = storage.get_user(user.id).unwrap().unwrap();
        assert!(cleared.access_token.is_none());
        assert!(cleared.refresh_token.is_none());
        assert!(storage.list_syncable_users().unwrap().is_empty());

        assert!(matches!(
            storage.clear_tokens(999),
            Err(ShelfError::NotFound { .. })
        ));
    }

    #[test]
    fn test_upsert_updates_counters_only() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);

        let mut tweet = create_test_tweet("42", "Original content #rust");
        tweet.hashtags = vec!["#rust".to_string()];
        let first = storage.upsert_tweet(user.id, &tweet).unwrap();
        assert!(first.is_new());

        tweet.content = "Edited content".to_string();
        tweet.like_count = 99;
        let second = storage.upsert_tweet(user.id, &tweet).unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id()));

        let stored = storage.get_tweet(first.id()).unwrap().unwrap();
        assert_eq!(stored.content, "Original content #rust");
        assert_eq!(stored.like_count, 99);
        assert_eq!(stored.hashtags(), vec!["#rust"]);
        assert!(stored.mentions_json.is_none());
        assert!(stored.media_urls_json.is_none());
    }

    #[test]
    fn test_manual_category_sorts_before_auto_created() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "what a goal"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(id, user.id, &[ranked("Sports", 0.9, true)])
            .unwrap();

        let manual = storage
            .create_category(user.id, "Recipes", None, None)
            .unwrap();
        let auto = storage
            .get_category_by_name(user.id, "Sports")
            .unwrap()
            .unwrap();
        assert!(manual.sort_order < auto.sort_order);
        assert!(manual.sort_order < AUTO_CATEGORY_SORT_BASE);

        let names: Vec<String> = storage
            .list_categories(user.id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec!["General", "Technology", "News", "Education", "Inspiration", "Recipes", "Sports"]
        );
    }

    #[test]
    fn test_replace_and_get_categories_primary_first() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "text"))
            .unwrap()
            .id();

        let primary = storage
            .replace_tweet_categories(
                id,
                user.id,
                &[
                    ranked("Technology", 0.9, true),
                    ranked("Gardening", 0.95, false),
                    ranked("News", 0.4, false),
                ],
            )
            .unwrap();
        assert_eq!(primary.as_deref(), Some("Technology"));

        let views = storage.get_tweet_categories(id).unwrap();
        let names: Vec<&str> = views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["Technology", "Gardening", "News"]);
        assert!(views[0].is_primary);
        assert_eq!(views.iter().filter(|v| v.is_primary).count(), 1);

        let gardening = storage
            .get_category_by_name(user.id, "Gardening")
            .unwrap()
            .unwrap();
        assert!(gardening.sort_order >= AUTO_CATEGORY_SORT_BASE);
        assert!(CATEGORY_PALETTE.iter().any(|(_, hex)| *hex == gardening.color));

        let tweet = storage.get_tweet(id).unwrap().unwrap();
        assert_eq!(tweet.category.as_deref(), Some("Technology"));
    }

    #[test]
    fn test_replace_rolls_back_on_failure() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "text"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(id, user.id, &[ranked("News", 0.7, true)])
            .unwrap();

        // Confidence outside [0,1] violates the CHECK constraint mid-transaction.
        let result = storage.replace_tweet_categories(
            id,
            user.id,
            &[ranked("Cooking", 0.8, true), ranked("Travel", 1.5, false)],
        );
        assert!(matches!(result, Err(ShelfError::Persistence(_))));

        let views = storage.get_tweet_categories(id).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "News");
        assert!(storage.get_category_by_name(user.id, "Cooking").unwrap().is_none());
        let tweet = storage.get_tweet(id).unwrap().unwrap();
        assert_eq!(tweet.category.as_deref(), Some("News"));
    }

    #[test]
    fn test_replace_rejects_foreign_tweet() {
        let mut storage = Storage::open_memory().unwrap();
        let alice = test_user(&mut storage);
        let (bob, _) = storage
            .bootstrap_user("2002", "bob", None, None, None)
            .unwrap();
        let id = storage
            .upsert_tweet(alice.id, &create_test_tweet("1", "text"))
            .unwrap()
            .id();
        let result = storage.replace_tweet_categories(id, bob.id, &[ranked("News", 0.5, true)]);
        assert!(matches!(result, Err(ShelfError::NotFound { .. })));
    }

    #[test]
    fn test_recompute_counts_ignores_archived() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        for n in 0..3 {
            let id = storage
                .upsert_tweet(user.id, &create_test_tweet(&n.to_string(), "text"))
                .unwrap()
                .id();
            storage
                .replace_tweet_categories(id, user.id, &[ranked("News", 0.7, true)])
                .unwrap();
            if n == 0 {
                storage.archive_tweet(user.id, id).unwrap();
            }
        }

        storage.recompute_counts(user.id).unwrap();
        let news = storage.get_category_by_name(user.id, "News").unwrap().unwrap();
        assert_eq!(news.tweet_count, 2);
        let counts = storage.category_counts(user.id).unwrap();
        assert_eq!(counts[0], ("News".to_string(), 2));
    }

    #[test]
    fn test_delete_category_rules() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let general = storage
            .get_category_by_name(user.id, GENERAL_CATEGORY)
            .unwrap()
            .unwrap();
        assert!(matches!(
            storage.delete_category(user.id, general.id),
            Err(ShelfError::Validation { .. })
        ));

        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "text"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(id, user.id, &[ranked("News", 0.7, true)])
            .unwrap();
        storage.recompute_counts(user.id).unwrap();
        let news = storage.get_category_by_name(user.id, "News").unwrap().unwrap();
        assert!(matches!(
            storage.delete_category(user.id, news.id),
            Err(ShelfError::Validation { .. })
        ));

        let empty = storage
            .get_category_by_name(user.id, "Education")
            .unwrap()
            .unwrap();
        storage.delete_category(user.id, empty.id).unwrap();
        assert!(storage.get_category(user.id, empty.id).unwrap().is_none());
        assert_eq!(storage.count_tweets(user.id).unwrap(), 1);
    }

    #[test]
    fn test_create_and_rename_category() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);

        let created = storage
            .create_category(user.id, "  Recipes ", Some("food"), None)
            .unwrap();
        assert_eq!(created.name, "Recipes");
        assert_eq!(created.color, DEFAULT_CATEGORY_COLOR);
        assert_eq!(created.sort_order, 5);
        assert!(matches!(
            storage.create_category(user.id, "Recipes", None, None),
            Err(ShelfError::Validation { .. })
        ));

        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "pasta"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(id, user.id, &[ranked("Recipes", 0.8, true)])
            .unwrap();

        let renamed = storage
            .update_category(
                user.id,
                created.id,
                &CategoryUpdate {
                    name: Some("Cooking".to_string()),
                    ..CategoryUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Cooking");
        let tweet = storage.get_tweet(id).unwrap().unwrap();
        assert_eq!(tweet.category.as_deref(), Some("Cooking"));

        let general = storage
            .get_category_by_name(user.id, GENERAL_CATEGORY)
            .unwrap()
            .unwrap();
        assert!(storage
            .update_category(user.id, general.id, &CategoryUpdate::default())
            .is_err());
        assert!(matches!(
            storage.update_category(
                user.id,
                created.id,
                &CategoryUpdate {
                    name: Some("News".to_string()),
                    ..CategoryUpdate::default()
                }
            ),
            Err(ShelfError::Validation { .. })
        ));
    }

    #[test]
    fn test_move_tweets_merges_associations() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let a = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "one"))
            .unwrap()
            .id();
        let b = storage
            .upsert_tweet(user.id, &create_test_tweet("2", "two"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(a, user.id, &[ranked("News", 0.8, true)])
            .unwrap();
        storage
            .replace_tweet_categories(
                b,
                user.id,
                &[ranked("News", 0.8, true), ranked("Technology", 0.5, false)],
            )
            .unwrap();

        let news = storage.get_category_by_name(user.id, "News").unwrap().unwrap();
        let tech = storage
            .get_category_by_name(user.id, "Technology")
            .unwrap()
            .unwrap();
        let moved = storage.move_tweets(user.id, news.id, tech.id).unwrap();
        assert_eq!(moved, 2);

        for id in [a, b] {
            let views = storage.get_tweet_categories(id).unwrap();
            assert_eq!(views.len(), 1);
            assert_eq!(views[0].name, "Technology");
            assert!(views[0].is_primary);
            let tweet = storage.get_tweet(id).unwrap().unwrap();
            assert_eq!(tweet.category.as_deref(), Some("Technology"));
        }
        let tech = storage.get_category(user.id, tech.id).unwrap().unwrap();
        assert_eq!(tech.tweet_count, 2);
    }

    #[test]
    fn test_list_tweets_filters_and_paginates() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        for n in 0..5 {
            let mut tweet = create_test_tweet(&n.to_string(), &format!("post number {n}"));
            tweet.like_count = n;
            tweet.bookmarked_at = Some(Utc::now() - Duration::minutes(n));
            let id = storage.upsert_tweet(user.id, &tweet).unwrap().id();
            if n % 2 == 0 {
                storage
                    .replace_tweet_categories(id, user.id, &[ranked("News", 0.6, true)])
                    .unwrap();
            }
        }

        let (page, total) = storage
            .list_tweets(
                user.id,
                &TweetQuery {
                    limit: 2,
                    offset: 2,
                    ..TweetQuery::default()
                },
            )
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].tweet_id, "2");

        let (news, total) = storage
            .list_tweets(
                user.id,
                &TweetQuery {
                    category: Some("News".to_string()),
                    sort: TweetSort::LikeCount,
                    ..TweetQuery::default()
                },
            )
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(news[0].tweet_id, "4");

        let (found, _) = storage
            .list_tweets(
                user.id,
                &TweetQuery {
                    search: Some("NUMBER 3".to_string()),
                    ..TweetQuery::default()
                },
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tweet_id, "3");
    }

    #[test]
    fn test_sync_log_lifecycle_and_reconcile() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);

        let stale = storage
            .create_sync_log(user.id, Utc::now() - Duration::hours(2))
            .unwrap();
        let fresh = storage.create_sync_log(user.id, Utc::now()).unwrap();

        let reconciled = storage
            .reconcile_stale_logs(user.id, Utc::now() - Duration::hours(1))
            .unwrap();
        assert_eq!(reconciled, 1);
        let stale_log = storage.get_sync_log(stale).unwrap().unwrap();
        assert_eq!(stale_log.status, SyncStatus::Error);
        assert_eq!(stale_log.error.as_deref(), Some("interrupted"));

        storage
            .finish_sync_log(fresh, SyncStatus::Success, 10, 4, 1200, None)
            .unwrap();
        let done = storage.get_sync_log(fresh).unwrap().unwrap();
        assert_eq!(done.status, SyncStatus::Success);
        assert_eq!(done.tweets_found, 10);
        assert!(done.completed_at.is_some());

        let aggregates = storage
            .sync_status_aggregates(user.id, Utc::now() - Duration::days(7))
            .unwrap();
        assert_eq!(aggregates.len(), 2);

        let purged = storage
            .purge_sync_logs(Utc::now() - Duration::minutes(30))
            .unwrap();
        assert_eq!(purged, 1);
        assert!(storage.get_sync_log(stale).unwrap().is_none());
    }

    #[test]
    fn test_delete_user_cascades() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        let id = storage
            .upsert_tweet(user.id, &create_test_tweet("1", "text"))
            .unwrap()
            .id();
        storage
            .replace_tweet_categories(id, user.id, &[ranked("News", 0.7, true)])
            .unwrap();
        storage.create_sync_log(user.id, Utc::now()).unwrap();

        storage.delete_user(user.id).unwrap();
        assert!(storage.get_tweet(id).unwrap().is_none());
        assert!(storage.list_categories(user.id).unwrap().is_empty());
        assert!(storage.get_tweet_categories(id).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_users() {
        let mut storage = Storage::open_memory().unwrap();
        let user = test_user(&mut storage);
        storage
            .bootstrap_user("2002", "bob", None, None, None)
            .unwrap();
        storage.touch_last_sync(user.id, Utc::now()).unwrap();
        let inactive = storage
            .count_inactive_users(Utc::now() - Duration::days(30))
            .unwrap();
        assert_eq!(inactive, 1);
    }
}

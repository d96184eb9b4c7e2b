//! Configuration system for tweetshelf.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/tweetshelf/config.toml`
//! 3. **Environment variables** - `TWEETSHELF_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/tweetshelf/tweetshelf.db"
//!
//! [sync]
//! page_size = 100
//! max_tweets_per_sync = 1000
//! interval_minutes = 30
//!
//! [provider]
//! api_base = "https://api.twitter.com"
//! client_id = "..."
//!
//! [categorization]
//! ai_enabled = false
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure for tweetshelf.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// Sync pipeline and scheduler tuning.
    pub sync: SyncConfig,
    /// External tweets API settings.
    pub provider: ProviderConfig,
    /// Classifier settings.
    pub categorization: CategorizationConfig,
    /// Output formatting configuration.
    pub output: OutputConfig,
}

/// Path configuration for the database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `TWEETSHELF_DB`
    pub db: Option<PathBuf>,
}

/// Sync pipeline and scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records requested per provider page.
    pub page_size: u32,
    /// Safety cap on records fetched per run.
    /// Environment variable: `TWEETSHELF_MAX_TWEETS`
    pub max_tweets_per_sync: usize,
    /// Pause between consecutive pages.
    pub inter_page_delay_ms: u64,
    /// Rate-limit retries before the error is surfaced.
    pub max_retries: u32,
    /// Pause between users in a scheduler pass.
    pub inter_user_delay_ms: u64,
    /// Cooldown after a user hits the rate limit during a scheduler pass.
    pub rate_limit_cooldown_secs: u64,
    /// Pause after any other per-user failure.
    pub error_pause_ms: u64,
    /// Scheduler tick interval for `daemon`.
    /// Environment variable: `TWEETSHELF_INTERVAL_MINUTES`
    pub interval_minutes: u64,
    /// Sync logs older than this are purged.
    pub log_retention_days: i64,
    /// `running` logs older than this are treated as interrupted.
    pub stale_running_minutes: i64,
}

/// External provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Environment variable: `TWEETSHELF_API_BASE`
    pub api_base: String,
    /// OAuth2 token endpoint used for refresh.
    pub token_url: String,
    /// Environment variable: `TWEETSHELF_CLIENT_ID`
    pub client_id: Option<String>,
    /// Environment variable: `TWEETSHELF_CLIENT_SECRET`
    pub client_secret: Option<String>,
    pub timeout_secs: u64,
}

/// Categorization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    /// Zero-shot inference endpoint; the AI signal is skipped without one.
    /// Environment variable: `TWEETSHELF_MODEL_ENDPOINT`
    pub model_endpoint: Option<String>,
    /// Environment variable: `TWEETSHELF_MODEL_TOKEN`
    pub model_token: Option<String>,
    pub model_timeout_secs: u64,
    pub ai_enabled: bool,
}

/// Output formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty.
    pub format: String,

    /// Enable colored output.
    pub colors: bool,

    /// Suppress non-essential output (progress bars, etc.).
    pub quiet: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_tweets_per_sync: 1000,
            inter_page_delay_ms: 1000,
            max_retries: 3,
            inter_user_delay_ms: 2000,
            rate_limit_cooldown_secs: 15 * 60,
            error_pause_ms: 5000,
            interval_minutes: 30,
            log_retention_days: 30,
            stale_running_minutes: 60,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn inter_page_delay(&self) -> Duration {
        Duration::from_millis(self.inter_page_delay_ms)
    }

    #[must_use]
    pub const fn inter_user_delay(&self) -> Duration {
        Duration::from_millis(self.inter_user_delay_ms)
    }

    #[must_use]
    pub const fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    #[must_use]
    pub const fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Zero every pause; used by tests and one-shot CLI runs against mocks.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.inter_page_delay_ms = 0;
        self.inter_user_delay_ms = 0;
        self.rate_limit_cooldown_secs = 0;
        self.error_pause_ms = 0;
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            client_id: None,
            client_secret: None,
            timeout_secs: 30,
        }
    }
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            model_endpoint: None,
            model_token: None,
            model_timeout_secs: 10,
            ai_enabled: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/tweetshelf/config.toml)
    /// 3. Compiled defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        config.apply_env_overrides();

        debug!("Configuration loaded: {:?}", config.redacted());
        config
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &PathBuf) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from: {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tweetshelf").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var("TWEETSHELF_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        if let Some(n) = env_parse("TWEETSHELF_MAX_TWEETS") {
            self.sync.max_tweets_per_sync = n;
        }
        if let Some(n) = env_parse("TWEETSHELF_INTERVAL_MINUTES") {
            self.sync.interval_minutes = n;
        }

        if let Ok(base) = std::env::var("TWEETSHELF_API_BASE") {
            self.provider.api_base = base;
        }
        if let Ok(id) = std::env::var("TWEETSHELF_CLIENT_ID") {
            self.provider.client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("TWEETSHELF_CLIENT_SECRET") {
            self.provider.client_secret = Some(secret);
        }

        if let Ok(endpoint) = std::env::var("TWEETSHELF_MODEL_ENDPOINT") {
            self.categorization.model_endpoint = Some(endpoint);
            self.categorization.ai_enabled = true;
        }
        if let Ok(token) = std::env::var("TWEETSHELF_MODEL_TOKEN") {
            self.categorization.model_token = Some(token);
        }

        if let Ok(format) = std::env::var("TWEETSHELF_FORMAT") {
            self.output.format = format;
        }
        if std::env::var("TWEETSHELF_NO_COLOR").is_ok() || std::env::var("NO_COLOR").is_ok() {
            self.output.colors = false;
        }
        if std::env::var("TWEETSHELF_QUIET").is_ok() {
            self.output.quiet = true;
        }
    }

    /// Merge another config into this one (other takes precedence).
    fn merge(&mut self, other: Self) {
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }

        self.sync = other.sync;

        self.provider.api_base = other.provider.api_base;
        self.provider.token_url = other.provider.token_url;
        self.provider.timeout_secs = other.provider.timeout_secs;
        if other.provider.client_id.is_some() {
            self.provider.client_id = other.provider.client_id;
        }
        if other.provider.client_secret.is_some() {
            self.provider.client_secret = other.provider.client_secret;
        }

        if other.categorization.model_endpoint.is_some() {
            self.categorization.model_endpoint = other.categorization.model_endpoint;
        }
        if other.categorization.model_token.is_some() {
            self.categorization.model_token = other.categorization.model_token;
        }
        self.categorization.model_timeout_secs = other.categorization.model_timeout_secs;
        self.categorization.ai_enabled = other.categorization.ai_enabled;

        self.output = other.output;
    }

    /// Copy with secrets blanked, for logging and `config show`.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.provider.client_secret.is_some() {
            copy.provider.client_secret = Some("***".to_string());
        }
        if copy.categorization.model_token.is_some() {
            copy.categorization.model_token = Some("***".to_string());
        }
        copy
    }

    /// Get the database path, using defaults if not configured.
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Save the current configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> std::io::Result<()> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

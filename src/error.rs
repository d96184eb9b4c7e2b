//! Custom error types for tweetshelf.
//!
//! Provides structured error handling with detailed context for logging,
//! while exposing only an opaque code and a generic message to callers
//! that sit outside the library (CLI output, importers).

use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failed call to the external tweets provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection failures and 5xx responses.
    Transient,
    /// HTTP 429; carries reset/remaining hints when the provider sent them.
    RateLimited,
    /// HTTP 401; the access token is missing, invalid or expired.
    Unauthorized,
    /// Any other 4xx response.
    Permanent,
}

/// Rate-limit hints reported by the provider alongside a 429.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Epoch seconds after which the quota replenishes.
    pub reset: Option<i64>,
    /// Remaining requests in the current window.
    pub remaining: Option<u32>,
}

/// Error returned by a [`TweetsProvider`](crate::provider::TweetsProvider).
#[derive(Error, Debug, Clone)]
#[error("provider error ({kind:?}, status {status:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl ProviderError {
    pub fn rate_limited(reset: Option<i64>, remaining: Option<u32>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            status: Some(429),
            message: "rate limit exceeded".to_string(),
            rate_limit: Some(RateLimitInfo { reset, remaining }),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unauthorized,
            status: Some(401),
            message: message.into(),
            rate_limit: None,
        }
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            status,
            message: message.into(),
            rate_limit: None,
        }
    }

    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            status: Some(status),
            message: message.into(),
            rate_limit: None,
        }
    }

    /// Map an HTTP status onto the provider taxonomy.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>, rate_limit: RateLimitInfo) -> Self {
        match status {
            401 => Self::unauthorized(message),
            429 => Self::rate_limited(rate_limit.reset, rate_limit.remaining),
            500..=599 => Self::transient(Some(status), message),
            _ => Self::permanent(status, message),
        }
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::RateLimited)
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::Unauthorized)
    }
}

/// Primary error type for tweetshelf operations.
#[derive(Error, Debug)]
pub enum ShelfError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Bad caller input.
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    /// Entity lookup failed.
    #[error("{item_type} with ID '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// Missing, invalid or expired credential, or a failed refresh.
    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    // =========================================================================
    // External Provider Errors
    // =========================================================================
    /// External tweets API failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Category assignment could not be computed or stored.
    #[error("Categorization failed for {context}: {source}")]
    Categorization {
        context: String,
        #[source]
        source: Box<Self>,
    },

    /// A sync run failed for a reason other than the provider itself.
    #[error("Sync failed for user {user_id}: {source}")]
    Sync {
        user_id: i64,
        #[source]
        source: Box<Self>,
    },

    /// Unrecoverable classifier backend fault. Backend absence is not an error.
    #[error("Classifier backend error: {reason}")]
    Classification { reason: String },

    // =========================================================================
    // IO / Config Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for tweetshelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

impl ShelfError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(item_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            item_type,
            id: id.to_string(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Wrap a lower-level failure as a categorization error.
    pub fn categorization(context: impl Into<String>, source: Self) -> Self {
        Self::Categorization {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a non-provider failure that interrupted a sync run.
    pub fn sync(user_id: i64, source: Self) -> Self {
        match source {
            Self::Provider(_) | Self::Auth { .. } | Self::NotFound { .. } | Self::Sync { .. } => {
                source
            }
            other => Self::Sync {
                user_id,
                source: Box::new(other),
            },
        }
    }

    /// The provider error carried by this error, looking through wrappers.
    #[must_use]
    pub fn as_provider(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(err) => Some(err),
            Self::Categorization { source, .. } | Self::Sync { source, .. } => {
                source.as_provider()
            }
            _ => None,
        }
    }

    /// True when the provider rejected the call with HTTP 429.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.as_provider().is_some_and(ProviderError::is_rate_limited)
    }

    /// Check if this error is recoverable (user can fix it).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Auth { .. }
        )
    }

    /// Opaque code surfaced to callers; details stay in the log.
    #[must_use]
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Auth { .. } => "AUTH_ERROR",
            Self::Provider(err) if err.is_rate_limited() => "RATE_LIMITED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::Persistence(_) => "DATABASE_ERROR",
            Self::Categorization { .. } | Self::Classification { .. } => "CATEGORIZATION_ERROR",
            Self::Sync { .. } => "SYNC_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) | Self::Serialization(_) | Self::WithContext { .. } => "INTERNAL_ERROR",
        }
    }

    /// Generic message safe to show outside the library.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { reason } => reason.clone(),
            Self::NotFound { item_type, .. } => format!("{item_type} not found"),
            Self::Auth { .. } => "Authentication with the provider failed".to_string(),
            Self::Provider(err) if err.is_rate_limited() => {
                "Provider rate limit reached, try again later".to_string()
            }
            Self::Provider(_) | Self::Sync { .. } => {
                "Synchronization with the provider failed".to_string()
            }
            Self::Categorization { .. } | Self::Classification { .. } => {
                "Tweet categorization failed".to_string()
            }
            _ => "Internal error".to_string(),
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Auth { .. } => Some("Re-register the user with fresh tokens: 'tweetshelf user add'."),
            Self::NotFound { .. } => Some("List known ids with 'tweetshelf user list' or 'tweetshelf tweets list'."),
            Self::Config { .. } => Some("Regenerate the file with 'tweetshelf config init'."),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShelfError::with_context(context, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ShelfError::with_context(f(), e))
    }
}

// =============================================================================
// CLI Error Formatting Utilities
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    if !suggestions.is_empty() {
        output.push_str("\n\n   ");
        if suggestions.len() == 1 {
            let _ = write!(output, "{} {}", "Hint:".cyan(), suggestions[0]);
        } else {
            let _ = write!(output, "{}:", "Try".cyan());
            for suggestion in suggestions {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}

/// Render a library error for the terminal: public code, message and hint.
#[must_use]
pub fn format_shelf_error(err: &ShelfError) -> String {
    let title = format!("[{}] {}", err.public_code(), err.public_message());
    let hints: Vec<&str> = err.suggestion().into_iter().collect();
    format_error(&title, "", &hints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShelfError::not_found("Tweet", 42);
        assert!(err.to_string().contains("42"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_provider_status_mapping() {
        let info = RateLimitInfo {
            reset: Some(1_700_000_000),
            remaining: Some(0),
        };
        assert_eq!(
            ProviderError::from_status(429, "slow down", info).kind,
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::from_status(401, "expired", info).kind,
            ProviderErrorKind::Unauthorized
        );
        assert_eq!(
            ProviderError::from_status(503, "down", info).kind,
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderError::from_status(404, "gone", info).kind,
            ProviderErrorKind::Permanent
        );
        let limited = ProviderError::from_status(429, "", info);
        assert_eq!(limited.rate_limit.and_then(|r| r.reset), Some(1_700_000_000));
    }

    #[test]
    fn test_public_codes_hide_details() {
        let err = ShelfError::categorization(
            "tweet 7",
            ShelfError::Persistence(rusqlite::Error::InvalidQuery),
        );
        assert_eq!(err.public_code(), "CATEGORIZATION_ERROR");
        assert_eq!(err.public_message(), "Tweet categorization failed");

        let limited: ShelfError = ProviderError::rate_limited(None, None).into();
        assert_eq!(limited.public_code(), "RATE_LIMITED");
        assert!(limited.is_rate_limited());
    }

    #[test]
    fn test_rate_limit_seen_through_wrapper() {
        let inner: ShelfError = ProviderError::rate_limited(Some(1), Some(0)).into();
        let wrapped = ShelfError::categorization("sync", inner);
        assert!(wrapped.is_rate_limited());
    }

    #[test]
    fn sync_wrapper_keeps_provider_errors_unwrapped() {
        let limited = ShelfError::sync(3, ProviderError::rate_limited(None, None).into());
        assert!(matches!(limited, ShelfError::Provider(_)));

        let db = ShelfError::sync(3, rusqlite::Error::InvalidQuery.into());
        assert_eq!(db.public_code(), "SYNC_ERROR");
        assert!(db.to_string().contains("user 3"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: ShelfError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, ShelfError::Persistence(_)));
        assert_eq!(err.public_code(), "DATABASE_ERROR");
    }

    #[test]
    fn format_shelf_error_includes_code_and_hint() {
        let output = format_shelf_error(&ShelfError::auth("refresh rejected"));
        assert!(output.contains("AUTH_ERROR"));
        assert!(output.contains("user add"));
        assert!(!output.contains("refresh rejected"));
    }

    #[test]
    fn format_error_multiple_suggestions() {
        let output = format_error("Test Error", "Something went wrong", &["First", "Second"]);
        assert!(output.contains("First"));
        assert!(output.contains("Second"));
    }
}

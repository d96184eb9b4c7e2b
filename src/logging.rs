//! Logging setup for tweetshelf.
//!
//! Structured logging on top of `tracing`. All log output goes to stderr so
//! JSON written to stdout by the CLI stays machine-readable.
//!
//! # Usage
//!
//! ```rust
//! use tweetshelf::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(user_id = 1, "sync started");
//! ```

use std::time::Instant;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: LogLevel,
    /// Output format for log messages.
    pub format: LogFormat,
    /// Include timestamps in log output.
    pub timestamps: bool,
    /// Include target (module path) in log output.
    pub target: bool,
    /// Include span events (enter/exit).
    pub spans: bool,
    /// Enable ANSI colors in output.
    pub colors: bool,
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    /// No logging at all.
    Off,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable format.
    Pretty,
    /// Compact single-line format.
    Compact,
    /// Full format with thread and source location.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Errors only.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            spans: false,
            colors: true,
        }
    }

    /// Debug level with module targets.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            spans: false,
            colors: true,
        }
    }

    /// Info level, used by the long-running scheduler.
    #[must_use]
    pub const fn daemon() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Full,
            timestamps: true,
            target: true,
            spans: false,
            colors: false,
        }
    }

    #[must_use]
    pub const fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }
}

impl LogLevel {
    const fn to_filter_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(Self::Pretty),
            "compact" | "c" => Ok(Self::Compact),
            "full" | "f" => Ok(Self::Full),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

/// Initialize the global subscriber. Later calls are ignored.
///
/// `RUST_LOG` wins over `config.level` when set.
pub fn init_logging(config: &LogConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("tweetshelf={}", config.level.to_filter_string()))
    };

    let span_events = if config.spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .try_init()
                .ok();
        }
        (LogFormat::Pretty, false) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty().without_time())
                .try_init()
                .ok();
        }
        (LogFormat::Compact, true) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.compact())
                .try_init()
                .ok();
        }
        (LogFormat::Compact, false) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.compact().without_time())
                .try_init()
                .ok();
        }
        (LogFormat::Full, _) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    base.with_thread_names(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init()
                .ok();
        }
    }
}

/// Initialize logging for tests (silent unless `RUST_LOG` is set).
pub fn init_test_logging() {
    init_logging(&LogConfig {
        level: LogLevel::Off,
        ..LogConfig::default()
    });
}

/// Pick a preset from the global CLI flags.
///
/// `TWEETSHELF_LOG_FORMAT` (pretty, compact, full) overrides the preset's
/// format.
pub fn init_cli_logging(quiet: bool, verbose: bool, colors: bool, daemon: bool) {
    let mut config = if quiet {
        LogConfig::quiet()
    } else if verbose {
        LogConfig::verbose()
    } else if daemon {
        LogConfig::daemon()
    } else {
        LogConfig::default().with_colors(colors)
    };
    if !colors {
        config.colors = false;
    }
    if let Some(format) = std::env::var("TWEETSHELF_LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
    {
        config.format = format;
    }
    init_logging(&config);
}

/// Logs the start and outcome of a sync run or recategorization.
///
/// A guard dropped without `complete` or `fail` logs a warning, which is
/// how an early return through `?` shows up in the log.
pub struct OperationGuard {
    name: &'static str,
    user_id: Option<i64>,
    start: Instant,
    finished: bool,
}

impl OperationGuard {
    pub fn new(name: &'static str, user_id: Option<i64>) -> Self {
        tracing::info!(operation = name, user_id, "Starting operation");
        Self {
            name,
            user_id,
            start: Instant::now(),
            finished: false,
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn complete(mut self) {
        self.finished = true;
        tracing::info!(
            operation = self.name,
            user_id = self.user_id,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    pub fn fail(mut self, error: &dyn std::error::Error) {
        self.finished = true;
        tracing::error!(
            operation = self.name,
            user_id = self.user_id,
            duration_ms = self.elapsed_ms(),
            error = %error,
            "Operation failed"
        );
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                operation = self.name,
                user_id = self.user_id,
                duration_ms = self.elapsed_ms(),
                "Operation ended without a recorded outcome"
            );
        }
    }
}

/// Log a progress update for a long-running batch.
#[macro_export]
macro_rules! log_progress {
    ($current:expr, $total:expr, $($arg:tt)*) => {
        tracing::info!(
            current = $current,
            total = $total,
            percent = if $total == 0 { 100 } else { ($current * 100 / $total) as u32 },
            $($arg)*
        );
    };
}

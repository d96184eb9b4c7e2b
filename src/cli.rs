//! CLI definitions for tweetshelf.
//!
//! Uses clap for argument parsing with derive macros.

use crate::model::TweetSort;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tweetshelf - archive and categorize your bookmarked tweets
#[derive(Parser, Debug)]
#[command(name = "tweetshelf")]
#[command(version)]
#[command(about = "Archive, sync and categorize bookmarked tweets")]
#[command(long_about = r#"
tweetshelf keeps a local, categorized shelf of your X bookmarks.

Bookmarks are pulled page by page from the X API, honouring rate limits,
and every new tweet is classified by keyword, context and (optionally) a
zero-shot model endpoint.

Quick start:
  1. tweetshelf user add <ACCOUNT_ID> <USERNAME> --access-token <TOKEN>
  2. tweetshelf sync --user 1
  3. tweetshelf tweets list --user 1
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "TWEETSHELF_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Be verbose (show debug info)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register, list or log out accounts
    #[command(subcommand)]
    User(UserCommand),

    /// Sync one user's bookmarks
    Sync(SyncArgs),

    /// Run one scheduler pass over every eligible user
    SyncAll,

    /// Sync all users on the configured interval until interrupted
    Daemon,

    /// Classify a piece of text without storing anything
    Categorize(CategorizeArgs),

    /// Re-run categorization over stored tweets
    Recategorize(RecategorizeArgs),

    /// Manage a user's categories
    #[command(subcommand)]
    Categories(CategoriesCommand),

    /// Browse and edit stored tweets
    #[command(subcommand)]
    Tweets(TweetsCommand),

    /// Import bookmarks scraped by the browser extension
    Import(ImportArgs),

    /// Show shelf and sync statistics
    Stats(StatsArgs),

    /// Show or manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register an account (or refresh its tokens)
    Add(UserAddArgs),
    /// List registered accounts
    List,
    /// Forget an account's stored tokens
    Logout(UserRef),
}

#[derive(Args, Debug)]
pub struct UserAddArgs {
    /// External account id
    pub account_id: String,

    /// Account handle, without the @
    pub username: String,

    #[arg(long)]
    pub display_name: Option<String>,

    #[arg(long, env = "TWEETSHELF_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "TWEETSHELF_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct UserRef {
    /// Local user id
    #[arg(long, short = 'u')]
    pub user: i64,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Local user id (may be omitted when only one user is registered)
    #[arg(long, short = 'u')]
    pub user: Option<i64>,
}

#[derive(Args, Debug)]
pub struct CategorizeArgs {
    /// Text to classify
    pub text: String,
}

#[derive(Args, Debug)]
pub struct RecategorizeArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Only this tweet (local id)
    #[arg(long, short = 't')]
    pub tweet: Option<i64>,

    /// Most recent tweets to process
    #[arg(long, short = 'n', default_value = "100")]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum CategoriesCommand {
    /// List categories in display order
    List(UserRef),
    /// Create a category
    Add(CategoryAddArgs),
    /// Rename or restyle a category
    Rename(CategoryRenameArgs),
    /// Delete an empty category
    Delete(CategoryDeleteArgs),
    /// Move every tweet from one category to another
    Move(CategoryMoveArgs),
    /// Suggest categories from recent bookmarks
    Suggest(UserRef),
    /// Show the suggested color palette
    Colors,
}

#[derive(Args, Debug)]
pub struct CategoryAddArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    pub name: String,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Hex color such as #3B82F6
    #[arg(long, short = 'c')]
    pub color: Option<String>,
}

#[derive(Args, Debug)]
pub struct CategoryRenameArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Category name or id
    pub category: String,

    /// New name
    pub name: Option<String>,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'c')]
    pub color: Option<String>,
}

#[derive(Args, Debug)]
pub struct CategoryDeleteArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Category name or id
    pub category: String,
}

#[derive(Args, Debug)]
pub struct CategoryMoveArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Source category name or id
    pub from: String,

    /// Target category name or id
    pub to: String,
}

#[derive(Subcommand, Debug)]
pub enum TweetsCommand {
    /// List tweets
    List(TweetListArgs),
    /// Show one tweet with its categories
    Show(TweetRef),
    /// Archive a tweet (hidden from listings and counts)
    Archive(TweetRef),
    /// Override a tweet's category
    SetCategory(SetCategoryArgs),
}

#[derive(Args, Debug)]
pub struct TweetListArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Only tweets in this category
    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Substring over content and author
    #[arg(long, short = 's')]
    pub search: Option<String>,

    #[arg(long, default_value = "bookmarked-at")]
    pub sort: TweetSort,

    /// Oldest first
    #[arg(long)]
    pub asc: bool,

    #[arg(long)]
    pub include_archived: bool,

    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Skip first N results (for pagination)
    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(Args, Debug)]
pub struct TweetRef {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Local tweet id
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct SetCategoryArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Local tweet id
    pub id: i64,

    /// Category name or id
    pub category: String,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// JSON array of scraped bookmarks
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[arg(long, short = 'u')]
    pub user: i64,

    /// Window of days for sync history and the activity sparkline
    #[arg(long, short = 'd', default_value = "30")]
    pub days: i64,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration (secrets redacted)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

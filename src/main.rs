//! tweetshelf - bookmark archive CLI
//!
//! Main entry point for the tweetshelf command-line tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tweetshelf::auth::{OAuthRefresher, TokenRefresher, TokenStore};
use tweetshelf::config::Config;
use tweetshelf::ingest::{self, ScrapedTweet};
use tweetshelf::logging::init_cli_logging;
use tweetshelf::provider::{TweetsProvider, XApiProvider};
use tweetshelf::stats::{ShelfStats, SyncStats, fill_days, sparkline};
use tweetshelf::storage::{CategoryUpdate, TweetQuery};
use tweetshelf::*;

struct App {
    config: Config,
    format: OutputFormat,
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }
    let format = cli
        .format
        .or_else(|| config.output.format.parse().ok())
        .unwrap_or_default();
    let quiet = cli.quiet || config.output.quiet;
    if !config.output.colors {
        colored::control::set_override(false);
    }
    init_cli_logging(
        quiet,
        cli.verbose,
        config.output.colors,
        matches!(cli.command, Commands::Daemon),
    );

    let ctx = App {
        config,
        format,
        quiet,
    };
    match run(&cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "Command failed");
            match err.downcast_ref::<ShelfError>() {
                Some(shelf) => eprintln!("{}", format_shelf_error(shelf)),
                None => eprintln!("{} {err:#}", "Error:".red().bold()),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, ctx: &App) -> Result<()> {
    match &cli.command {
        Commands::User(cmd) => cmd_user(ctx, cmd),
        Commands::Sync(args) => cmd_sync(ctx, args).await,
        Commands::SyncAll => cmd_sync_all(ctx).await,
        Commands::Daemon => cmd_daemon(ctx).await,
        Commands::Categorize(args) => cmd_categorize(ctx, args).await,
        Commands::Recategorize(args) => cmd_recategorize(ctx, args).await,
        Commands::Categories(cmd) => cmd_categories(ctx, cmd).await,
        Commands::Tweets(cmd) => cmd_tweets(ctx, cmd),
        Commands::Import(args) => cmd_import(ctx, args).await,
        Commands::Stats(args) => cmd_stats(ctx, args),
        Commands::Config(cmd) => cmd_config(ctx, cmd),
        Commands::Completions(args) => {
            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "tweetshelf", &mut io::stdout());
            Ok(())
        }
    }
}

fn open_storage(ctx: &App) -> Result<Storage> {
    let db_path = ctx.config.db_path();
    debug!(db = %db_path.display(), "Opening database");
    Ok(Storage::open(&db_path)?)
}

fn categorizer(ctx: &App) -> Result<CategorizationService> {
    let storage = open_storage(ctx)?.into_shared();
    Ok(CategorizationService::from_config(
        storage,
        &ctx.config.categorization,
    )?)
}

fn pipeline(ctx: &App) -> Result<SyncPipeline> {
    let categorizer = Arc::new(categorizer(ctx)?);
    let provider: Arc<dyn TweetsProvider> =
        Arc::new(XApiProvider::from_config(&ctx.config.provider)?);
    let refresher = OAuthRefresher::from_config(&ctx.config.provider)?
        .map(|r| Arc::new(r) as Arc<dyn TokenRefresher>);
    if refresher.is_none() {
        debug!("No client id configured; expired tokens will not be refreshed");
    }
    Ok(SyncPipeline::new(
        categorizer,
        provider,
        refresher,
        ctx.config.sync.clone(),
    ))
}

fn require_user(storage: &Storage, user_id: i64) -> Result<User> {
    Ok(storage
        .get_user(user_id)?
        .ok_or_else(|| ShelfError::not_found("User", user_id))?)
}

/// Look a category up by id first, then by name.
fn resolve_category(storage: &Storage, user_id: i64, key: &str) -> Result<Category> {
    if let Ok(id) = key.parse::<i64>() {
        if let Some(category) = storage.get_category(user_id, id)? {
            return Ok(category);
        }
    }
    Ok(storage
        .get_category_by_name(user_id, key.trim())?
        .ok_or_else(|| ShelfError::not_found("Category", key))?)
}

/// Print `value` as JSON, or run `text` for the human format.
fn emit<T: Serialize>(ctx: &App, value: &T, text: impl FnOnce()) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn spinner(ctx: &App, message: String) -> Option<ProgressBar> {
    if ctx.quiet || ctx.format != OutputFormat::Text {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn divider() -> String {
    "─".repeat(CONTENT_DIVIDER_WIDTH)
}

// ---------------------------------------------------------------- users

fn cmd_user(ctx: &App, cmd: &UserCommand) -> Result<()> {
    let mut storage = open_storage(ctx)?;
    match cmd {
        UserCommand::Add(args) => {
            let (user, created) = storage.bootstrap_user(
                &args.account_id,
                &args.username,
                args.display_name.as_deref(),
                args.access_token.as_deref(),
                args.refresh_token.as_deref(),
            )?;
            emit(ctx, &user, || {
                let verb = if created { "Registered" } else { "Updated" };
                println!(
                    "{} {verb} @{} (user {})",
                    "✓".green(),
                    user.username.bold(),
                    user.id.to_string().cyan()
                );
                if user.access_token.is_none() {
                    println!(
                        "  {}",
                        "No access token stored; this user will not be synced.".yellow()
                    );
                }
            })
        }
        UserCommand::List => {
            let users = storage.list_users()?;
            emit(ctx, &users, || {
                if users.is_empty() {
                    println!("{}", "No users registered.".yellow());
                    return;
                }
                for user in &users {
                    let token = if user.access_token.is_some() {
                        "token".green()
                    } else {
                        "no token".red()
                    };
                    println!(
                        "{:>4}  @{:<20} {:<10} last sync {}",
                        user.id.to_string().dimmed(),
                        user.username,
                        token,
                        format_optional_date(user.last_sync).cyan()
                    );
                }
            })
        }
        UserCommand::Logout(user) => {
            let user = require_user(&storage, user.user)?;
            TokenStore::new(storage.into_shared()).clear(user.id)?;
            emit(ctx, &serde_json::json!({ "user_id": user.id, "logged_out": true }), || {
                println!("{} Cleared tokens for @{}", "✓".green(), user.username);
            })
        }
    }
}

// ----------------------------------------------------------------- sync

async fn cmd_sync(ctx: &App, args: &SyncArgs) -> Result<()> {
    let pipeline = pipeline(ctx)?;
    let user_id = match args.user {
        Some(id) => id,
        None => {
            let users = pipeline.storage().lock().list_syncable_users()?;
            match users.as_slice() {
                [only] => only.id,
                [] => return Err(ShelfError::validation("no user with a stored token").into()),
                _ => {
                    return Err(ShelfError::validation(
                        "several users are registered; pass --user",
                    )
                    .into());
                }
            }
        }
    };

    let pb = spinner(ctx, format!("Syncing user {user_id}..."));
    let result = pipeline.sync_user(user_id).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let summary = result?;

    emit(ctx, &summary, || {
        println!(
            "{} Synced {} tweets ({} new) in {:.1}s",
            "✓".green(),
            format_number(i64::try_from(summary.total_tweets).unwrap_or(i64::MAX)).cyan(),
            summary.new_tweets.to_string().green(),
            summary.duration_ms as f64 / 1000.0
        );
    })
}

async fn cmd_sync_all(ctx: &App) -> Result<()> {
    let scheduler = SyncScheduler::new(Arc::new(pipeline(ctx)?));
    let pb = spinner(ctx, "Syncing all users...".to_string());
    let result = scheduler.sync_all_users().await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let summary = result?;

    emit(ctx, &summary, || {
        println!(
            "{} {} users: {} succeeded, {} failed",
            if summary.failed == 0 { "✓".green() } else { "!".yellow() },
            summary.total,
            summary.succeeded.to_string().green(),
            summary.failed.to_string().red()
        );
    })
}

async fn cmd_daemon(ctx: &App) -> Result<()> {
    let scheduler = SyncScheduler::new(Arc::new(pipeline(ctx)?));
    info!(
        interval_minutes = ctx.config.sync.interval_minutes,
        "Daemon running; press Ctrl-C to stop"
    );
    scheduler
        .run_forever(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

// ------------------------------------------------------- categorization

fn print_results(results: &[CategoryResult]) {
    for result in results {
        let marker = if result.is_primary { "★".yellow() } else { " ".normal() };
        let methods: Vec<String> = result.methods.iter().map(ToString::to_string).collect();
        println!(
            "{marker} {:<16} {:>5.1}%  {}",
            result.category.bold(),
            result.confidence * 100.0,
            methods.join("+").dimmed()
        );
    }
}

async fn cmd_categorize(ctx: &App, args: &CategorizeArgs) -> Result<()> {
    if args.text.trim().is_empty() {
        return Err(ShelfError::validation("text is required").into());
    }
    let service = CategorizationService::from_config(
        Storage::open_memory()?.into_shared(),
        &ctx.config.categorization,
    )?;
    let results = service.categorize(&args.text).await;
    emit(ctx, &results, || print_results(&results))
}

async fn cmd_recategorize(ctx: &App, args: &RecategorizeArgs) -> Result<()> {
    let service = categorizer(ctx)?;
    require_user(&service.storage().lock(), args.user)?;

    if let Some(tweet_id) = args.tweet {
        let report = service.recategorize_one(tweet_id, args.user).await?;
        return emit(ctx, &report, || print_report(&report));
    }

    let pb = spinner(ctx, format!("Recategorizing up to {} tweets...", args.limit));
    let result = service.recategorize_all(args.user, args.limit).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let summary = result?;
    emit(ctx, &summary, || {
        for report in summary.reports.iter().filter(|r| r.changed()) {
            print_report(report);
        }
        println!(
            "{} {} processed, {} changed, {} failed",
            "✓".green(),
            summary.processed,
            summary.updated.to_string().cyan(),
            summary.failed.to_string().red()
        );
    })
}

fn print_report(report: &RecategorizeReport) {
    let old = report.old_primary.as_deref().unwrap_or("none");
    let arrow = if report.changed() { "→".yellow() } else { "=".dimmed() };
    println!(
        "  tweet {:>6}  {old} {arrow} {} ({:.0}%)",
        report.tweet_id.to_string().dimmed(),
        report.new_primary.bold(),
        report.new_confidence * 100.0
    );
}

// ----------------------------------------------------------- categories

async fn cmd_categories(ctx: &App, cmd: &CategoriesCommand) -> Result<()> {
    if let CategoriesCommand::Colors = cmd {
        let palette: Vec<_> = CATEGORY_PALETTE
            .iter()
            .map(|(name, hex)| serde_json::json!({ "name": name, "value": hex }))
            .collect();
        return emit(ctx, &palette, || {
            for (name, hex) in CATEGORY_PALETTE {
                println!("  {name:<8} {hex}");
            }
        });
    }
    if let CategoriesCommand::Suggest(user) = cmd {
        let service = categorizer(ctx)?;
        require_user(&service.storage().lock(), user.user)?;
        let suggestions = service.suggested_categories(user.user).await?;
        return emit(ctx, &suggestions, || {
            for s in &suggestions {
                println!(
                    "  {:<16} {:>5.1}%  ({} tweets)",
                    s.name.bold(),
                    s.confidence * 100.0,
                    s.frequency
                );
            }
        });
    }

    let mut storage = open_storage(ctx)?;
    match cmd {
        CategoriesCommand::List(user) => {
            require_user(&storage, user.user)?;
            let categories = storage.list_categories(user.user)?;
            emit(ctx, &categories, || {
                for c in &categories {
                    let default = if c.is_default { " (default)".dimmed() } else { "".normal() };
                    println!(
                        "{:>4}  {:<20} {:>6}  {}{default}",
                        c.id.to_string().dimmed(),
                        c.name.bold(),
                        format_number(c.tweet_count).cyan(),
                        c.color.dimmed()
                    );
                }
            })
        }
        CategoriesCommand::Add(args) => {
            require_user(&storage, args.user)?;
            let category = storage.create_category(
                args.user,
                &args.name,
                args.description.as_deref(),
                args.color.as_deref(),
            )?;
            emit(ctx, &category, || {
                println!("{} Created '{}' ({})", "✓".green(), category.name, category.id);
            })
        }
        CategoriesCommand::Rename(args) => {
            let existing = resolve_category(&storage, args.user, &args.category)?;
            let update = CategoryUpdate {
                name: args.name.clone(),
                description: args.description.clone().map(Some),
                color: args.color.clone(),
                sort_order: None,
            };
            let category = storage.update_category(args.user, existing.id, &update)?;
            emit(ctx, &category, || {
                println!("{} '{}' → '{}'", "✓".green(), existing.name, category.name.bold());
            })
        }
        CategoriesCommand::Delete(args) => {
            let category = resolve_category(&storage, args.user, &args.category)?;
            storage.delete_category(args.user, category.id)?;
            emit(ctx, &serde_json::json!({ "deleted": category.id }), || {
                println!("{} Deleted '{}'", "✓".green(), category.name);
            })
        }
        CategoriesCommand::Move(args) => {
            let from = resolve_category(&storage, args.user, &args.from)?;
            let to = resolve_category(&storage, args.user, &args.to)?;
            let moved = storage.move_tweets(args.user, from.id, to.id)?;
            emit(ctx, &serde_json::json!({ "moved": moved }), || {
                println!(
                    "{} Moved {} tweets from '{}' to '{}'",
                    "✓".green(),
                    moved.to_string().cyan(),
                    from.name,
                    to.name
                );
            })
        }
        CategoriesCommand::Suggest(_) | CategoriesCommand::Colors => Ok(()),
    }
}

// --------------------------------------------------------------- tweets

fn print_tweet_line(tweet: &Tweet) {
    let author = tweet.author_username.as_deref().unwrap_or("unknown");
    println!(
        "{:>6}  {} {} {}",
        tweet.id.to_string().dimmed(),
        format!("@{author}").green(),
        tweet.category.as_deref().unwrap_or("-").blue(),
        format_relative_date(tweet.bookmarked_at).dimmed()
    );
    println!("        {}", truncate_chars(&tweet.content.replace('\n', " "), 100));
}

fn cmd_tweets(ctx: &App, cmd: &TweetsCommand) -> Result<()> {
    let mut storage = open_storage(ctx)?;
    match cmd {
        TweetsCommand::List(args) => {
            require_user(&storage, args.user)?;
            let query = TweetQuery {
                category: args.category.clone(),
                search: args.search.clone(),
                include_archived: args.include_archived,
                sort: args.sort,
                ascending: args.asc,
                limit: args.limit,
                offset: args.offset,
            };
            let (tweets, total) = storage.list_tweets(args.user, &query)?;
            let page = serde_json::json!({
                "tweets": tweets,
                "total": total,
                "limit": args.limit,
                "offset": args.offset,
            });
            emit(ctx, &page, || {
                if tweets.is_empty() {
                    println!("{}", "No tweets found.".yellow());
                    return;
                }
                for tweet in &tweets {
                    print_tweet_line(tweet);
                }
                println!(
                    "\n{} of {} tweets",
                    tweets.len().to_string().cyan(),
                    format_number(total)
                );
            })
        }
        TweetsCommand::Show(args) => {
            let tweet = storage.get_user_tweet(args.user, args.id)?;
            let categories = storage.get_tweet_categories(tweet.id)?;
            let value = serde_json::json!({ "tweet": tweet, "categories": categories });
            emit(ctx, &value, || {
                println!("{}", divider());
                for line in textwrap::wrap(&tweet.content, CONTENT_DIVIDER_WIDTH) {
                    println!("{line}");
                }
                println!("{}", divider());
                println!(
                    "  ID: {}  Tweet: {}  Bookmarked: {}",
                    tweet.id.to_string().dimmed(),
                    tweet.tweet_id.dimmed(),
                    tweet.bookmarked_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
                );
                if let Some(author) = &tweet.author_username {
                    println!("  Author: @{}", author.green());
                }
                println!(
                    "  {} likes  {} retweets  {} replies",
                    tweet.like_count.to_string().cyan(),
                    tweet.retweet_count.to_string().cyan(),
                    tweet.reply_count.to_string().cyan()
                );
                let hashtags = tweet.hashtags();
                if !hashtags.is_empty() {
                    println!("  Hashtags: {}", hashtags.join(", ").blue());
                }
                for c in &categories {
                    let star = if c.is_primary { "★" } else { " " };
                    println!("  {star} {:<16} {:>5.1}%", c.name, c.confidence * 100.0);
                }
            })
        }
        TweetsCommand::Archive(args) => {
            storage.archive_tweet(args.user, args.id)?;
            storage.recompute_counts(args.user)?;
            emit(ctx, &serde_json::json!({ "archived": args.id }), || {
                println!("{} Archived tweet {}", "✓".green(), args.id);
            })
        }
        TweetsCommand::SetCategory(args) => {
            let tweet = storage.get_user_tweet(args.user, args.id)?;
            let category = resolve_category(&storage, args.user, &args.category)?;
            storage.set_tweet_category(args.user, tweet.id, category.id)?;
            storage.recompute_counts(args.user)?;
            emit(
                ctx,
                &serde_json::json!({ "tweet": tweet.id, "category": category.name }),
                || {
                    println!(
                        "{} Tweet {} is now in '{}'",
                        "✓".green(),
                        tweet.id,
                        category.name.bold()
                    );
                },
            )
        }
    }
}

// --------------------------------------------------------------- import

async fn cmd_import(ctx: &App, args: &ImportArgs) -> Result<()> {
    let raw = Context::with_context(tokio::fs::read_to_string(&args.file).await, || {
        format!("reading {}", args.file.display())
    })?;
    let scraped: Vec<ScrapedTweet> = Context::with_context(serde_json::from_str(&raw), || {
        format!("parsing {} as a JSON array of bookmarks", args.file.display())
    })?;

    let service = categorizer(ctx)?;
    let report = ingest::import_scraped(&service, args.user, &scraped).await?;
    emit(ctx, &report, || {
        println!(
            "{} Imported {} new tweets ({} skipped)",
            "✓".green(),
            report.new.to_string().cyan(),
            report.skipped
        );
    })
}

// ---------------------------------------------------------------- stats

fn cmd_stats(ctx: &App, args: &StatsArgs) -> Result<()> {
    let storage = open_storage(ctx)?;
    let shelf = ShelfStats::compute(&storage, args.user, args.days)?;
    let sync = SyncStats::compute(&storage, args.user, args.days)?;

    let value = serde_json::json!({ "shelf": shelf, "sync": sync });
    emit(ctx, &value, || {
        println!("{}", "Shelf Statistics".bold().cyan());
        println!("{}", "─".repeat(40));
        println!("  {:<20} {:>10}", "Tweets:", format_number(shelf.total_tweets));
        println!("  {:<20} {:>10}", "This week:", format_number(shelf.tweets_this_week));
        println!("  {:<20} {:>10}", "Categories:", shelf.total_categories);
        println!("  {:<20} {:>10}", "Last sync:", format_optional_date(shelf.last_sync));
        if let Some(top) = shelf.most_popular() {
            println!("  {:<20} {:>10}", "Most popular:", top.name);
        }

        let series = fill_days(&shelf.daily, args.days, Utc::now().date_naive());
        println!("  Activity ({}d)      {}", args.days, sparkline(&series, 40).green());

        println!();
        for c in &shelf.categories {
            println!("  {:<20} {:>10}", c.name, format_number(c.count));
        }

        println!();
        println!("{}", format!("Sync History ({} days)", sync.days).bold().cyan());
        println!("{}", "─".repeat(40));
        println!("  {:<20} {:>10}", "Runs:", sync.total_runs);
        println!("  {:<20} {:>9}%", "Success rate:", sync.success_rate);
        if let Some(avg) = sync.avg_duration_ms {
            println!("  {:<20} {:>9.1}s", "Avg duration:", avg / 1000.0);
        }
        println!("  {:<20} {:>10}", "Tweets found:", format_number(sync.tweets_found));
        println!("  {:<20} {:>10}", "Tweets new:", format_number(sync.tweets_new));
        for log in sync.recent.iter().take(5) {
            let status = match log.status {
                SyncStatus::Success => log.status.to_string().green(),
                SyncStatus::Running => log.status.to_string().yellow(),
                SyncStatus::Error => log.status.to_string().red(),
            };
            println!(
                "  {:<12} {:<8} {:>5} new  {}",
                format_relative_date(log.started_at).dimmed(),
                status,
                log.tweets_new,
                log.error.as_deref().unwrap_or("").dimmed()
            );
        }
    })
}

// --------------------------------------------------------------- config

fn cmd_config(ctx: &App, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let redacted = ctx.config.redacted();
            match ctx.format {
                OutputFormat::Text => {
                    println!("{}", "Current Configuration".bold().cyan());
                    println!("  Database: {}", ctx.config.db_path().display());
                    println!();
                    print!("{}", toml::to_string_pretty(&redacted)?);
                    Ok(())
                }
                _ => emit(ctx, &redacted, || {}),
            }
        }
        ConfigCommand::Init { force } => {
            let path = Config::user_config_path().ok_or_else(|| ShelfError::Config {
                path: "config.toml".into(),
                reason: "could not determine config directory".to_string(),
            })?;
            if path.exists() && !force {
                return Err(ShelfError::validation(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ))
                .into());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default_config_content())?;
            emit(ctx, &serde_json::json!({ "path": path }), || {
                println!("{} Wrote {}", "✓".green(), path.display());
            })
        }
        ConfigCommand::Path => {
            let path = Config::user_config_path();
            emit(ctx, &serde_json::json!({ "path": path }), || match &path {
                Some(p) => println!("{}", p.display()),
                None => println!("{}", "No config directory on this platform.".yellow()),
            })
        }
    }
}

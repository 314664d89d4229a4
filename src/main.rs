use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod error;
mod models;
mod services;
mod sync;

use app::App;
use config::Config;
use error::Result;
use models::{ActionKind, Article, ArticleFilter};

/// Offline-first FreshRSS sync client
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    /// Config file to use instead of the default location
    #[arg(long, env = "SPEEDY_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Write a default config file
    Init,
    /// Pull folders, feeds, articles and statuses from the server
    Sync,
    /// Change an article's status locally and queue it for the server
    Mark {
        article_id: String,
        #[arg(value_enum)]
        action: ActionKind,
    },
    /// Show a cached article
    Show { article_id: String },
    /// Summarize the local cache and the outbox
    Status,
    /// Push one batch of queued status changes
    Push,
    /// List cached articles
    List {
        #[arg(long, value_enum, default_value_t = ArticleFilter::Unread)]
        filter: ArticleFilter,
    },
    /// Push queued status changes in the background until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    if let Err(e) = run(opts).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<()> {
    let cmd = opts.cmd.unwrap_or(Cmd::Run);

    if let Cmd::Init = cmd {
        init_stderr_logging();
        let path = match opts.config {
            Some(path) => {
                Config::init_at(&path)?;
                path
            }
            None => Config::init()?,
        };
        println!("Wrote config to {}", path.display());
        return Ok(());
    }

    let config = match &opts.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Cmd::Run = cmd {
        init_file_logging(Path::new(&config.log_file))?;
    } else {
        init_stderr_logging();
    }

    let app = App::new(config).await?;

    match cmd {
        Cmd::Init => {}
        Cmd::Sync => {
            let summary = app.sync().await?;
            println!(
                "Synced {} folders, {} feeds ({} removed), {} new articles, {} unread, {} starred",
                summary.folders,
                summary.feeds,
                summary.removed_feeds,
                summary.new_articles,
                summary.unread,
                summary.starred
            );
        }
        Cmd::Mark { article_id, action } => {
            app.mark(&article_id, action).await?;
            println!("Marked {} as {}", article_id, action);
        }
        Cmd::Show { article_id } => {
            let details = app.article(&article_id).await?;
            let article = &details.article;
            println!("{}", format_article(article));
            if let Some(feed) = &details.feed {
                println!("Feed:    {} <{}>", feed.title, feed.url);
            }
            if !details.folders.is_empty() {
                println!("Folders: {}", details.folders.join(", "));
            }
            println!("Author:  {}", article.author);
            println!("Link:    {}", article.href);
            println!();
            println!("{}", article.content);
        }
        Cmd::Status => {
            let status = app.status().await?;
            let last_sync = status
                .last_sync
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|d| d.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!("Last sync: {}", last_sync);
            println!("Feeds:     {} in {} folders", status.feeds, status.folders);
            for (kind, count) in status.pending {
                println!("Pending {:<7} {}", format!("{}:", kind), count);
            }
        }
        Cmd::Push => {
            let report = app.push().await?;
            if report.offline {
                println!("Offline, nothing pushed");
            } else {
                println!("Pushed {} pending actions", report.delivered);
            }
            if report.failed_kinds > 0 {
                eprintln!(
                    "{} action kinds failed and stay queued, see the log for details",
                    report.failed_kinds
                );
            }
        }
        Cmd::List { filter } => {
            for article in app.articles(filter).await? {
                println!("{}", format_article(&article));
            }
        }
        Cmd::Run => {
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupted, shutting down");
                    }
                    cancel.cancel();
                }
            });

            println!("Pushing pending actions in the background, press Ctrl-C to stop");
            app.run(cancel).await?;
        }
    }

    Ok(())
}

fn init_stderr_logging() {
    // Only warnings and errors unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn init_file_logging(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn format_article(article: &Article) -> String {
    let date = chrono::DateTime::from_timestamp(article.published_at, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    format!(
        "{}{} {:<20} {:<10} {}",
        if article.is_read { ' ' } else { '●' },
        if article.is_starred { '★' } else { ' ' },
        article.id,
        date,
        article.title
    )
}

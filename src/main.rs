use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

mod catalog;
mod config;
mod database;
mod downloader;
mod error;
mod models;
mod storage;
mod store;
mod sync;
mod traits;
mod utils;

#[cfg(test)]
mod test_helpers;

use catalog::{page_offset, CopyApiClient, CHAPTER_PAGE_SIZE};
use config::{Config, SourceConfig, StateBackend};
use database::Database;
use models::TrackedSource;
use downloader::{ChapterDownloader, PageFetcher, RetrySettings};
use storage::{CbzAssembler, StorageManager};
use store::FileCursorStore;
use sync::{PassOutcome, SourceReport, SyncController};
use traits::{CatalogApi, CursorStore};
use utils::HttpClient;

#[derive(Parser)]
#[command(name = "comicsync")]
#[command(about = "Incremental comic chapter mirroring with resumable sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration and prepare the state backend
    Init,
    /// Download new chapters of every tracked source (or just one)
    Sync {
        /// Name of a single tracked source
        source: Option<String>,
    },
    /// Download a range of chapters once, without touching any cursor
    Download {
        /// Comic path word, e.g. "yaoshenji"
        path: String,
        /// First chapter index (1-based)
        start: u32,
        /// Last chapter index (inclusive)
        end: u32,
    },
    /// Search the catalog by keyword
    Search {
        keyword: String,
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// Show details of one comic
    Info { path: String },
    /// List the chapters of one comic
    Chapters {
        path: String,
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// Start tracking a comic
    Track {
        /// Local name of the source
        name: String,
        /// Comic path word
        path: String,
        /// Chapters to fetch per sync pass
        #[arg(short, long)]
        limit: Option<u32>,
        /// Treat the first N chapters as already downloaded
        #[arg(long, default_value = "0")]
        skip: u32,
    },
    /// Show tracked sources and their cursors
    Status,
    /// Show recent sync passes (sqlite state backend)
    History {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

/// The configured cursor backend.
enum StateStore {
    File(FileCursorStore),
    Sqlite(Database),
}

impl StateStore {
    fn cursors(&self) -> &dyn CursorStore {
        match self {
            StateStore::File(store) => store,
            StateStore::Sqlite(db) => db,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    let config = match Config::load_or_init(&cli.config)? {
        Some(config) => config,
        None => {
            info!(
                "📝 No configuration found, wrote a default one to {}. Edit it and run again.",
                cli.config
            );
            return Ok(());
        }
    };

    match cli.command {
        Commands::Init => {
            info!("Initializing comicsync...");
            let store = open_store(&cli.config, &config).await?;
            let tracked = store.cursors().list().await?;
            info!(
                "✅ Ready: {} tracked source(s), {:?} state backend",
                tracked.len(),
                config.state.backend
            );
        }
        Commands::Sync { source } => {
            run_sync(&cli.config, &config, source.as_deref()).await?;
        }
        Commands::Download { path, start, end } => {
            run_download(&cli.config, &config, &path, start, end).await?;
        }
        Commands::Search { keyword, page } => {
            let (client, _) = build_pipeline(&config)?;
            show_search(&client, &keyword, page).await?;
        }
        Commands::Info { path } => {
            let (client, _) = build_pipeline(&config)?;
            show_info(&client, &path).await?;
        }
        Commands::Chapters { path, page } => {
            let (client, _) = build_pipeline(&config)?;
            show_chapters(&client, &path, page).await?;
        }
        Commands::Track {
            name,
            path,
            limit,
            skip,
        } => {
            run_track(&cli.config, config, name, path, limit, skip).await?;
        }
        Commands::Status => {
            let store = open_store(&cli.config, &config).await?;
            show_status(store.cursors()).await?;
        }
        Commands::History { limit } => {
            show_history(&cli.config, &config, limit).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("comicsync={}", level))
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

async fn open_store(config_path: &str, config: &Config) -> Result<StateStore> {
    match config.state.backend {
        StateBackend::File => Ok(StateStore::File(FileCursorStore::new(config_path))),
        StateBackend::Sqlite => {
            let db = Database::new(&config.state.database_url).await?;
            db.init().await?;
            db.seed_sources(&config.sources).await?;
            Ok(StateStore::Sqlite(db))
        }
    }
}

fn build_pipeline(config: &Config) -> Result<(CopyApiClient, ChapterDownloader)> {
    let http_client = HttpClient::new(&config.api, &config.download)?;
    let client = CopyApiClient::new(http_client.clone(), &config.api)?;
    let fetcher = PageFetcher::new(http_client, RetrySettings::from(&config.download));
    let downloader =
        ChapterDownloader::new(Arc::new(fetcher)).with_progress(config.download.show_progress);
    Ok((client, downloader))
}

async fn run_sync(config_path: &str, config: &Config, only: Option<&str>) -> Result<()> {
    let (client, downloader) = build_pipeline(config)?;
    let store = open_store(config_path, config).await?;
    let storage = StorageManager::new(&config.storage);
    let assembler = CbzAssembler;

    let mut controller = SyncController::new(
        &client,
        &downloader,
        store.cursors(),
        &storage,
        config.download.concurrency,
    );
    if config.assemble.enabled {
        controller = controller.with_assembler(&assembler, config.assemble.password.clone());
    }

    info!("📂 Output directory: {:?}", storage.root());
    let reports = controller.run_all(only).await?;
    print_reports(&reports);
    Ok(())
}

fn print_reports(reports: &[SourceReport]) {
    if reports.is_empty() {
        return;
    }
    println!("🔄 Sync summary:");
    println!(
        "{:<20} {:<14} {:<8} {:<8} {:<8} {}",
        "Source", "Outcome", "Remote", "New", "Cursor", "Detail"
    );
    println!("{}", "-".repeat(80));

    for report in reports {
        let (outcome, detail) = match &report.outcome {
            PassOutcome::UpToDate => ("Up to date", String::new()),
            PassOutcome::Completed { from, to } => ("Completed", format!("chapters {}..={}", from, to)),
            PassOutcome::Halted {
                chapter,
                failed_pages,
                reason,
            } => (
                "Halted",
                format!("chapter {}: {} (pages {:?})", chapter, reason, failed_pages),
            ),
            PassOutcome::CatalogFailed(reason) => ("Catalog error", reason.clone()),
        };
        let remote = report
            .remote_total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<14} {:<8} {:<8} {:<8} {}",
            report.source_name, outcome, remote, report.chapters_completed, report.cursor, detail
        );
    }
}

async fn run_download(config_path: &str, config: &Config, path: &str, start: u32, end: u32) -> Result<()> {
    let (client, downloader) = build_pipeline(config)?;
    let store = open_store(config_path, config).await?;
    let storage = StorageManager::new(&config.storage);
    let assembler = CbzAssembler;

    let mut controller = SyncController::new(
        &client,
        &downloader,
        store.cursors(),
        &storage,
        config.download.concurrency,
    );
    if config.assemble.enabled {
        controller = controller.with_assembler(&assembler, config.assemble.password.clone());
    }

    info!("⬇️ Downloading chapters {}..={} of {}", start, end, path);
    let entries = controller.download_range(path, start, end).await?;

    println!("{:<8} {:<30} {:<10} {}", "Index", "Chapter", "Pages", "Failed");
    println!("{}", "-".repeat(70));
    for entry in &entries {
        match &entry.result {
            Some(result) => println!(
                "{:<8} {:<30} {:<10} {:?}",
                entry.chapter.index,
                entry.chapter.name,
                format!("{}/{}", result.succeeded_count, result.total_pages),
                result.failed_page_numbers
            ),
            None => println!(
                "{:<8} {:<30} {:<10} {}",
                entry.chapter.index, entry.chapter.name, "-", "manifest unavailable"
            ),
        }
    }
    Ok(())
}

async fn show_search(client: &CopyApiClient, keyword: &str, page: u32) -> Result<()> {
    let results = client.search(keyword, page).await?;

    println!(
        "🔍 {} result(s) for '{}', page {}/{}",
        results.total,
        keyword,
        results.page,
        results.page_count().max(1)
    );
    for (i, hit) in results.items.iter().enumerate() {
        println!("\n{}. {}", i + 1, hit.name);
        if !hit.authors.is_empty() {
            println!("   Authors: {}", hit.authors.join(", "));
        }
        println!("   Path:    {}", hit.path_word);
        if let Some(cover) = &hit.cover {
            println!("   Cover:   {}", cover);
        }
    }
    Ok(())
}

async fn show_info(client: &CopyApiClient, path: &str) -> Result<()> {
    let detail = client.comic_detail(path).await?;
    let unknown = || "unknown".to_string();

    println!("📖 {}", detail.name);
    println!("   Brief:          {}", detail.brief.unwrap_or_else(unknown));
    println!("   Last updated:   {}", detail.last_updated.unwrap_or_else(unknown));
    println!("   Latest chapter: {}", detail.latest_chapter.unwrap_or_else(unknown));
    Ok(())
}

async fn show_chapters(client: &CopyApiClient, path: &str, page: u32) -> Result<()> {
    let page = page.max(1);
    let listing = client
        .list_chapters(path, CHAPTER_PAGE_SIZE, page_offset(page, CHAPTER_PAGE_SIZE))
        .await?;

    println!(
        "📚 {} chapter(s), page {}/{}",
        listing.total,
        page,
        listing.total.div_ceil(CHAPTER_PAGE_SIZE).max(1)
    );
    println!("{:<8} {:<30} {:<8} {}", "Index", "Chapter", "Pages", "Created");
    println!("{}", "-".repeat(70));
    for (i, chapter) in listing.items.iter().enumerate() {
        println!(
            "{:<8} {:<30} {:<8} {}",
            listing.offset + i as u32 + 1,
            chapter.name,
            chapter
                .size
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            chapter.created.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_track(
    config_path: &str,
    mut config: Config,
    name: String,
    path: String,
    limit: Option<u32>,
    skip: u32,
) -> Result<()> {
    if config.get_source(&name).is_some() {
        warn!("⚠️ Source '{}' is already tracked", name);
        return Ok(());
    }

    let source = SourceConfig {
        name: name.clone(),
        path,
        last_chapter: skip,
        last_check_time: None,
        download_limit: limit.unwrap_or(config.download.default_download_limit),
    };
    config.sources.push(source.clone());
    config.validate()?;
    config.save(config_path)?;
    info!("📝 Added to {}: {} ({})", config_path, source.name, source.path);

    if config.state.backend == StateBackend::Sqlite {
        let db = Database::new(&config.state.database_url).await?;
        db.init().await?;
        db.upsert_source(&TrackedSource::from(&source)).await?;
    }
    Ok(())
}

async fn show_status(store: &dyn CursorStore) -> Result<()> {
    let names = store.list().await?;

    println!("📚 Tracked sources:");
    println!(
        "{:<20} {:<20} {:<10} {:<8} {:<20}",
        "Name", "Path", "Chapter", "Limit", "Last Check"
    );
    println!("{}", "-".repeat(80));

    for name in names {
        let source = store.load(&name).await?;
        println!(
            "{:<20} {:<20} {:<10} {:<8} {:<20}",
            source.name,
            source.remote_path,
            source.last_completed_chapter,
            source.download_limit,
            source
                .last_check_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }
    Ok(())
}

async fn show_history(config_path: &str, config: &Config, limit: u32) -> Result<()> {
    let StateStore::Sqlite(db) = open_store(config_path, config).await? else {
        warn!("⚠️ Sync history is only kept by the sqlite state backend");
        return Ok(());
    };

    let logs = db.recent_scan_logs(limit).await?;
    println!("🕘 Recent sync passes:");
    println!(
        "{:<17} {:<20} {:<11} {:<10} {:<8} {:<9} {}",
        "When", "Source", "Status", "Cursor", "Done", "Took", "Error"
    );
    println!("{}", "-".repeat(90));
    for log in logs {
        println!(
            "{:<17} {:<20} {:<11} {:<10} {:<8} {:<9} {}",
            log.created_at.format("%Y-%m-%d %H:%M"),
            log.source_name,
            log.status.to_string(),
            format!("{}→{}", log.cursor_before, log.cursor_after),
            format!("{}/{}", log.chapters_completed, log.chapters_attempted),
            format!("{}ms", log.duration_ms),
            log.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

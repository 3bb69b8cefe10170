use crate::catalog::CatalogPaginator;
use crate::downloader::ChapterDownloader;
use crate::error::{ComicSyncError, Result};
use crate::models::{ChapterResult, ResolvedChapter, ScanLog, ScanStatus, TrackedSource};
use crate::storage::StorageManager;
use crate::traits::{CatalogApi, ChapterAssembler, CursorStore};
use chrono::Utc;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Where a source is in its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Scanning,
    Downloading,
    Advancing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Scanning => write!(f, "scanning"),
            SyncPhase::Downloading => write!(f, "downloading"),
            SyncPhase::Advancing => write!(f, "advancing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing new upstream, or nothing this pass is allowed to fetch.
    UpToDate,
    /// Every chapter in `from..=to` is stored and the cursor sits at `to`.
    Completed { from: u32, to: u32 },
    /// `chapter` came back incomplete; it is retried first next pass.
    Halted {
        chapter: u32,
        failed_pages: Vec<u32>,
        reason: String,
    },
    /// The catalog could not be read; the cursor was left alone.
    CatalogFailed(String),
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source_name: String,
    pub outcome: PassOutcome,
    pub remote_total: Option<u32>,
    pub chapters_completed: u32,
    pub cursor: u32,
}

/// Result of one chapter of a one-off range download.
#[derive(Debug, Clone)]
pub struct RangeEntry {
    pub chapter: ResolvedChapter,
    /// `None` when the chapter manifest could not be fetched.
    pub result: Option<ChapterResult>,
}

pub struct SyncController<'a> {
    catalog: &'a dyn CatalogApi,
    downloader: &'a ChapterDownloader,
    store: &'a dyn CursorStore,
    storage: &'a StorageManager,
    concurrency: usize,
    assembler: Option<&'a dyn ChapterAssembler>,
    password: Option<String>,
}

impl<'a> SyncController<'a> {
    pub fn new(
        catalog: &'a dyn CatalogApi,
        downloader: &'a ChapterDownloader,
        store: &'a dyn CursorStore,
        storage: &'a StorageManager,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            downloader,
            store,
            storage,
            concurrency,
            assembler: None,
            password: None,
        }
    }

    pub fn with_assembler(mut self, assembler: &'a dyn ChapterAssembler, password: Option<String>) -> Self {
        self.assembler = Some(assembler);
        self.password = password;
        self
    }

    /// Runs one pass over every tracked source, or only over `only`.
    ///
    /// Sources are handled one after another. A source whose pass fails is
    /// reported and skipped; fatal errors (config, database, a cursor that
    /// cannot be loaded or saved) abort the whole run.
    pub async fn run_all(&self, only: Option<&str>) -> Result<Vec<SourceReport>> {
        let mut names = self.store.list().await?;
        if let Some(wanted) = only {
            if !names.iter().any(|n| n == wanted) {
                return Err(ComicSyncError::source_not_tracked(wanted));
            }
            names.retain(|n| n == wanted);
        }

        if names.is_empty() {
            info!("📭 No tracked sources, nothing to do");
            return Ok(Vec::new());
        }

        info!("🔄 Syncing {} source(s)", names.len());
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            match self.sync_source(&name).await {
                Ok(report) => reports.push(report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(source = %name, "❌ Pass aborted: {}", e);
                    let cursor = match self.store.load(&name).await {
                        Ok(source) => source.last_completed_chapter,
                        Err(_) => 0,
                    };
                    reports.push(SourceReport {
                        source_name: name,
                        outcome: PassOutcome::CatalogFailed(e.to_string()),
                        remote_total: None,
                        chapters_completed: 0,
                        cursor,
                    });
                }
            }
        }
        Ok(reports)
    }

    pub async fn sync_source(&self, name: &str) -> Result<SourceReport> {
        let started = Instant::now();
        let mut source = self
            .store
            .load(name)
            .await
            .map_err(|e| ComicSyncError::cursor_state(name, "loaded", e))?;
        let mut log = ScanLog::new(&source);
        let remote_path = source.remote_path.clone();
        let paginator = CatalogPaginator::new(self.catalog);

        debug!(source = name, phase = %SyncPhase::Scanning, "Checking remote catalog");
        let total = match paginator.remote_total(&remote_path).await {
            Ok(total) => total,
            Err(e) => {
                error!(source = name, "❌ Could not read the catalog: {}", e);
                let outcome = PassOutcome::CatalogFailed(e.to_string());
                return Ok(self.finish(&source, outcome, None, 0, log, started).await);
            }
        };
        log.remote_total = Some(total as i64);
        source.touch(Utc::now());

        let target = source.delta_target(total);
        if target <= source.last_completed_chapter {
            if total > source.last_completed_chapter {
                warn!(
                    source = name,
                    "⚠️ {} new chapter(s) upstream but download_limit is 0",
                    total - source.last_completed_chapter
                );
            } else {
                info!(
                    source = name,
                    "✨ Up to date at chapter {} of {}", source.last_completed_chapter, total
                );
            }
            self.persist(name, &source).await?;
            return Ok(self
                .finish(&source, PassOutcome::UpToDate, Some(total), 0, log, started)
                .await);
        }

        let start = source.last_completed_chapter + 1;
        info!(
            source = name,
            "🆕 {} new chapter(s), fetching {}..={}",
            total - source.last_completed_chapter,
            start,
            target
        );

        let chapters = match paginator.resolve_range(&remote_path, start, target).await {
            Ok(chapters) => chapters,
            Err(e) => {
                error!(source = name, "❌ {}", e);
                let outcome = PassOutcome::CatalogFailed(e.to_string());
                return Ok(self
                    .finish(&source, outcome, Some(total), 0, log, started)
                    .await);
            }
        };

        let mut completed = 0u32;
        let mut saved = false;
        let mut outcome = PassOutcome::Completed {
            from: start,
            to: target,
        };

        for chapter in chapters {
            log.chapters_attempted += 1;
            debug!(source = name, chapter = chapter.index, phase = %SyncPhase::Downloading, "{}", chapter.name);

            let manifest = match self.catalog.get_chapter(&remote_path, &chapter.chapter_id).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(
                        source = name,
                        chapter = chapter.index,
                        "❌ Manifest for '{}' unavailable: {}",
                        chapter.name,
                        e
                    );
                    outcome = PassOutcome::CatalogFailed(e.to_string());
                    break;
                }
            };

            let chapter_dir = self
                .storage
                .chapter_dir(&manifest.comic_name, &manifest.display_name);
            let result = match self
                .downloader
                .download_chapter(&manifest, &chapter_dir, self.concurrency)
                .instrument(info_span!("chapter", source = name, chapter = chapter.index))
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!(source = name, chapter = chapter.index, "❌ {}", e);
                    outcome = PassOutcome::Halted {
                        chapter: chapter.index,
                        failed_pages: Vec::new(),
                        reason: e.to_string(),
                    };
                    break;
                }
            };

            if !result.is_complete() {
                let failed_pages: Vec<u32> = result.failed_page_numbers.iter().copied().collect();
                warn!(
                    source = name,
                    chapter = chapter.index,
                    "⏸️ Chapter {} incomplete ({}/{} pages), stopping here until next pass",
                    chapter.index,
                    result.succeeded_count,
                    result.total_pages
                );
                outcome = PassOutcome::Halted {
                    chapter: chapter.index,
                    reason: format!("{} page(s) failed", failed_pages.len()),
                    failed_pages,
                };
                break;
            }

            debug!(source = name, chapter = chapter.index, phase = %SyncPhase::Advancing, "Persisting cursor");
            source.advance_to(chapter.index)?;
            self.persist(name, &source).await?;
            saved = true;
            completed += 1;
            info!(
                source = name,
                chapter = chapter.index,
                "✅ {} stored, cursor now {}",
                chapter.name,
                source.last_completed_chapter
            );

            self.assemble(&chapter_dir, result.total_pages).await;
        }

        // A pass that checked the catalog records its check time even when
        // no chapter got far enough to save it.
        if !saved && !matches!(outcome, PassOutcome::CatalogFailed(_)) {
            self.persist(name, &source).await?;
        }

        log.chapters_completed = completed as i64;
        Ok(self
            .finish(&source, outcome, Some(total), completed, log, started)
            .await)
    }

    /// Downloads chapters `start..=end` of `remote_path` without touching any
    /// cursor. Incomplete chapters do not stop the run.
    pub async fn download_range(&self, remote_path: &str, start: u32, end: u32) -> Result<Vec<RangeEntry>> {
        let paginator = CatalogPaginator::new(self.catalog);
        let chapters = paginator.resolve_range(remote_path, start, end).await?;

        let mut entries = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let result = match self.catalog.get_chapter(remote_path, &chapter.chapter_id).await {
                Ok(manifest) => {
                    let chapter_dir = self
                        .storage
                        .chapter_dir(&manifest.comic_name, &manifest.display_name);
                    let result = self
                        .downloader
                        .download_chapter(&manifest, &chapter_dir, self.concurrency)
                        .instrument(info_span!("chapter", source = remote_path, chapter = chapter.index))
                        .await?;
                    if result.is_complete() {
                        self.assemble(&chapter_dir, result.total_pages).await;
                    }
                    Some(result)
                }
                Err(e) => {
                    error!(chapter = chapter.index, "❌ Manifest for '{}' unavailable: {}", chapter.name, e);
                    None
                }
            };
            entries.push(RangeEntry { chapter, result });
        }
        Ok(entries)
    }

    async fn persist(&self, name: &str, source: &TrackedSource) -> Result<()> {
        self.store
            .save(name, source)
            .await
            .map_err(|e| ComicSyncError::cursor_state(name, "saved", e))
    }

    async fn assemble(&self, chapter_dir: &Path, page_count: u32) {
        let Some(assembler) = self.assembler else {
            return;
        };
        if let Err(e) = assembler
            .assemble(chapter_dir, page_count, self.password.as_deref())
            .await
        {
            warn!("⚠️ Could not assemble {:?}: {}", chapter_dir, e);
        }
    }

    async fn finish(
        &self,
        source: &TrackedSource,
        outcome: PassOutcome,
        remote_total: Option<u32>,
        chapters_completed: u32,
        mut log: ScanLog,
        started: Instant,
    ) -> SourceReport {
        log.status = match &outcome {
            PassOutcome::UpToDate => ScanStatus::UpToDate,
            PassOutcome::Completed { .. } => ScanStatus::Success,
            PassOutcome::Halted { .. } => ScanStatus::Partial,
            PassOutcome::CatalogFailed(_) => ScanStatus::Failed,
        };
        log.error_message = match &outcome {
            PassOutcome::Halted { reason, .. } => Some(reason.clone()),
            PassOutcome::CatalogFailed(reason) => Some(reason.clone()),
            _ => None,
        };
        log.cursor_after = source.last_completed_chapter as i64;
        log.duration_ms = started.elapsed().as_millis() as i64;

        if let Err(e) = self.store.record_pass(&log).await {
            warn!(source = %source.name, "Could not record scan log: {}", e);
        }
        debug!(source = %source.name, phase = %SyncPhase::Idle, "Pass finished in {} ms", log.duration_ms);

        SourceReport {
            source_name: source.name.clone(),
            outcome,
            remote_total,
            chapters_completed,
            cursor: source.last_completed_chapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_file_name;
    use crate::config::Config;
    use crate::downloader::{PageFetcher, RetrySettings};
    use crate::test_helpers::{
        image_locator, tracked, FakeCatalog, FakeFetcher, LogCapture, MemoryStore,
        RecordingAssembler,
    };
    use crate::utils::HttpClient;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        catalog: FakeCatalog,
        fetcher: Arc<FakeFetcher>,
        downloader: ChapterDownloader,
        store: MemoryStore,
        storage: StorageManager,
        _dir: TempDir,
    }

    impl Harness {
        fn new(total: u32, sources: Vec<TrackedSource>) -> Self {
            let dir = TempDir::new().unwrap();
            let fetcher = Arc::new(FakeFetcher::new());
            Self {
                catalog: FakeCatalog::new(total, 3),
                downloader: ChapterDownloader::new(fetcher.clone()),
                fetcher,
                store: MemoryStore::new(sources),
                storage: StorageManager::with_root(dir.path()),
                _dir: dir,
            }
        }

        fn controller(&self) -> SyncController<'_> {
            SyncController::new(&self.catalog, &self.downloader, &self.store, &self.storage, 5)
        }
    }

    #[tokio::test]
    async fn new_chapters_are_fetched_in_order_and_each_one_persisted() {
        let h = Harness::new(3, vec![tracked("alpha", 0, 10)]);

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(report.outcome, PassOutcome::Completed { from: 1, to: 3 });
        assert_eq!(report.chapters_completed, 3);
        assert_eq!(report.cursor, 3);
        assert_eq!(h.catalog.manifest_calls(), vec!["ch-1", "ch-2", "ch-3"]);
        assert_eq!(h.store.saved_cursors(), vec![1, 2, 3]);
        assert!(h.store.current("alpha").last_check_time.is_some());
        assert!(h
            .storage
            .chapter_dir("Test Comic", "Chapter 2")
            .join(page_file_name(3))
            .exists());

        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ScanStatus::Success);
        assert_eq!(logs[0].cursor_before, 0);
        assert_eq!(logs[0].cursor_after, 3);
    }

    #[tokio::test]
    async fn delta_is_capped_by_the_download_limit() {
        let h = Harness::new(30, vec![tracked("alpha", 10, 5)]);

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(report.outcome, PassOutcome::Completed { from: 11, to: 15 });
        assert_eq!(
            h.catalog.manifest_calls(),
            vec!["ch-11", "ch-12", "ch-13", "ch-14", "ch-15"]
        );
        assert_eq!(h.store.current("alpha").last_completed_chapter, 15);
    }

    #[tokio::test]
    async fn incomplete_chapter_halts_the_source_with_the_cursor_before_it() {
        let h = Harness::new(3, vec![tracked("alpha", 0, 10)]);
        h.fetcher.fail_locator(&image_locator("ch-2", 2));

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(
            report.outcome,
            PassOutcome::Halted {
                chapter: 2,
                failed_pages: vec![2],
                reason: "1 page(s) failed".to_string()
            }
        );
        assert_eq!(report.cursor, 1);
        assert_eq!(h.store.saved_cursors(), vec![1]);
        assert_eq!(h.catalog.manifest_calls(), vec!["ch-1", "ch-2"]);
        assert!(h.store.current("alpha").last_check_time.is_some());
        assert_eq!(h.store.logs()[0].status, ScanStatus::Partial);
    }

    #[tokio::test]
    async fn next_pass_resumes_at_the_stuck_chapter() {
        let h = Harness::new(3, vec![tracked("alpha", 0, 10)]);
        h.fetcher.fail_locator(&image_locator("ch-2", 2));
        h.controller().sync_source("alpha").await.unwrap();
        let calls_before = h.fetcher.calls().len();

        h.fetcher.heal();
        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(report.outcome, PassOutcome::Completed { from: 2, to: 3 });
        let second_pass = &h.fetcher.calls()[calls_before..];
        assert_eq!(second_pass.len(), 6);
        assert!(second_pass.iter().all(|url| !url.contains("/ch-1/")));

        let cursors = h.store.saved_cursors();
        assert_eq!(cursors, vec![1, 2, 3]);
        assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn up_to_date_source_only_records_the_check() {
        let h = Harness::new(5, vec![tracked("alpha", 5, 10)]);

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(report.outcome, PassOutcome::UpToDate);
        assert!(h.catalog.manifest_calls().is_empty());
        assert_eq!(h.store.saved_cursors(), vec![5]);
        assert!(h.store.current("alpha").last_check_time.is_some());
        assert_eq!(h.store.logs()[0].status, ScanStatus::UpToDate);
    }

    #[tokio::test]
    async fn zero_download_limit_fetches_nothing() {
        let h = Harness::new(5, vec![tracked("alpha", 1, 0)]);

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert_eq!(report.outcome, PassOutcome::UpToDate);
        assert!(h.fetcher.calls().is_empty());
        assert_eq!(h.store.current("alpha").last_completed_chapter, 1);
    }

    #[tokio::test]
    async fn catalog_failure_leaves_the_cursor_alone() {
        let h = Harness::new(4, vec![tracked("alpha", 1, 10)]);
        h.catalog.fail_listing(true);

        let report = h.controller().sync_source("alpha").await.unwrap();

        assert!(matches!(report.outcome, PassOutcome::CatalogFailed(_)));
        assert!(h.store.saves().is_empty());
        assert!(h.store.current("alpha").last_check_time.is_none());
        assert_eq!(h.store.logs()[0].status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn manifest_failure_skips_to_the_next_source() {
        let h = Harness::new(2, vec![tracked("alpha", 0, 10), tracked("beta", 1, 10)]);
        h.catalog.fail_manifest("ch-1");

        let reports = h.controller().run_all(None).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].outcome, PassOutcome::CatalogFailed(_)));
        assert_eq!(reports[0].cursor, 0);
        assert_eq!(reports[1].outcome, PassOutcome::Completed { from: 2, to: 2 });

        let saves = h.store.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].name, "beta");
        assert_eq!(saves[0].last_completed_chapter, 2);
    }

    #[tokio::test]
    async fn unwritable_cursor_store_aborts_the_run() {
        let h = Harness::new(2, vec![tracked("alpha", 0, 10), tracked("beta", 0, 10)]);
        h.store.fail_saves(true);

        let err = h.controller().run_all(None).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ComicSyncError::CursorState { ref source_name, action: "saved", .. } if source_name == "alpha"
        ));
        assert_eq!(h.catalog.manifest_calls(), vec!["ch-1"]);
        assert_eq!(h.fetcher.calls().len(), 3);
        assert!(h.store.saves().is_empty());
        assert!(h.store.logs().is_empty());
        assert_eq!(h.store.current("beta").last_completed_chapter, 0);
    }

    #[tokio::test]
    async fn page_retries_are_logged_with_source_chapter_and_page() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let config = Config::default();
        let fetcher = PageFetcher::new(
            HttpClient::new(&config.api, &config.download).unwrap(),
            RetrySettings {
                max_attempts: 2,
                retry_delay: Duration::ZERO,
                connect_retry_delay: Duration::ZERO,
            },
        );
        let downloader = ChapterDownloader::new(Arc::new(fetcher));
        let catalog = FakeCatalog::new(1, 1).with_image_host(&server.url());
        let store = MemoryStore::new(vec![tracked("alpha", 0, 10)]);
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::with_root(dir.path());

        let capture = LogCapture::default();
        let report = {
            let _guard = capture.install();
            SyncController::new(&catalog, &downloader, &store, &storage, 2)
                .sync_source("alpha")
                .await
                .unwrap()
        };

        assert!(matches!(report.outcome, PassOutcome::Halted { chapter: 1, .. }));
        let lines = capture.lines();
        let retry = lines.iter().find(|l| l.contains("retrying")).unwrap();
        for field in ["source=", "alpha", "chapter=1", "page=1", "attempt=1"] {
            assert!(retry.contains(field), "{} missing from {}", field, retry);
        }
        let give_up = lines.iter().find(|l| l.contains("Giving up")).unwrap();
        for field in ["source=", "chapter=1", "page=1", "attempts=2"] {
            assert!(give_up.contains(field), "{} missing from {}", field, give_up);
        }
    }

    #[tokio::test]
    async fn no_tracked_sources_is_a_no_op() {
        let h = Harness::new(3, Vec::new());

        let reports = h.controller().run_all(None).await.unwrap();

        assert!(reports.is_empty());
        assert!(h.catalog.list_calls().is_empty());
    }

    #[tokio::test]
    async fn filter_runs_one_source_and_rejects_unknown_names() {
        let h = Harness::new(1, vec![tracked("alpha", 0, 10), tracked("beta", 0, 10)]);

        let reports = h.controller().run_all(Some("beta")).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].source_name, "beta");
        assert_eq!(h.store.current("alpha").last_completed_chapter, 0);

        let err = h.controller().run_all(Some("gamma")).await.unwrap_err();
        assert!(matches!(err, ComicSyncError::SourceNotTracked(_)));
    }

    #[tokio::test]
    async fn assembler_sees_only_complete_chapters_and_its_errors_are_ignored() {
        let h = Harness::new(3, vec![tracked("alpha", 0, 10)]);
        h.fetcher.fail_locator(&image_locator("ch-2", 1));
        let assembler = RecordingAssembler::default();

        let report = h
            .controller()
            .with_assembler(&assembler, Some("pw".to_string()))
            .sync_source("alpha")
            .await
            .unwrap();

        assert_eq!(report.cursor, 1);
        assert_eq!(
            assembler.assembled(),
            vec![(h.storage.chapter_dir("Test Comic", "Chapter 1"), 3)]
        );
    }

    #[tokio::test]
    async fn range_download_never_moves_a_cursor() {
        let h = Harness::new(5, vec![tracked("alpha", 0, 10)]);
        h.fetcher.fail_locator(&image_locator("ch-2", 3));

        let entries = h
            .controller()
            .download_range("alpha-path", 2, 4)
            .await
            .unwrap();

        assert_eq!(entries.len(), 3);
        assert!(!entries[0].result.as_ref().unwrap().is_complete());
        assert!(entries[1].result.as_ref().unwrap().is_complete());
        assert!(entries[2].result.as_ref().unwrap().is_complete());
        assert!(h.store.saves().is_empty());
        assert!(h.store.logs().is_empty());
    }
}

use crate::error::Result;
use crate::models::{ChapterManifest, ChapterResult, FetchFailure, PageOutcome, PageTask};
use crate::storage::page_file_name;
use crate::traits::ImageFetcher;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Instrument};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Fans the pages of one chapter out over a bounded set of workers.
#[derive(Clone)]
pub struct ChapterDownloader {
    fetcher: Arc<dyn ImageFetcher>,
    show_progress: bool,
}

impl ChapterDownloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Downloads every page of `manifest` into `destination_dir`.
    ///
    /// Page failures are reported in the returned [`ChapterResult`]; only a
    /// destination directory that cannot be created is an error.
    pub async fn download_chapter(
        &self,
        manifest: &ChapterManifest,
        destination_dir: &Path,
        concurrency: usize,
    ) -> Result<ChapterResult> {
        tokio::fs::create_dir_all(destination_dir).await?;

        let total_pages = manifest.pages.len() as u32;
        info!(
            "⬇️ Downloading {} - {} ({} pages)",
            manifest.comic_name, manifest.display_name, total_pages
        );

        let pb = self.progress_bar(total_pages, &manifest.display_name);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut failed_page_numbers = BTreeSet::new();
        let mut page_numbers = Vec::new();
        let mut download_tasks = Vec::new();

        for page in &manifest.pages {
            let Some(locator) = page.locator.clone() else {
                warn!(
                    page = page.page_number,
                    "❌ Page {} of {}: {}",
                    page.page_number,
                    manifest.display_name,
                    FetchFailure::MissingLocator
                );
                failed_page_numbers.insert(page.page_number);
                pb.inc(1);
                continue;
            };

            let task = PageTask {
                page_number: page.page_number,
                remote_locator: locator,
                destination_path: destination_dir.join(page_file_name(page.page_number)),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let pb = pb.clone();

            page_numbers.push(page.page_number);
            download_tasks.push(tokio::spawn(
                async move {
                    // The semaphore is never closed, so a permit always arrives.
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = fetcher.fetch_page(&task).await;
                    pb.inc(1);
                    outcome
                }
                .in_current_span(),
            ));
        }

        let results = join_all(download_tasks).await;

        let mut succeeded_count = 0;
        for (page_number, joined) in page_numbers.into_iter().zip(results) {
            match joined {
                Ok(PageOutcome::Stored { .. }) => succeeded_count += 1,
                Ok(PageOutcome::Failed { reason, attempts }) => {
                    warn!(
                        page = page_number,
                        attempts,
                        "❌ Page {} of {} failed: {}",
                        page_number,
                        manifest.display_name,
                        reason
                    );
                    failed_page_numbers.insert(page_number);
                }
                Err(e) => {
                    error!(
                        page = page_number,
                        "❌ Page {} of {}: {}",
                        page_number,
                        manifest.display_name,
                        FetchFailure::WorkerPanicked(e.to_string())
                    );
                    failed_page_numbers.insert(page_number);
                }
            }
        }

        pb.finish_with_message("done");
        info!(
            "Downloaded {}/{} pages for {}",
            succeeded_count, total_pages, manifest.display_name
        );

        Ok(ChapterResult {
            chapter_id: manifest.chapter_id.clone(),
            total_pages,
            succeeded_count,
            failed_page_numbers,
        })
    }

    fn progress_bar(&self, len: u32, name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(name.to_string());
        pb
    }
}

//! In-memory stand-ins for the catalog, the page fetcher and the cursor store.

use crate::downloader::fetcher::write_atomically;
use crate::error::{ComicSyncError, Result};
use crate::models::{
    ChapterListing, ChapterManifest, ChapterSummary, FetchFailure, PageDescriptor, PageOutcome,
    PageTask, ScanLog, TrackedSource,
};
use crate::traits::{CatalogApi, ChapterAssembler, CursorStore, ImageFetcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn tracked(name: &str, last: u32, limit: u32) -> TrackedSource {
    TrackedSource {
        name: name.to_string(),
        remote_path: format!("{}-path", name),
        last_completed_chapter: last,
        last_check_time: None,
        download_limit: limit,
    }
}

const IMAGE_HOST: &str = "https://img.test";

pub fn image_locator(chapter_id: &str, page: u32) -> String {
    format!("{}/{}/{}.jpg", IMAGE_HOST, chapter_id, page)
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Routes events on the current thread here until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Catalog with chapters `ch-1..=ch-total`, each `pages_per_chapter` long.
pub struct FakeCatalog {
    total: u32,
    pages_per_chapter: u32,
    image_host: String,
    fail_listing: AtomicBool,
    fail_manifest_for: Mutex<HashSet<String>>,
    list_calls: Mutex<Vec<(u32, u32)>>,
    manifest_calls: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new(total: u32, pages_per_chapter: u32) -> Self {
        Self {
            total,
            pages_per_chapter,
            image_host: IMAGE_HOST.to_string(),
            fail_listing: AtomicBool::new(false),
            fail_manifest_for: Mutex::new(HashSet::new()),
            list_calls: Mutex::new(Vec::new()),
            manifest_calls: Mutex::new(Vec::new()),
        }
    }

    /// Serves page images from `host` instead of the unreachable default.
    pub fn with_image_host(mut self, host: &str) -> Self {
        self.image_host = host.to_string();
        self
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_manifest(&self, chapter_id: &str) {
        self.fail_manifest_for
            .lock()
            .unwrap()
            .insert(chapter_id.to_string());
    }

    /// `(limit, offset)` of every list request, in order.
    pub fn list_calls(&self) -> Vec<(u32, u32)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn manifest_calls(&self) -> Vec<String> {
        self.manifest_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CatalogApi for FakeCatalog {
    async fn list_chapters(&self, _source: &str, limit: u32, offset: u32) -> Result<ChapterListing> {
        self.list_calls.lock().unwrap().push((limit, offset));
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ComicSyncError::api(500, "catalog unavailable"));
        }
        let total = self.total;
        let items = (offset + 1..=total.min(offset + limit))
            .map(|index| ChapterSummary {
                chapter_id: format!("ch-{}", index),
                name: format!("Chapter {}", index),
                size: Some(self.pages_per_chapter),
                created: None,
            })
            .collect();
        Ok(ChapterListing {
            total,
            offset,
            items,
        })
    }

    async fn get_chapter(&self, _source: &str, chapter_id: &str) -> Result<ChapterManifest> {
        self.manifest_calls
            .lock()
            .unwrap()
            .push(chapter_id.to_string());
        if self.fail_manifest_for.lock().unwrap().contains(chapter_id) {
            return Err(ComicSyncError::api(404, format!("{} not found", chapter_id)));
        }
        let number = chapter_id.trim_start_matches("ch-");
        Ok(ChapterManifest {
            chapter_id: chapter_id.to_string(),
            display_name: format!("Chapter {}", number),
            comic_name: "Test Comic".to_string(),
            pages: (1..=self.pages_per_chapter)
                .map(|page| PageDescriptor {
                    page_number: page,
                    locator: Some(format!("{}/{}/{}.jpg", self.image_host, chapter_id, page)),
                })
                .collect(),
        })
    }
}

/// Writes the locator text as the page body.
pub struct FakeFetcher {
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    reverse_delays: Option<u32>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            reverse_delays: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Later pages finish first.
    pub fn with_reverse_delays(mut self, pages: u32) -> Self {
        self.reverse_delays = Some(pages);
        self
    }

    pub fn fail_locator(&self, locator: &str) {
        self.failing.lock().unwrap().insert(locator.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn panic_on_locator(&self, locator: &str) {
        self.panicking.lock().unwrap().insert(locator.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch_page(&self, task: &PageTask) -> PageOutcome {
        self.calls.lock().unwrap().push(task.remote_locator.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        match self.reverse_delays {
            Some(pages) => {
                let wait = pages.saturating_sub(task.page_number) as u64 * 3;
                tokio::time::sleep(Duration::from_millis(wait + 1)).await;
            }
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.lock().unwrap().contains(&task.remote_locator) {
            panic!("fetcher blew up on {}", task.remote_locator);
        }
        if self.failing.lock().unwrap().contains(&task.remote_locator) {
            return PageOutcome::Failed {
                reason: FetchFailure::Status(500),
                attempts: 5,
            };
        }
        match write_atomically(&task.destination_path, task.remote_locator.as_bytes()).await {
            Ok(()) => PageOutcome::Stored { attempts: 1 },
            Err(e) => PageOutcome::Failed {
                reason: FetchFailure::Write(e.to_string()),
                attempts: 1,
            },
        }
    }
}

/// Cursor store that remembers every save.
pub struct MemoryStore {
    sources: Mutex<Vec<TrackedSource>>,
    saves: Mutex<Vec<TrackedSource>>,
    logs: Mutex<Vec<ScanLog>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new(sources: Vec<TrackedSource>) -> Self {
        Self {
            sources: Mutex::new(sources),
            saves: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Makes every save fail the way a read-only state file does.
    pub fn fail_saves(&self, fail: bool) {
        self.read_only.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self, name: &str) -> TrackedSource {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap()
    }

    pub fn saves(&self) -> Vec<TrackedSource> {
        self.saves.lock().unwrap().clone()
    }

    pub fn saved_cursors(&self) -> Vec<u32> {
        self.saves()
            .iter()
            .map(|s| s.last_completed_chapter)
            .collect()
    }

    pub fn logs(&self) -> Vec<ScanLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryStore {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    async fn load(&self, source_name: &str) -> Result<TrackedSource> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == source_name)
            .cloned()
            .ok_or_else(|| ComicSyncError::source_not_tracked(source_name))
    }

    async fn save(&self, source_name: &str, cursor: &TrackedSource) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "state is read-only").into());
        }
        let mut sources = self.sources.lock().unwrap();
        let entry = sources
            .iter_mut()
            .find(|s| s.name == source_name)
            .ok_or_else(|| ComicSyncError::source_not_tracked(source_name))?;
        *entry = cursor.clone();
        self.saves.lock().unwrap().push(cursor.clone());
        Ok(())
    }

    async fn record_pass(&self, log: &ScanLog) -> Result<()> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }
}

/// Records which chapter directories were assembled.
#[derive(Default)]
pub struct RecordingAssembler {
    assembled: Mutex<Vec<(PathBuf, u32)>>,
}

impl RecordingAssembler {
    pub fn assembled(&self) -> Vec<(PathBuf, u32)> {
        self.assembled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChapterAssembler for RecordingAssembler {
    async fn assemble(&self, chapter_dir: &Path, page_count: u32, _password: Option<&str>) -> Result<()> {
        self.assembled
            .lock()
            .unwrap()
            .push((chapter_dir.to_path_buf(), page_count));
        Err(ComicSyncError::config("assembly is best effort"))
    }
}

use crate::error::Result;
use crate::models::{
    ChapterListing, ChapterManifest, PageOutcome, PageTask, ScanLog, TrackedSource,
};
use std::path::Path;

/// Remote chapter catalog for a comic identified by its path word
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// One page of the chapter list, in publication order
    async fn list_chapters(&self, source: &str, limit: u32, offset: u32) -> Result<ChapterListing>;

    /// Ordered image manifest of one chapter
    async fn get_chapter(&self, source: &str, chapter_id: &str) -> Result<ChapterManifest>;
}

/// Fetches one page image to its destination; failures are reported as data
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_page(&self, task: &PageTask) -> PageOutcome;
}

/// Durable per-source resume cursor
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Names of all tracked sources, in configuration order
    async fn list(&self) -> Result<Vec<String>>;

    async fn load(&self, source_name: &str) -> Result<TrackedSource>;

    /// Overwrites everything stored for `source_name`
    async fn save(&self, source_name: &str, cursor: &TrackedSource) -> Result<()>;

    /// Keeps a record of a finished pass. Stores without history ignore it.
    async fn record_pass(&self, _log: &ScanLog) -> Result<()> {
        Ok(())
    }
}

/// Post-processing of a complete chapter directory
#[async_trait::async_trait]
pub trait ChapterAssembler: Send + Sync {
    async fn assemble(
        &self,
        chapter_dir: &Path,
        page_count: u32,
        password: Option<&str>,
    ) -> Result<()>;
}

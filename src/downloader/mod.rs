pub mod fetcher;
pub mod orchestrator;
pub mod retry;

pub use fetcher::{PageFetcher, RetrySettings};
pub use orchestrator::{ChapterDownloader, DEFAULT_CONCURRENCY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::error::{ComicSyncError, Result};

/// A remote comic being mirrored, plus its resume cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSource {
    pub name: String,
    pub remote_path: String,
    pub last_completed_chapter: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub download_limit: u32,
}

impl TrackedSource {
    /// Moves the cursor forward to `chapter`. The cursor never goes back.
    pub fn advance_to(&mut self, chapter: u32) -> Result<()> {
        if chapter < self.last_completed_chapter {
            return Err(ComicSyncError::CursorRegression {
                source_name: self.name.clone(),
                current: self.last_completed_chapter,
                requested: chapter,
            });
        }
        self.last_completed_chapter = chapter;
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_check_time = Some(now);
    }

    /// Last chapter index this pass may reach given the remote total.
    pub fn delta_target(&self, remote_total: u32) -> u32 {
        remote_total.min(self.last_completed_chapter.saturating_add(self.download_limit))
    }
}

impl From<&SourceConfig> for TrackedSource {
    fn from(source: &SourceConfig) -> Self {
        Self {
            name: source.name.clone(),
            remote_path: source.path.clone(),
            last_completed_chapter: source.last_chapter,
            last_check_time: source.last_check_time,
            download_limit: source.download_limit,
        }
    }
}

impl From<&TrackedSource> for SourceConfig {
    fn from(source: &TrackedSource) -> Self {
        Self {
            name: source.name.clone(),
            path: source.remote_path.clone(),
            last_chapter: source.last_completed_chapter,
            last_check_time: source.last_check_time,
            download_limit: source.download_limit,
        }
    }
}

/// Row of the remote chapter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSummary {
    pub chapter_id: String,
    pub name: String,
    pub size: Option<u32>,
    pub created: Option<String>,
}

/// One page of the remote chapter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterListing {
    pub total: u32,
    pub offset: u32,
    pub items: Vec<ChapterSummary>,
}

/// A catalog position resolved to a concrete chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChapter {
    pub index: u32,
    pub chapter_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub page_number: u32,
    /// `None` when the remote page index points outside the image list.
    pub locator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterManifest {
    pub chapter_id: String,
    pub display_name: String,
    pub comic_name: String,
    pub pages: Vec<PageDescriptor>,
}

impl ChapterManifest {
    /// Builds descriptors from an image list and the order in which to read it.
    /// An empty order means the image list is already in reading order.
    pub fn from_indexed(
        chapter_id: String,
        display_name: String,
        comic_name: String,
        locators: &[String],
        order: &[usize],
    ) -> Self {
        let pages = if order.is_empty() {
            locators
                .iter()
                .enumerate()
                .map(|(i, url)| PageDescriptor {
                    page_number: i as u32 + 1,
                    locator: Some(url.clone()),
                })
                .collect()
        } else {
            order
                .iter()
                .enumerate()
                .map(|(i, &slot)| PageDescriptor {
                    page_number: i as u32 + 1,
                    locator: locators.get(slot).cloned(),
                })
                .collect()
        };

        Self {
            chapter_id,
            display_name,
            comic_name,
            pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub page_number: u32,
    pub remote_locator: String,
    pub destination_path: PathBuf,
}

/// Why a page could not be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Status(u16),
    Timeout,
    Connect(String),
    Request(String),
    Write(String),
    MissingLocator,
    WorkerPanicked(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Status(code) => write!(f, "HTTP {}", code),
            FetchFailure::Timeout => write!(f, "request timed out"),
            FetchFailure::Connect(e) => write!(f, "connection error: {}", e),
            FetchFailure::Request(e) => write!(f, "request error: {}", e),
            FetchFailure::Write(e) => write!(f, "write error: {}", e),
            FetchFailure::MissingLocator => write!(f, "page index outside the image list"),
            FetchFailure::WorkerPanicked(e) => write!(f, "worker panicked: {}", e),
        }
    }
}

/// Outcome of one page fetch, including how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Stored { attempts: u32 },
    Failed { reason: FetchFailure, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterResult {
    pub chapter_id: String,
    pub total_pages: u32,
    pub succeeded_count: u32,
    pub failed_page_numbers: BTreeSet<u32>,
}

impl ChapterResult {
    pub fn is_complete(&self) -> bool {
        self.failed_page_numbers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanLog {
    pub id: String,
    pub source_name: String,
    pub status: ScanStatus,
    pub remote_total: Option<i64>,
    pub cursor_before: i64,
    pub cursor_after: i64,
    pub chapters_attempted: i64,
    pub chapters_completed: i64,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "scan_status", rename_all = "lowercase")]
pub enum ScanStatus {
    UpToDate,
    Success,
    Partial,
    Failed,
}

impl ScanLog {
    pub fn new(source: &TrackedSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_name: source.name.clone(),
            status: ScanStatus::Success,
            remote_total: None,
            cursor_before: source.last_completed_chapter as i64,
            cursor_after: source.last_completed_chapter as i64,
            chapters_attempted: 0,
            chapters_completed: 0,
            error_message: None,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::UpToDate => write!(f, "Up to date"),
            ScanStatus::Success => write!(f, "Success"),
            ScanStatus::Partial => write!(f, "Partial"),
            ScanStatus::Failed => write!(f, "Failed"),
        }
    }
}

use crate::config::{Config, SourceConfig};
use crate::error::{ComicSyncError, Result};
use crate::models::TrackedSource;
use crate::traits::CursorStore;
use std::path::PathBuf;
use tracing::debug;

/// Keeps cursors in the `[[sources]]` tables of the config file.
///
/// Every call re-reads the file, so edits made between runs are picked up
/// and a save only rewrites the entry it was given.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CursorStore for FileCursorStore {
    async fn list(&self) -> Result<Vec<String>> {
        let config = Config::load(&self.path)?;
        Ok(config.sources.into_iter().map(|s| s.name).collect())
    }

    async fn load(&self, source_name: &str) -> Result<TrackedSource> {
        let config = Config::load(&self.path)?;
        config
            .get_source(source_name)
            .map(TrackedSource::from)
            .ok_or_else(|| ComicSyncError::source_not_tracked(source_name))
    }

    async fn save(&self, source_name: &str, cursor: &TrackedSource) -> Result<()> {
        let mut config = Config::load(&self.path)?;
        let entry = config
            .get_source_mut(source_name)
            .ok_or_else(|| ComicSyncError::source_not_tracked(source_name))?;
        *entry = SourceConfig::from(cursor);
        config.save(&self.path)?;
        debug!(
            source = source_name,
            chapter = cursor.last_completed_chapter,
            "Cursor written to {:?}",
            self.path
        );
        Ok(())
    }
}

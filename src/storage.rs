use crate::config::StorageConfig;
use crate::error::{ComicSyncError, Result};
use crate::traits::ChapterAssembler;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// File name of a page inside its chapter directory, e.g. `007.jpg`.
pub fn page_file_name(page_number: u32) -> String {
    format!("{:03}.jpg", page_number)
}

#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_root(&config.output_dir)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<comic>/<chapter>`; created by the downloader, not here.
    pub fn chapter_dir(&self, comic_name: &str, chapter_name: &str) -> PathBuf {
        self.root
            .join(sanitize_filename(comic_name))
            .join(sanitize_filename(chapter_name))
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    let cleaned = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim_matches(' ')
        .to_string();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Packs a finished chapter into `<chapter>.cbz` beside its directory.
#[derive(Debug, Clone, Default)]
pub struct CbzAssembler;

#[async_trait::async_trait]
impl ChapterAssembler for CbzAssembler {
    async fn assemble(
        &self,
        chapter_dir: &Path,
        page_count: u32,
        password: Option<&str>,
    ) -> Result<()> {
        if password.is_some() {
            warn!("CBZ archives cannot carry a password, writing {:?} unprotected", chapter_dir);
        }
        let dir = chapter_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || write_cbz(&dir, page_count))
            .await
            .map_err(|e| ComicSyncError::Io(std::io::Error::other(e.to_string())))??;
        info!("📦 Created chapter archive: {:?}", archive);
        Ok(())
    }
}

fn write_cbz(chapter_dir: &Path, page_count: u32) -> Result<PathBuf> {
    let name = chapter_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ComicSyncError::config(format!("{:?} has no directory name", chapter_dir)))?;
    let parent = chapter_dir.parent().unwrap_or_else(|| Path::new("."));
    let archive_path = parent.join(format!("{}.cbz", name));
    let part_path = parent.join(format!("{}.cbz.part", name));

    let file = File::create(&part_path)?;
    let mut zip = zip::ZipWriter::new(file);
    // Images are already compressed.
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for page in 1..=page_count {
        let file_name = page_file_name(page);
        let page_path = chapter_dir.join(&file_name);
        if !page_path.exists() {
            warn!("Page {:?} is missing, skipping it in the archive", page_path);
            continue;
        }
        zip.start_file(file_name, options)?;
        zip.write_all(&std::fs::read(&page_path)?)?;
    }

    zip.finish()?;
    std::fs::rename(&part_path, &archive_path)?;
    Ok(archive_path)
}

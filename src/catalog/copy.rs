use crate::catalog::paginator::page_offset;
use crate::config::ApiConfig;
use crate::error::{ComicSyncError, Result};
use crate::models::{ChapterListing, ChapterManifest, ChapterSummary};
use crate::traits::CatalogApi;
use crate::utils::HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

pub const SEARCH_PAGE_SIZE: u32 = 5;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    results: Option<T>,
}

impl<T> Envelope<T> {
    fn into_results(self) -> Result<T> {
        if self.code != 200 {
            return Err(ComicSyncError::api(self.code, self.message));
        }
        self.results
            .ok_or_else(|| ComicSyncError::api(self.code, "response carried no results"))
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResults {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    list: Vec<RawSearchHit>,
}

#[derive(Debug, Deserialize)]
struct RawSearchHit {
    name: String,
    path_word: String,
    #[serde(default)]
    author: Vec<RawNamed>,
    #[serde(default)]
    cover: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawDetailResults {
    comic: RawComic,
}

#[derive(Debug, Deserialize)]
struct RawComic {
    name: String,
    #[serde(default)]
    brief: Option<String>,
    #[serde(default)]
    datetime_updated: Option<String>,
    #[serde(default)]
    last_chapter: Option<RawNamed>,
}

#[derive(Debug, Deserialize)]
struct RawChapterList {
    total: u32,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    list: Vec<RawChapterRow>,
}

#[derive(Debug, Deserialize)]
struct RawChapterRow {
    uuid: String,
    name: String,
    #[serde(default)]
    size: Option<u32>,
    #[serde(default)]
    datetime_created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChapterResults {
    comic: RawNamed,
    chapter: RawChapter,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    name: String,
    uuid: String,
    #[serde(default)]
    contents: Vec<RawImage>,
    #[serde(default)]
    words: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub path_word: String,
    pub authors: Vec<String>,
    pub cover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub total: u32,
    pub page: u32,
    pub items: Vec<SearchHit>,
}

impl SearchPage {
    pub fn page_count(&self) -> u32 {
        self.total.div_ceil(SEARCH_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicDetail {
    pub name: String,
    pub brief: Option<String>,
    pub last_updated: Option<String>,
    pub latest_chapter: Option<String>,
}

/// Client for the Copy comic JSON API (`/api/v3`).
#[derive(Clone)]
pub struct CopyApiClient {
    http_client: HttpClient,
    base_url: Url,
    platform: String,
}

impl CopyApiClient {
    pub fn new(http_client: HttpClient, api: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&api.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ComicSyncError::config(format!(
                "api.base_url '{}' cannot hold a path",
                api.base_url
            )));
        }
        Ok(Self {
            http_client,
            base_url,
            platform: api.platform.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let envelope: Envelope<T> = self.http_client.get_json(url).await?;
        envelope.into_results()
    }

    pub async fn search(&self, keyword: &str, page: u32) -> Result<SearchPage> {
        let page = page.max(1);
        let mut url = self.endpoint(&["search", "comic"]);
        url.query_pairs_mut()
            .append_pair("limit", &SEARCH_PAGE_SIZE.to_string())
            .append_pair("offset", &page_offset(page, SEARCH_PAGE_SIZE).to_string())
            .append_pair("q", keyword)
            .append_pair("q_type", "")
            .append_pair("platform", &self.platform);

        let raw: RawSearchResults = self.call(url).await?;
        info!("🔍 Search '{}' page {}: {} hits in total", keyword, page, raw.total);

        Ok(SearchPage {
            total: raw.total,
            page,
            items: raw
                .list
                .into_iter()
                .map(|hit| SearchHit {
                    name: hit.name,
                    path_word: hit.path_word,
                    authors: hit.author.into_iter().map(|a| a.name).collect(),
                    cover: hit.cover,
                })
                .collect(),
        })
    }

    pub async fn comic_detail(&self, path_word: &str) -> Result<ComicDetail> {
        let mut url = self.endpoint(&["comic2", path_word]);
        url.query_pairs_mut().append_pair("platform", &self.platform);

        let raw: RawDetailResults = self.call(url).await?;
        Ok(ComicDetail {
            name: raw.comic.name,
            brief: raw.comic.brief,
            last_updated: raw.comic.datetime_updated,
            latest_chapter: raw.comic.last_chapter.map(|c| c.name),
        })
    }
}

#[async_trait::async_trait]
impl CatalogApi for CopyApiClient {
    async fn list_chapters(&self, source: &str, limit: u32, offset: u32) -> Result<ChapterListing> {
        let mut url = self.endpoint(&["comic", source, "group", "default", "chapters"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        let raw: RawChapterList = self.call(url).await?;
        debug!(
            source,
            "Chapter list offset {}: {} rows of {}",
            raw.offset,
            raw.list.len(),
            raw.total
        );

        Ok(ChapterListing {
            total: raw.total,
            offset: raw.offset,
            items: raw
                .list
                .into_iter()
                .map(|row| ChapterSummary {
                    chapter_id: row.uuid,
                    name: row.name,
                    size: row.size,
                    created: row.datetime_created,
                })
                .collect(),
        })
    }

    async fn get_chapter(&self, source: &str, chapter_id: &str) -> Result<ChapterManifest> {
        let url = self.endpoint(&["comic", source, "chapter2", chapter_id]);
        let raw: RawChapterResults = self.call(url).await?;

        let locators: Vec<String> = raw.chapter.contents.into_iter().map(|c| c.url).collect();
        let manifest = ChapterManifest::from_indexed(
            raw.chapter.uuid,
            raw.chapter.name,
            raw.comic.name,
            &locators,
            &raw.chapter.words,
        );
        if manifest.pages.is_empty() {
            return Err(ComicSyncError::EmptyManifest(chapter_id.to_string()));
        }
        Ok(manifest)
    }
}

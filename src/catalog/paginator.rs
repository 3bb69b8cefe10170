use crate::error::{ComicSyncError, Result};
use crate::models::ResolvedChapter;
use crate::traits::CatalogApi;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

/// Chapters per remote list page.
pub const CHAPTER_PAGE_SIZE: u32 = 50;

/// 1-based list page holding the 1-based chapter `index`.
pub fn page_for_index(index: u32, page_size: u32) -> u32 {
    index.saturating_sub(1) / page_size + 1
}

/// Offset of the first entry on 1-based list `page`.
pub fn page_offset(page: u32, page_size: u32) -> u32 {
    page.saturating_sub(1).saturating_mul(page_size)
}

/// Resolves catalog positions to chapter ids, one list page at a time.
pub struct CatalogPaginator<'a> {
    api: &'a dyn CatalogApi,
    page_size: u32,
}

impl<'a> CatalogPaginator<'a> {
    pub fn new(api: &'a dyn CatalogApi) -> Self {
        Self::with_page_size(api, CHAPTER_PAGE_SIZE)
    }

    pub fn with_page_size(api: &'a dyn CatalogApi, page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
        }
    }

    pub async fn remote_total(&self, source: &str) -> Result<u32> {
        let listing = self.api.list_chapters(source, self.page_size, 0).await?;
        Ok(listing.total)
    }

    /// Lazily yields chapters `start..=end` in order, fetching only the list
    /// pages that cover the range. The first gap or failed page ends the
    /// stream with an error.
    pub fn stream_range(
        &self,
        source: &'a str,
        start: u32,
        end: u32,
    ) -> BoxStream<'a, Result<ResolvedChapter>> {
        if start == 0 {
            return stream::once(async move {
                Err::<ResolvedChapter, _>(ComicSyncError::unresolved_range(
                    source,
                    start,
                    end,
                    "chapter indices start at 1",
                ))
            })
            .boxed();
        }
        if start > end {
            return stream::empty().boxed();
        }

        let api = self.api;
        let page_size = self.page_size;
        let first = page_for_index(start, page_size);
        let last = page_for_index(end, page_size);

        stream::try_unfold(first, move |page| async move {
            if page > last {
                return Ok::<_, ComicSyncError>(None);
            }
            let offset = page_offset(page, page_size);
            debug!(source, page, offset, "Fetching chapter list page");
            let listing = api
                .list_chapters(source, page_size, offset)
                .await
                .map_err(|e| ComicSyncError::unresolved_range(source, start, end, e.to_string()))?;

            let lo = start.max(offset + 1);
            let hi = end.min(offset + page_size);
            let mut chapters = Vec::with_capacity((hi + 1 - lo) as usize);
            for index in lo..=hi {
                let item = listing
                    .items
                    .get((index - offset - 1) as usize)
                    .ok_or_else(|| {
                        ComicSyncError::unresolved_range(
                            source,
                            start,
                            end,
                            format!(
                                "chapter {} is not on list page {} (remote total {})",
                                index, page, listing.total
                            ),
                        )
                    })?;
                chapters.push(Ok(ResolvedChapter {
                    index,
                    chapter_id: item.chapter_id.clone(),
                    name: item.name.clone(),
                }));
            }

            Ok(Some((stream::iter(chapters), page + 1)))
        })
        .try_flatten()
        .boxed()
    }

    /// All of `start..=end`, or an error if any part cannot be resolved.
    pub async fn resolve_range(
        &self,
        source: &'a str,
        start: u32,
        end: u32,
    ) -> Result<Vec<ResolvedChapter>> {
        self.stream_range(source, start, end).try_collect().await
    }
}

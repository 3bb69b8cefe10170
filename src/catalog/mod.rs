pub mod copy;
pub mod paginator;

pub use copy::CopyApiClient;
pub use paginator::{page_offset, CatalogPaginator, CHAPTER_PAGE_SIZE};

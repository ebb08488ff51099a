//! Seams between the sync engine and the remote API

use crate::error::FetchError;
use crate::models::{Cursor, ListingMode, Post};

use super::RateWindow;

/// One paginated listing request
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub collection: String,
    pub mode: ListingMode,
    pub cursor: Option<Cursor>,
    pub page_size: usize,
}

impl PageRequest {
    /// The API never returns more than this many items per page
    pub const MAX_PAGE_SIZE: usize = 100;

    /// Build a request, clamping `page_size` to `1..=MAX_PAGE_SIZE`
    pub fn new(
        collection: impl Into<String>,
        mode: ListingMode,
        cursor: Option<Cursor>,
        page_size: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            mode,
            cursor,
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }
}

/// Response metadata the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResponseMeta {
    pub rate: RateWindow,
}

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page {
    pub posts: Vec<Post>,
    /// Continuation cursor; `None` means the listing is exhausted
    pub next_cursor: Option<Cursor>,
    pub meta: ResponseMeta,
}

/// Issues a single authenticated listing request
///
/// Non-success responses are errors; retrying is the caller's decision.
pub trait PageSource {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError>;
}

/// Answers whether a collection name resolves to a real remote collection
pub trait CollectionDirectory {
    fn collection_exists(&self, name: &str) -> Result<bool, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_clamped() {
        let req = PageRequest::new("sweden", ListingMode::New, None, 1000);
        assert_eq!(req.page_size, 100);

        let req = PageRequest::new("sweden", ListingMode::New, None, 0);
        assert_eq!(req.page_size, 1);

        let req = PageRequest::new("sweden", ListingMode::New, None, 20);
        assert_eq!(req.page_size, 20);
    }
}

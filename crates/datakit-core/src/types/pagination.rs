//! Pagination types for list queries.

use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::result::DataResult;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// Page size meaning "fetch everything in one page".
pub const FETCH_ALL: i64 = i32::MAX as i64;

/// A validated page window: zero-based index plus size.
///
/// The fields are private so every instance, including deserialized ones,
/// passes through [`PageRequest::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageRequest")]
pub struct PageRequest {
    index: u64,
    size: u64,
}

/// Wire shape of a [`PageRequest`] before validation.
#[derive(Deserialize)]
struct RawPageRequest {
    #[serde(default)]
    index: i64,
    #[serde(default = "default_page_size")]
    size: i64,
}

impl TryFrom<RawPageRequest> for PageRequest {
    type Error = DataError;

    fn try_from(raw: RawPageRequest) -> Result<Self, Self::Error> {
        Self::new(raw.index, raw.size)
    }
}

impl PageRequest {
    /// Validate raw pagination arguments.
    ///
    /// Fails with `InvalidArgument` when `index < 0` or `size <= 0`.
    pub fn new(index: i64, size: i64) -> DataResult<Self> {
        if index < 0 {
            return Err(DataError::invalid_argument(format!(
                "page index must be >= 0, got {index}"
            )));
        }
        if size <= 0 {
            return Err(DataError::invalid_argument(format!(
                "page size must be > 0, got {size}"
            )));
        }
        Ok(Self {
            index: index as u64,
            size: size as u64,
        })
    }

    /// The first page with the given size.
    pub fn first(size: i64) -> DataResult<Self> {
        Self::new(0, size)
    }

    /// A single page holding every matching row.
    pub fn all() -> Self {
        Self {
            index: 0,
            size: FETCH_ALL as u64,
        }
    }

    /// Page number (0-based).
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Number of items per page, always at least one.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of rows to skip before this page.
    pub fn skip(&self) -> u64 {
        self.index.saturating_mul(self.size)
    }

    /// Number of rows to take for this page.
    pub fn take(&self) -> u64 {
        self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            index: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// An immutable page of results plus the metadata of the full result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items on this page, in query order.
    pub items: Vec<T>,
    /// Current page number (0-based).
    pub index: u64,
    /// Number of items per page.
    pub size: u64,
    /// Total number of matching rows across all pages.
    pub count: u64,
    /// Total number of pages, `ceil(count / size)`.
    pub pages: u64,
}

impl<T> Page<T> {
    /// Assemble a page from fetched items and the total row count.
    pub fn new(items: Vec<T>, request: PageRequest, count: u64) -> Self {
        let size = request.size.max(1);
        Self {
            items,
            index: request.index,
            size,
            count,
            pages: count.div_ceil(size),
        }
    }

    /// An empty page for the given request.
    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), request, 0)
    }

    /// Whether a page precedes this one.
    pub fn has_previous(&self) -> bool {
        self.index > 0
    }

    /// Whether a page follows this one.
    pub fn has_next(&self) -> bool {
        self.index.saturating_add(1) < self.pages
    }

    /// Project every item while keeping the paging metadata.
    pub fn map<R>(self, f: impl FnMut(T) -> R) -> Page<R> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            index: self.index,
            size: self.size,
            count: self.count,
            pages: self.pages,
        }
    }
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE as i64
}

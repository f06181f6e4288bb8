//! Data types shared by every datakit crate.

pub mod filter;
pub mod pagination;
pub mod query;
pub mod sorting;

pub use filter::{FilterPolicy, Predicate};
pub use pagination::{DEFAULT_PAGE_SIZE, FETCH_ALL, Page, PageRequest};
pub use query::{Include, Navigation, Query, QuerySpec, RawSql, Source, SqlValue, Tracking, Window};
pub use sorting::{OrderBy, SortDirection};

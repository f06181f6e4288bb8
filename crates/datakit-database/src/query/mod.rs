//! Query composition, in-process evaluation, and paging.

pub mod builder;
pub mod eval;
pub mod pager;

pub use builder::compose;
pub use pager::{paginate, paginate_selected};

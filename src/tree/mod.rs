//! History tree: construction, queries and verification

pub mod history;
pub mod integrity;
pub mod query;

pub use history::HistoryTree;
pub use integrity::IntegrityReport;
pub use query::{RangeIter, RangeQuery};

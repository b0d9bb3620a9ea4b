//! Network and persistence adapters for the segmented classification store.

pub mod cache;
pub mod hts;

pub use cache::{CacheError, ShardCache, PRIORITY_CHAPTERS};
pub use hts::{HtsClient, HtsClientError, SegmentIndex, DEFAULT_SEARCH_LIMIT};

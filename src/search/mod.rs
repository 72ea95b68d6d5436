pub mod azure;
pub mod merge;

pub use azure::{AzureSearchClient, DocumentSearch, NewEntry};
pub use merge::{merge_filter_rank, MergePolicy, MergedContext};

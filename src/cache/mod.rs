pub mod regex_cache;
pub mod snapshot_cache;

pub use regex_cache::RegexCache;
pub use snapshot_cache::SnapshotCache;

#![forbid(unsafe_code)]

mod cache;
mod frame;

pub use cache::{BufferCache, CacheOptions, CacheStats, LockMode, PageGuard, PageRef};

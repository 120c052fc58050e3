//! Lenient JSON handling for model-produced payloads.

pub mod cache;
pub mod repair;

pub use cache::{ParseCache, DEFAULT_PARSE_CACHE_CAPACITY};
pub use repair::{parse_lenient, repair};

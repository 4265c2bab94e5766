pub mod cache_service;
pub mod fingerprint;
pub mod models;

pub use cache_service::{Clock, ResultCache, SystemClock};
pub use fingerprint::Fingerprint;
pub use models::{CacheEntry, RankedResult, ResultPayload};

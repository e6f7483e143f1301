//! Read-Through Cache
//!
//! Process-local cache for slowly-changing reference data. Entries expire a
//! fixed time after insertion; keys are strings so a whole tenant can be
//! dropped by prefix.

mod ttl;

pub use ttl::{CacheEntry, CacheStatus, TtlCache, DEFAULT_TTL};

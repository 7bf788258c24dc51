//! Session cache for activity data.
//!
//! This module provides:
//! - Canonical cache keys per scope and module
//! - Explicit per-entry staleness, set by invalidation and cleared by a fetch
//! - An `ensure_fresh` read path that serves last-known data when offline
//! - A watch channel publishing the activity list and metrics to consumers

mod keys;
mod layer;
mod result;
mod store;

pub use keys::CacheKey;
pub use result::{CacheResult, CacheSource};
pub use store::{
  ActivityCache, ActivityView, CacheEntry, CachedValue, FetchTicket, Freshness, Invalidation,
};

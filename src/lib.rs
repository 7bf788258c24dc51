//! Client-side activity cache with optimistic mutations and invalidation that
//! follows an activity's relationships across the CRM and Lead Generation
//! modules.

pub mod activity;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod remote;
pub mod sync;

pub use activity::{Activity, ActivityPatch, EntityRef, EntityType, Module, NewActivity, Source};
pub use cache::{ActivityCache, ActivityView, CacheKey};
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use remote::{ActivityStore, HttpActivityStore};
pub use sync::ActivitySync;

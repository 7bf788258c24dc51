//! Keeping the cache consistent with the remote store.
//!
//! - `propagate`: which keys a change makes stale
//! - `mutation`: optimistic create/update/complete/delete with rollback
//! - `coordinator`: the consumer facade, manual sync and background refresh

mod coordinator;
mod mutation;
pub mod propagate;

pub use coordinator::{ActivitySync, BackgroundRefresh};
pub use mutation::MutationPipeline;

//! The Activity data model and the rules for what an activity relates to.

mod metrics;
mod relations;
mod types;

pub use metrics::ActivityMetrics;
pub use relations::{resolve_relations, RelationError, Relations};
pub use types::{
  Activity, ActivityPatch, ActivityStatus, ActivityType, EntityRef, EntityType, Module,
  NewActivity, Priority, Source,
};

//! Canonical names for cached collections.
//!
//! Keys are plain values compared structurally: two keys built from the same
//! scope and params are equal and hash the same. Invalidation relies on that,
//! so keys are only ever built through this module.

use std::fmt;

use crate::activity::{EntityRef, EntityType, Module};

/// Query key for everything the cache holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
  /// Every activity
  Activities,
  /// Aggregate over every activity
  Metrics,
  /// Activities of one entity as shown by `module`
  EntityActivities { module: Module, entity: EntityRef },
  /// An entity's own detail record as shown by `module`
  EntityRecord { module: Module, entity: EntityRef },
  /// The list view of an entity type (shows per-entity activity counts)
  EntityList {
    module: Module,
    entity_type: EntityType,
  },
}

impl CacheKey {
  pub fn all() -> Self {
    Self::Activities
  }

  pub fn metrics() -> Self {
    Self::Metrics
  }

  /// Activities scoped to one entity, CRM access path.
  pub fn by_entity(entity_type: EntityType, id: impl Into<String>) -> Self {
    Self::EntityActivities {
      module: Module::Crm,
      entity: EntityRef::new(entity_type, id),
    }
  }

  /// The same entity's activities reached through `module`.
  pub fn entity_activities(module: Module, entity: &EntityRef) -> Self {
    Self::EntityActivities {
      module,
      entity: entity.clone(),
    }
  }

  /// Detail record of `entity` in `module`.
  pub fn record(module: Module, entity: &EntityRef) -> Self {
    Self::EntityRecord {
      module,
      entity: entity.clone(),
    }
  }

  /// Detail record of `entity` in the module that owns it.
  pub fn home_record(entity: &EntityRef) -> Self {
    Self::record(entity.entity_type.home_module(), entity)
  }

  /// List of `entity_type` in the module that owns it.
  pub fn list(entity_type: EntityType) -> Self {
    Self::EntityList {
      module: entity_type.home_module(),
      entity_type,
    }
  }

  /// Namespace the key belongs to.
  pub fn module(&self) -> Module {
    match self {
      Self::Activities | Self::Metrics => Module::Crm,
      Self::EntityActivities { module, .. }
      | Self::EntityRecord { module, .. }
      | Self::EntityList { module, .. } => *module,
    }
  }

  /// Whether this is an entity-scoped activity view in any module.
  pub fn is_entity_activities(&self) -> bool {
    matches!(self, Self::EntityActivities { .. })
  }

  /// Human-readable description for logs.
  pub fn description(&self) -> String {
    match self {
      Self::Activities => "all activities".to_string(),
      Self::Metrics => "activity metrics".to_string(),
      Self::EntityActivities { module, entity } => {
        format!("{} activities of {} {}", module, entity.entity_type, entity.id)
      }
      Self::EntityRecord { module, entity } => {
        format!("{} record of {} {}", module, entity.entity_type, entity.id)
      }
      Self::EntityList {
        module,
        entity_type,
      } => format!("{} {} list", module, entity_type),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Activities => write!(f, "crm/activities"),
      Self::Metrics => write!(f, "crm/activities/metrics"),
      Self::EntityActivities { module, entity } => {
        write!(f, "{}/{}/{}/activities", module, entity.entity_type, entity.id)
      }
      Self::EntityRecord { module, entity } => {
        write!(f, "{}/{}/{}", module, entity.entity_type, entity.id)
      }
      Self::EntityList {
        module,
        entity_type,
      } => write!(f, "{}/{}s", module, entity_type),
    }
  }
}

//! Which entities an activity is "about".
//!
//! An activity can point at an entity two ways: the generic
//! `relatedToType`/`relatedToId` pair, or one of the direct id fields
//! (`dealId`, `accountId`, ...). Both count. The same rule decides what gets
//! invalidated after a write and what a per-entity view displays, so the two
//! can never disagree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::types::{Activity, EntityRef, EntityType};

/// Relationship fields shared by records, create payloads and patches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relations {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub related_to_type: Option<EntityType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub related_to_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deal_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub account_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lead_id: Option<String>,
}

/// Why a relation block was refused at the write boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelationError {
  #[error("activity is not related to any deal, account, contact or lead")]
  Missing,
  #[error("relatedToType and relatedToId must be set together")]
  IncompletePair,
  #[error("relatedTo {entity_type} {related_id} conflicts with {entity_type}Id {direct_id}")]
  Conflict {
    entity_type: EntityType,
    related_id: String,
    direct_id: String,
  },
}

impl Relations {
  /// Relate to a single entity through the generic pair.
  pub fn related_to(entity: &EntityRef) -> Self {
    Self {
      related_to_type: Some(entity.entity_type),
      related_to_id: Some(entity.id.clone()),
      ..Self::default()
    }
  }

  pub fn with_deal(mut self, id: impl Into<String>) -> Self {
    self.deal_id = Some(id.into());
    self
  }

  pub fn with_account(mut self, id: impl Into<String>) -> Self {
    self.account_id = Some(id.into());
    self
  }

  pub fn with_contact(mut self, id: impl Into<String>) -> Self {
    self.contact_id = Some(id.into());
    self
  }

  pub fn with_lead(mut self, id: impl Into<String>) -> Self {
    self.lead_id = Some(id.into());
    self
  }

  /// The direct id field for `entity_type`.
  pub fn direct(&self, entity_type: EntityType) -> Option<&str> {
    let field = match entity_type {
      EntityType::Deal => &self.deal_id,
      EntityType::Account => &self.account_id,
      EntityType::Contact => &self.contact_id,
      EntityType::Lead => &self.lead_id,
    };
    non_empty(field)
  }

  fn direct_mut(&mut self, entity_type: EntityType) -> &mut Option<String> {
    match entity_type {
      EntityType::Deal => &mut self.deal_id,
      EntityType::Account => &mut self.account_id,
      EntityType::Contact => &mut self.contact_id,
      EntityType::Lead => &mut self.lead_id,
    }
  }

  /// The generic pair, if both halves are set.
  pub fn generic(&self) -> Option<EntityRef> {
    match (self.related_to_type, non_empty(&self.related_to_id)) {
      (Some(entity_type), Some(id)) => Some(EntityRef::new(entity_type, id)),
      _ => None,
    }
  }

  /// Every entity these fields point at, deduplicated.
  ///
  /// Never fails; absent or empty fields are skipped.
  pub fn resolve(&self) -> BTreeSet<EntityRef> {
    let mut entities: BTreeSet<EntityRef> = EntityType::ALL
      .into_iter()
      .filter_map(|entity_type| {
        self
          .direct(entity_type)
          .map(|id| EntityRef::new(entity_type, id))
      })
      .collect();

    if let Some(generic) = self.generic() {
      entities.insert(generic);
    }

    entities
  }

  /// Whether these fields point at `entity`.
  pub fn refers_to(&self, entity: &EntityRef) -> bool {
    self.direct(entity.entity_type) == Some(entity.id.as_str())
      || self.generic().as_ref() == Some(entity)
  }

  /// Check the block before it is written and fill in the direct field that
  /// corresponds to the generic pair.
  pub fn normalize(mut self) -> Result<Self, RelationError> {
    let has_type = self.related_to_type.is_some();
    let has_id = non_empty(&self.related_to_id).is_some();
    if has_type != has_id {
      return Err(RelationError::IncompletePair);
    }

    if let Some(generic) = self.generic() {
      match self.direct(generic.entity_type).map(str::to_string) {
        Some(direct_id) if direct_id != generic.id => {
          return Err(RelationError::Conflict {
            entity_type: generic.entity_type,
            related_id: generic.id,
            direct_id,
          });
        }
        Some(_) => {}
        None => *self.direct_mut(generic.entity_type) = Some(generic.id),
      }
    }

    if self.resolve().is_empty() {
      return Err(RelationError::Missing);
    }

    Ok(self)
  }
}

/// Every entity `activity` is about.
pub fn resolve_relations(activity: &Activity) -> BTreeSet<EntityRef> {
  activity.relations.resolve()
}

fn non_empty(field: &Option<String>) -> Option<&str> {
  field.as_deref().filter(|id| !id.is_empty())
}

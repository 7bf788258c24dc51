//! Activity records as they travel between the remote store and the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::relations::Relations;

// ============================================================================
// Classification
// ============================================================================

/// Kind of logged interaction.
///
/// Unknown kinds coming from the store are kept verbatim in `Other` so that a
/// newer server never breaks an older client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
  Call,
  Meeting,
  #[default]
  Task,
  Note,
  Email,
  Other(String),
}

impl ActivityType {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Call => "call",
      Self::Meeting => "meeting",
      Self::Task => "task",
      Self::Note => "note",
      Self::Email => "email",
      Self::Other(kind) => kind,
    }
  }
}

impl From<String> for ActivityType {
  fn from(value: String) -> Self {
    match value.as_str() {
      "call" => Self::Call,
      "meeting" => Self::Meeting,
      "task" => Self::Task,
      "note" => Self::Note,
      "email" => Self::Email,
      _ => Self::Other(value),
    }
  }
}

impl From<ActivityType> for String {
  fn from(value: ActivityType) -> Self {
    match value {
      ActivityType::Other(kind) => kind,
      known => known.as_str().to_string(),
    }
  }
}

impl fmt::Display for ActivityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Lifecycle state of an activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
  /// Not started yet. Older records use "open".
  #[default]
  #[serde(alias = "open")]
  Planned,
  InProgress,
  Completed,
  Cancelled,
}

impl ActivityStatus {
  /// Whether the activity still needs doing.
  pub fn is_open(self) -> bool {
    matches!(self, Self::Planned | Self::InProgress)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  Medium,
  High,
  Urgent,
}

// ============================================================================
// Modules and entities
// ============================================================================

/// A product surface with its own cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
  /// Deals, accounts and contacts
  Crm,
  /// Lead Generation, which shows the same activities under its own views
  #[serde(rename = "leadgen")]
  LeadGen,
}

impl Module {
  pub const ALL: [Module; 2] = [Module::Crm, Module::LeadGen];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Crm => "crm",
      Self::LeadGen => "leadgen",
    }
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which surface wrote an activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
  #[default]
  Crm,
  #[serde(rename = "leadgen")]
  LeadGen,
  /// Written from a deal's own activity panel
  Deal,
}

impl Source {
  /// The module whose namespace the write originated in.
  pub fn module(self) -> Module {
    match self {
      Self::Crm | Self::Deal => Module::Crm,
      Self::LeadGen => Module::LeadGen,
    }
  }
}

/// Business entity an activity can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
  Deal,
  Account,
  Contact,
  Lead,
}

impl EntityType {
  pub const ALL: [EntityType; 4] = [
    EntityType::Deal,
    EntityType::Account,
    EntityType::Contact,
    EntityType::Lead,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Deal => "deal",
      Self::Account => "account",
      Self::Contact => "contact",
      Self::Lead => "lead",
    }
  }

  /// The module that owns the entity's detail record and list.
  pub fn home_module(self) -> Module {
    match self {
      Self::Lead => Module::LeadGen,
      Self::Deal | Self::Account | Self::Contact => Module::Crm,
    }
  }

  /// Whether `module` shows this entity's activities under its own keys.
  pub fn mirrored_in(self, module: Module) -> bool {
    match module {
      Module::Crm => true,
      Module::LeadGen => matches!(self, Self::Account | Self::Contact | Self::Lead),
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A concrete entity: type plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
  pub entity_type: EntityType,
  pub id: String,
}

impl EntityRef {
  pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
    Self {
      entity_type,
      id: id.into(),
    }
  }

  pub fn deal(id: impl Into<String>) -> Self {
    Self::new(EntityType::Deal, id)
  }

  pub fn account(id: impl Into<String>) -> Self {
    Self::new(EntityType::Account, id)
  }

  pub fn contact(id: impl Into<String>) -> Self {
    Self::new(EntityType::Contact, id)
  }

  pub fn lead(id: impl Into<String>) -> Self {
    Self::new(EntityType::Lead, id)
  }
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.entity_type, self.id)
  }
}

// ============================================================================
// Records
// ============================================================================

/// A logged interaction, as confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
  pub id: String,
  pub subject: String,
  #[serde(rename = "type")]
  pub activity_type: ActivityType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub status: ActivityStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(flatten)]
  pub relations: Relations,
  #[serde(default)]
  pub source: Source,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outcome: Option<String>,
}

impl Activity {
  /// Whether the activity is still open and its scheduled time has passed.
  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    self.status.is_open() && self.scheduled_at.is_some_and(|at| at < now)
  }

  /// Apply a patch in place. Fields absent from the patch are left untouched.
  pub fn apply(&mut self, patch: &ActivityPatch) {
    if let Some(subject) = &patch.subject {
      self.subject = subject.clone();
    }
    if let Some(activity_type) = &patch.activity_type {
      self.activity_type = activity_type.clone();
    }
    if let Some(description) = &patch.description {
      self.description = Some(description.clone());
    }
    if let Some(status) = patch.status {
      self.status = status;
    }
    if let Some(priority) = patch.priority {
      self.priority = Some(priority);
    }
    if let Some(relations) = &patch.relations {
      self.relations = relations.clone();
    }
    if let Some(scheduled_at) = patch.scheduled_at {
      self.scheduled_at = Some(scheduled_at);
    }
    if let Some(duration) = patch.duration_minutes {
      self.duration_minutes = Some(duration);
    }
    if let Some(outcome) = &patch.outcome {
      self.outcome = Some(outcome.clone());
    }
  }

  /// Mark completed at `at`.
  pub fn complete(&mut self, at: DateTime<Utc>) {
    self.status = ActivityStatus::Completed;
    self.completed_at = Some(at);
  }
}

/// Create payload. Server-assigned fields (id, createdAt) are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
  pub subject: String,
  #[serde(rename = "type")]
  pub activity_type: ActivityType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub status: ActivityStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(flatten)]
  pub relations: Relations,
  #[serde(default)]
  pub source: Source,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outcome: Option<String>,
}

impl NewActivity {
  pub fn new(subject: impl Into<String>, activity_type: ActivityType) -> Self {
    Self {
      subject: subject.into(),
      activity_type,
      ..Self::default()
    }
  }

  pub fn with_relations(mut self, relations: Relations) -> Self {
    self.relations = relations;
    self
  }

  pub fn with_source(mut self, source: Source) -> Self {
    self.source = source;
    self
  }

  /// Build the record shown in the cache while the create is in flight.
  pub fn to_optimistic(&self, id: String, now: DateTime<Utc>) -> Activity {
    Activity {
      id,
      subject: self.subject.clone(),
      activity_type: self.activity_type.clone(),
      description: self.description.clone(),
      status: self.status,
      priority: self.priority,
      relations: self.relations.clone(),
      source: self.source,
      created_at: now,
      scheduled_at: self.scheduled_at,
      completed_at: (self.status == ActivityStatus::Completed).then_some(now),
      duration_minutes: self.duration_minutes,
      outcome: self.outcome.clone(),
    }
  }
}

/// Update payload. A present `relations` replaces the whole relation block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub activity_type: Option<ActivityType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<ActivityStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(flatten)]
  pub relations: Option<Relations>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outcome: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_activity_type_keeps_unknown_kinds() {
    let kind: ActivityType = serde_json::from_str(r#""site_visit""#).unwrap();
    assert_eq!(kind, ActivityType::Other("site_visit".to_string()));
    assert_eq!(serde_json::to_string(&kind).unwrap(), r#""site_visit""#);

    let kind: ActivityType = serde_json::from_str(r#""meeting""#).unwrap();
    assert_eq!(kind, ActivityType::Meeting);
  }

  #[test]
  fn test_status_accepts_open_alias() {
    let status: ActivityStatus = serde_json::from_str(r#""open""#).unwrap();
    assert_eq!(status, ActivityStatus::Planned);
    assert!(status.is_open());
  }

  #[test]
  fn test_source_module() {
    assert_eq!(Source::Deal.module(), Module::Crm);
    assert_eq!(Source::LeadGen.module(), Module::LeadGen);
  }

  #[test]
  fn test_activity_parses_wire_shape() {
    let json = r#"{
      "id": "a1",
      "subject": "Intro call",
      "type": "call",
      "status": "in_progress",
      "relatedToType": "account",
      "relatedToId": "A1",
      "dealId": "D7",
      "source": "leadgen",
      "createdAt": "2024-03-01T10:00:00Z"
    }"#;

    let activity: Activity = serde_json::from_str(json).unwrap();
    assert_eq!(activity.activity_type, ActivityType::Call);
    assert_eq!(activity.status, ActivityStatus::InProgress);
    assert_eq!(activity.relations.related_to_type, Some(EntityType::Account));
    assert_eq!(activity.relations.deal_id.as_deref(), Some("D7"));
    assert_eq!(activity.source, Source::LeadGen);
  }

  #[test]
  fn test_apply_patch_leaves_absent_fields() {
    let mut activity = NewActivity::new("Call", ActivityType::Call)
      .to_optimistic("a1".to_string(), Utc::now());
    activity.description = Some("keep".to_string());

    activity.apply(&ActivityPatch {
      subject: Some("Renamed".to_string()),
      ..ActivityPatch::default()
    });

    assert_eq!(activity.subject, "Renamed");
    assert_eq!(activity.description.as_deref(), Some("keep"));
  }

  #[test]
  fn test_lead_generation_mirrors() {
    assert!(EntityType::Account.mirrored_in(Module::LeadGen));
    assert!(EntityType::Lead.mirrored_in(Module::LeadGen));
    assert!(!EntityType::Deal.mirrored_in(Module::LeadGen));
  }
}

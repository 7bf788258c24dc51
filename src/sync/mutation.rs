//! Create, update, complete and delete with optimistic cache edits.
//!
//! Every operation follows the same order: edit the cached list
//! synchronously, await the store, then either confirm and propagate or roll
//! back and propagate over the relations the optimistic edit touched. Views
//! read during the round trip see the optimistic state, so a failure has to
//! mark them stale as well as the list. The cache lock is never held across
//! the await.
//!
//! Overlapping mutations of the same id are not serialized. Whichever
//! response is applied last decides the cached record until the next refetch.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::propagate;
use crate::activity::{resolve_relations, Activity, ActivityPatch, EntityRef, NewActivity};
use crate::cache::{ActivityCache, CacheKey, Invalidation};
use crate::error::{SyncError, SyncResult};
use crate::remote::ActivityStore;

/// Replace the record with `id` in place. Returns whether it was there.
fn replace(list: &mut [Activity], id: &str, activity: Activity) -> bool {
  match list.iter_mut().find(|a| a.id == id) {
    Some(slot) => {
      *slot = activity;
      true
    }
    None => false,
  }
}

/// Write operations against the store, paired with their cache edits.
pub struct MutationPipeline<S: ActivityStore> {
  store: Arc<S>,
  cache: Arc<ActivityCache>,
}

impl<S: ActivityStore> MutationPipeline<S> {
  pub fn new(store: Arc<S>, cache: Arc<ActivityCache>) -> Self {
    Self { store, cache }
  }

  fn mark_list_stale(&self) {
    self.cache.invalidate([&Invalidation::Key(CacheKey::all())]);
  }

  /// After a failed write, mark stale the list and every view that may have
  /// been derived from the optimistic edit while the request was in flight.
  fn invalidate_after_failure(&self, relations: &BTreeSet<EntityRef>) {
    if relations.is_empty() {
      self.mark_list_stale();
    } else {
      propagate::propagate_relations(&self.cache, relations);
    }
  }

  /// Propagate over `relations`, or everything when the record was unknown.
  fn propagate_known(&self, id: &str, relations: Option<BTreeSet<EntityRef>>) {
    match relations {
      Some(relations) => {
        propagate::propagate_relations(&self.cache, &relations);
      }
      None => {
        warn!(id, "activity not in local cache, invalidating every activity view");
        propagate::propagate(&self.cache, None);
      }
    }
  }

  /// Create an activity.
  ///
  /// The record shows up at the top of the cached list right away under a
  /// temporary id, and is swapped for the store's record on success.
  pub async fn create(&self, activity: NewActivity) -> SyncResult<Activity> {
    let mut payload = activity;
    payload.relations = payload.relations.normalize()?;

    let temp_id = self.cache.next_optimistic_id();
    let optimistic = payload.to_optimistic(temp_id.clone(), Utc::now());
    if self
      .cache
      .edit_activities(|list| list.insert(0, optimistic))
      .is_none()
    {
      debug!(temp_id = %temp_id, "no activity list cached, skipping optimistic insert");
    }

    match self.store.create(&payload).await {
      Ok(created) => {
        self.cache.edit_activities(|list| {
          // A refresh that landed meanwhile may already hold the new record
          list.retain(|a| a.id != created.id);
          if let Some(slot) = list.iter_mut().find(|a| a.id == temp_id) {
            *slot = created.clone();
          } else {
            list.insert(0, created.clone());
          }
        });
        propagate::propagate_relations(&self.cache, &resolve_relations(&created));
        info!(id = %created.id, source = ?created.source, "activity created");
        Ok(created)
      }
      Err(err) => {
        self
          .cache
          .edit_activities(|list| list.retain(|a| a.id != temp_id));
        self.invalidate_after_failure(&payload.relations.resolve());
        warn!(temp_id = %temp_id, error = %err, "create failed, optimistic record discarded");
        Err(SyncError::remote("create activity", err))
      }
    }
  }

  /// Update an activity.
  ///
  /// Invalidation covers the relations before and after the update, since
  /// the patch may move the activity to another entity.
  pub async fn update(&self, id: &str, patch: ActivityPatch) -> SyncResult<Activity> {
    let mut patch = patch;
    if let Some(relations) = patch.relations.take() {
      patch.relations = Some(relations.normalize()?);
    }

    let snapshot = self
      .cache
      .edit_activities(|list| {
        list.iter_mut().find(|a| a.id == id).map(|activity| {
          let previous = activity.clone();
          activity.apply(&patch);
          (previous, activity.clone())
        })
      })
      .flatten();

    match self.store.update(id, &patch).await {
      Ok(updated) => {
        self
          .cache
          .edit_activities(|list| replace(list, id, updated.clone()));

        let mut relations = resolve_relations(&updated);
        if let Some((previous, _)) = &snapshot {
          relations.extend(resolve_relations(previous));
        }
        propagate::propagate_relations(&self.cache, &relations);
        info!(id, "activity updated");
        Ok(updated)
      }
      Err(err) => {
        let mut touched = BTreeSet::new();
        if let Some((previous, optimistic)) = &snapshot {
          touched.extend(resolve_relations(previous));
          touched.extend(resolve_relations(optimistic));
        }
        self.roll_back(id, snapshot);
        self.invalidate_after_failure(&touched);
        warn!(id, error = %err, "update failed, activity list marked stale");
        Err(SyncError::remote("update activity", err))
      }
    }
  }

  /// Mark an activity completed.
  ///
  /// The id carries no relation data, so invalidation relies on the cached
  /// record. An id missing from the cache invalidates every activity view.
  pub async fn complete(&self, id: &str) -> SyncResult<Activity> {
    let snapshot = self
      .cache
      .edit_activities(|list| {
        list.iter_mut().find(|a| a.id == id).map(|activity| {
          let previous = activity.clone();
          activity.complete(Utc::now());
          (previous, activity.clone())
        })
      })
      .flatten();
    let relations = snapshot
      .as_ref()
      .map(|(previous, _)| resolve_relations(previous));

    match self.store.complete(id).await {
      Ok(completed) => {
        self
          .cache
          .edit_activities(|list| replace(list, id, completed.clone()));
        self.propagate_known(id, relations);
        info!(id, "activity completed");
        Ok(completed)
      }
      Err(err) => {
        self.roll_back(id, snapshot);
        self.invalidate_after_failure(&relations.unwrap_or_default());
        warn!(id, error = %err, "complete failed, activity list marked stale");
        Err(SyncError::remote("complete activity", err))
      }
    }
  }

  /// Delete an activity.
  ///
  /// On failure the record is not put back; the list is marked stale and the
  /// next read refetches it.
  pub async fn delete(&self, id: &str) -> SyncResult<()> {
    let removed = self
      .cache
      .edit_activities(|list| {
        let position = list.iter().position(|a| a.id == id)?;
        Some(list.remove(position))
      })
      .flatten();
    let relations = removed.as_ref().map(resolve_relations);

    match self.store.delete(id).await {
      Ok(()) => {
        self.propagate_known(id, relations);
        info!(id, "activity deleted");
        Ok(())
      }
      Err(err) => {
        self.invalidate_after_failure(&relations.unwrap_or_default());
        warn!(id, error = %err, "delete failed, activity list marked stale");
        Err(SyncError::remote("delete activity", err))
      }
    }
  }

  /// Put the pre-mutation record back, unless another write replaced our
  /// optimistic version in the meantime.
  fn roll_back(&self, id: &str, snapshot: Option<(Activity, Activity)>) {
    let Some((previous, optimistic)) = snapshot else {
      return;
    };
    self.cache.edit_activities(|list| {
      if let Some(slot) = list.iter_mut().find(|a| a.id == id && **a == optimistic) {
        *slot = previous;
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::activity::{ActivityStatus, ActivityType, EntityType, Module, Relations, Source};
  use crate::cache::CachedValue;
  use crate::remote::memory::{MemoryActivityStore, Op};

  fn new_call(relations: Relations) -> NewActivity {
    NewActivity::new("Intro call", ActivityType::Call).with_relations(relations)
  }

  fn seeded(activities: Vec<Activity>) -> (Arc<MemoryActivityStore>, Arc<ActivityCache>) {
    let store = Arc::new(MemoryActivityStore::with_activities(activities.clone()));
    let cache = Arc::new(ActivityCache::new());
    cache.put(CacheKey::all(), CachedValue::Activities(activities));
    (store, cache)
  }

  /// Let spawned tasks run up to their first pending await.
  async fn settle() {
    for _ in 0..3 {
      tokio::task::yield_now().await;
    }
  }

  fn existing(id: &str, relations: Relations) -> Activity {
    new_call(relations).to_optimistic(id.to_string(), Utc::now())
  }

  #[tokio::test]
  async fn test_create_replaces_optimistic_record() {
    let (store, cache) = seeded(Vec::new());
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    let created = pipeline
      .create(new_call(Relations::default().with_deal("D1")))
      .await
      .unwrap();

    let list = cache.activities().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, created.id);
    assert!(!list[0].id.starts_with("optimistic-"));
    assert!(cache.is_stale(&CacheKey::all()));
  }

  #[tokio::test]
  async fn test_create_shows_optimistic_record_while_in_flight() {
    let (store, cache) = seeded(Vec::new());
    let release = store.gate(Op::Create);
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    let task = tokio::spawn(async move {
      pipeline
        .create(new_call(Relations::default().with_deal("D1")))
        .await
    });
    settle().await;

    let list = cache.activities().unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0].id.starts_with("optimistic-"));

    release.send(()).unwrap();
    let created = task.await.unwrap().unwrap();
    assert_eq!(cache.activities().unwrap()[0].id, created.id);
  }

  #[tokio::test]
  async fn test_create_failure_rolls_back() {
    let (store, cache) = seeded(Vec::new());
    store.fail_next(Op::Create, 1);
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    let result = pipeline
      .create(new_call(Relations::default().with_account("A1")))
      .await;

    assert!(matches!(result, Err(SyncError::Remote { .. })));
    assert!(cache.activities().unwrap().is_empty());
    assert!(cache.is_stale(&CacheKey::all()));
    assert_eq!(store.calls(Op::Create), 1);
  }

  #[tokio::test]
  async fn test_create_rejects_conflicting_relations_before_writing() {
    let (store, cache) = seeded(Vec::new());
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    let relations = Relations::related_to(&EntityRef::deal("D1")).with_deal("D2");
    let result = pipeline.create(new_call(relations)).await;

    assert!(matches!(result, Err(SyncError::InvalidRelations(_))));
    assert_eq!(store.calls(Op::Create), 0);
    assert!(cache.activities().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_update_invalidates_old_and_new_relations() {
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_deal("D1"))]);
    let old_feed = CacheKey::by_entity(EntityType::Deal, "D1");
    let new_feed = CacheKey::by_entity(EntityType::Deal, "D2");
    cache.put(old_feed.clone(), CachedValue::Activities(Vec::new()));
    cache.put(new_feed.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store, cache.clone());

    let patch = ActivityPatch {
      relations: Some(Relations::default().with_deal("D2")),
      ..ActivityPatch::default()
    };
    let updated = pipeline.update("a1", patch).await.unwrap();

    assert_eq!(updated.relations.deal_id.as_deref(), Some("D2"));
    assert!(cache.is_stale(&old_feed));
    assert!(cache.is_stale(&new_feed));
  }

  #[tokio::test]
  async fn test_update_failure_restores_snapshot() {
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_deal("D1"))]);
    store.fail_next(Op::Update, 1);
    let pipeline = MutationPipeline::new(store, cache.clone());

    let patch = ActivityPatch {
      subject: Some("Changed".to_string()),
      ..ActivityPatch::default()
    };
    assert!(pipeline.update("a1", patch).await.is_err());

    assert_eq!(cache.find_activity("a1").unwrap().subject, "Intro call");
    assert!(cache.is_stale(&CacheKey::all()));
  }

  #[tokio::test]
  async fn test_complete_uses_cached_relations() {
    let account = Relations::default().with_account("A1");
    let (store, cache) = seeded(vec![existing("a1", account)]);
    let alias = CacheKey::entity_activities(Module::LeadGen, &EntityRef::account("A1"));
    let other = CacheKey::by_entity(EntityType::Account, "A2");
    cache.put(alias.clone(), CachedValue::Activities(Vec::new()));
    cache.put(other.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store, cache.clone());

    let completed = pipeline.complete("a1").await.unwrap();

    assert_eq!(completed.status, ActivityStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(
      cache.find_activity("a1").unwrap().status,
      ActivityStatus::Completed
    );
    assert!(cache.is_stale(&alias));
    assert!(cache.is_fresh(&other));
  }

  #[tokio::test]
  async fn test_complete_unknown_id_falls_back_to_full_invalidation() {
    let known = existing("X", Relations::default().with_deal("D1"));
    let store = Arc::new(MemoryActivityStore::with_activities(vec![known]));
    let cache = Arc::new(ActivityCache::new());
    cache.put(CacheKey::all(), CachedValue::Activities(Vec::new()));
    cache.put(
      CacheKey::metrics(),
      CachedValue::Metrics(crate::activity::ActivityMetrics::default()),
    );
    let feed = CacheKey::by_entity(EntityType::Contact, "C9");
    cache.put(feed.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store, cache.clone());

    pipeline.complete("X").await.unwrap();

    assert!(cache.is_stale(&CacheKey::all()));
    assert!(cache.is_stale(&CacheKey::metrics()));
    assert!(cache.is_stale(&feed));
  }

  #[tokio::test]
  async fn test_create_failure_invalidates_derived_views() {
    let (store, cache) = seeded(Vec::new());
    store.fail_next(Op::Create, 1);
    let lead = EntityRef::lead("L1");
    let feed = CacheKey::by_entity(EntityType::Lead, "L1");
    let alias = CacheKey::entity_activities(Module::LeadGen, &lead);
    let unrelated = CacheKey::by_entity(EntityType::Deal, "D9");
    cache.put(feed.clone(), CachedValue::Activities(Vec::new()));
    cache.put(alias.clone(), CachedValue::Activities(Vec::new()));
    cache.put(unrelated.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store, cache.clone());

    let result = pipeline
      .create(new_call(Relations::related_to(&lead)))
      .await;

    assert!(result.is_err());
    assert!(cache.is_stale(&feed));
    assert!(cache.is_stale(&alias));
    assert!(cache.is_fresh(&unrelated));
  }

  #[tokio::test]
  async fn test_complete_failure_invalidates_cached_relations() {
    let account = EntityRef::account("A1");
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_account("A1"))]);
    store.fail_next(Op::Complete, 1);
    let alias = CacheKey::entity_activities(Module::LeadGen, &account);
    cache.put(alias.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store, cache.clone());

    assert!(pipeline.complete("a1").await.is_err());

    assert_eq!(
      cache.find_activity("a1").unwrap().status,
      ActivityStatus::Planned
    );
    assert!(cache.is_stale(&alias));
  }

  #[tokio::test]
  async fn test_complete_failure_on_unknown_id_does_not_panic() {
    let (store, cache) = seeded(Vec::new());
    let pipeline = MutationPipeline::new(store, cache.clone());

    let result = pipeline.complete("missing").await;
    assert!(matches!(result, Err(SyncError::Remote { .. })));
    assert!(cache.is_stale(&CacheKey::all()));
  }

  #[tokio::test]
  async fn test_delete_removes_and_propagates() {
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_contact("C1"))]);
    let feed = CacheKey::by_entity(EntityType::Contact, "C1");
    cache.put(feed.clone(), CachedValue::Activities(Vec::new()));
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    pipeline.delete("a1").await.unwrap();

    assert!(cache.find_activity("a1").is_none());
    assert!(store.activities().is_empty());
    assert!(cache.is_stale(&feed));
  }

  #[tokio::test]
  async fn test_delete_failure_does_not_reinsert() {
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_contact("C1"))]);
    store.fail_next(Op::Delete, 1);
    let pipeline = MutationPipeline::new(store.clone(), cache.clone());

    assert!(pipeline.delete("a1").await.is_err());

    assert!(cache.find_activity("a1").is_none());
    assert!(cache.is_stale(&CacheKey::all()));
    assert_eq!(store.activities().len(), 1);
  }

  #[tokio::test]
  async fn test_interleaved_updates_last_applied_wins() {
    let (store, cache) = seeded(vec![existing("a1", Relations::default().with_deal("D1"))]);
    let first_gate = store.gate(Op::Update);
    let second_gate = store.gate(Op::Update);
    let pipeline = Arc::new(MutationPipeline::new(store.clone(), cache.clone()));

    let patch = |subject: &str| ActivityPatch {
      subject: Some(subject.to_string()),
      ..ActivityPatch::default()
    };

    let first = {
      let pipeline = pipeline.clone();
      let patch = patch("first");
      tokio::spawn(async move { pipeline.update("a1", patch).await })
    };
    settle().await;
    let second = {
      let pipeline = pipeline.clone();
      let patch = patch("second");
      tokio::spawn(async move { pipeline.update("a1", patch).await })
    };
    settle().await;

    // The second response arrives first, the first response last
    second_gate.send(()).unwrap();
    second.await.unwrap().unwrap();
    first_gate.send(()).unwrap();
    first.await.unwrap().unwrap();

    // The cache shows what was applied last, even though the store holds the
    // second write. The list is stale, so the next read corrects it.
    assert_eq!(cache.find_activity("a1").unwrap().subject, "first");
    assert_eq!(store.activities()[0].subject, "second");
    assert!(cache.is_stale(&CacheKey::all()));
  }

  #[tokio::test]
  async fn test_source_is_sent_to_store() {
    let (store, cache) = seeded(Vec::new());
    let pipeline = MutationPipeline::new(store.clone(), cache);

    let created = pipeline
      .create(new_call(Relations::default().with_lead("L1")).with_source(Source::LeadGen))
      .await
      .unwrap();

    assert_eq!(created.source, Source::LeadGen);
    assert_eq!(store.activities()[0].source, Source::LeadGen);
  }
}

//! Invalidation propagation across the relationship graph.
//!
//! A change to one activity makes every view that could display it suspect:
//! the full list, the metrics, the per-entity feeds of everything it relates
//! to, those entities' own records, the same feeds as mirrored by other
//! modules, and the list views that show per-entity counts.

use std::collections::BTreeSet;
use tracing::debug;

use crate::activity::{EntityRef, EntityType, Module};
use crate::cache::{ActivityCache, CacheKey, Invalidation};

/// Keys every change invalidates, whatever it relates to.
fn baseline() -> BTreeSet<Invalidation> {
  let mut targets = BTreeSet::from([
    Invalidation::Key(CacheKey::all()),
    Invalidation::Key(CacheKey::metrics()),
  ]);
  targets.extend(
    EntityType::ALL
      .into_iter()
      .map(|entity_type| Invalidation::Key(CacheKey::list(entity_type))),
  );
  targets
}

/// Keys to invalidate for a change scoped to `entity`, or to no entity.
///
/// Pure and set-valued, so applying a plan twice or in any order ends in the
/// same stale-set.
pub fn plan(scope: Option<&EntityRef>) -> BTreeSet<Invalidation> {
  let mut targets = baseline();

  let Some(entity) = scope else {
    targets.insert(Invalidation::EntityActivityViews);
    return targets;
  };

  targets.insert(Invalidation::Key(CacheKey::by_entity(
    entity.entity_type,
    entity.id.clone(),
  )));
  targets.insert(Invalidation::Key(CacheKey::home_record(entity)));

  for module in Module::ALL {
    if module == Module::Crm || !entity.entity_type.mirrored_in(module) {
      continue;
    }
    targets.insert(Invalidation::Key(CacheKey::entity_activities(module, entity)));
    targets.insert(Invalidation::Key(CacheKey::record(module, entity)));
  }

  targets
}

/// Union of the plans for every entity in `relations`; the unscoped plan when
/// there are none.
pub fn plan_relations<'a>(
  relations: impl IntoIterator<Item = &'a EntityRef>,
) -> BTreeSet<Invalidation> {
  let mut targets = BTreeSet::new();
  for entity in relations {
    targets.extend(plan(Some(entity)));
  }
  if targets.is_empty() {
    targets = plan(None);
  }
  targets
}

/// Invalidate everything a change scoped to `scope` affects.
pub fn propagate(cache: &ActivityCache, scope: Option<&EntityRef>) -> usize {
  apply(cache, &plan(scope))
}

/// Invalidate everything a change to an activity with these relations affects.
pub fn propagate_relations<'a>(
  cache: &ActivityCache,
  relations: impl IntoIterator<Item = &'a EntityRef>,
) -> usize {
  apply(cache, &plan_relations(relations))
}

/// Invalidate a whole module namespace.
pub fn invalidate_module(cache: &ActivityCache, module: Module) -> usize {
  apply(cache, &BTreeSet::from([Invalidation::Namespace(module)]))
}

fn apply(cache: &ActivityCache, targets: &BTreeSet<Invalidation>) -> usize {
  let marked = cache.invalidate(targets);
  debug!(targets = targets.len(), marked, "propagated invalidation");
  marked
}

//! In-memory cache storage with explicit staleness.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use super::keys::CacheKey;
use crate::activity::{Activity, ActivityMetrics, Module};

/// Value held under a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
  Activities(Vec<Activity>),
  Metrics(ActivityMetrics),
  /// Consumer-owned payload (entity detail, list page) the cache only tracks
  Record(serde_json::Value),
}

impl CachedValue {
  pub fn into_activities(self) -> Option<Vec<Activity>> {
    match self {
      Self::Activities(list) => Some(list),
      _ => None,
    }
  }

  pub fn into_metrics(self) -> Option<ActivityMetrics> {
    match self {
      Self::Metrics(metrics) => Some(metrics),
      _ => None,
    }
  }
}

/// Whether an entry can be read without refetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Fresh,
  Stale,
}

/// A single cached entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: CachedValue,
  pub freshness: Freshness,
  /// When the value was last stored
  pub cached_at: DateTime<Utc>,
}

/// A set of keys to mark stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Invalidation {
  /// Exactly this key
  Key(CacheKey),
  /// Every entity-scoped activity view, in every module
  EntityActivityViews,
  /// Every key in a module's namespace
  Namespace(Module),
}

impl Invalidation {
  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::Key(target) => target == key,
      Self::EntityActivityViews => key.is_entity_activities(),
      Self::Namespace(module) => key.module() == *module,
    }
  }
}

/// Snapshot published to subscribers whenever the activity list or the
/// metrics entry changes.
#[derive(Debug, Clone, Default)]
pub struct ActivityView {
  pub revision: u64,
  pub activities: Arc<Vec<Activity>>,
  pub metrics: Option<ActivityMetrics>,
  pub activities_stale: bool,
  pub metrics_stale: bool,
}

/// Handle for a fetch that is in flight.
///
/// Invalidations that hit the key while the fetch runs make its result land
/// stale instead of fresh.
#[derive(Debug)]
pub struct FetchTicket {
  id: u64,
  key: CacheKey,
}

impl FetchTicket {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }
}

#[derive(Default)]
struct CacheState {
  entries: HashMap<CacheKey, CacheEntry>,
  /// In-flight fetches: ticket id -> (key, invalidated while in flight)
  fetches: HashMap<u64, (CacheKey, bool)>,
  next_ticket: u64,
  revision: u64,
}

impl CacheState {
  fn view(&self, max_age: Duration) -> ActivityView {
    let now = Utc::now();
    let activities = self.entries.get(&CacheKey::Activities);
    let metrics = self.entries.get(&CacheKey::Metrics);

    ActivityView {
      revision: self.revision,
      activities: Arc::new(match activities.map(|e| &e.value) {
        Some(CachedValue::Activities(list)) => list.clone(),
        _ => Vec::new(),
      }),
      metrics: match metrics.map(|e| &e.value) {
        Some(CachedValue::Metrics(m)) => Some(m.clone()),
        _ => None,
      },
      activities_stale: activities.map_or(true, |e| !is_fresh(e, max_age, now)),
      metrics_stale: metrics.map_or(true, |e| !is_fresh(e, max_age, now)),
    }
  }
}

fn is_fresh(entry: &CacheEntry, max_age: Duration, now: DateTime<Utc>) -> bool {
  entry.freshness == Freshness::Fresh && now - entry.cached_at <= max_age
}

fn is_published(key: &CacheKey) -> bool {
  matches!(key, CacheKey::Activities | CacheKey::Metrics)
}

/// Session cache for activities and everything derived from them.
///
/// Construct one per session and share it by `Arc`; `reset` clears it on
/// logout. The state lock is only taken for synchronous sections and never
/// held across an await.
pub struct ActivityCache {
  state: Mutex<CacheState>,
  /// Entries older than this read as stale even without an invalidation
  max_age: Duration,
  view: watch::Sender<ActivityView>,
  optimistic_seq: AtomicU64,
}

impl ActivityCache {
  pub fn new() -> Self {
    let (view, _) = watch::channel(ActivityView::default());
    Self {
      state: Mutex::new(CacheState::default()),
      max_age: Duration::minutes(5),
      view,
      optimistic_seq: AtomicU64::new(0),
    }
  }

  /// Set how long a stored entry stays fresh.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn publish(&self, state: &mut CacheState) {
    state.revision += 1;
    self.view.send_replace(state.view(self.max_age));
  }

  /// Receive a new view every time the activity list or metrics change.
  pub fn subscribe(&self) -> watch::Receiver<ActivityView> {
    self.view.subscribe()
  }

  /// Drop every entry. In-flight fetches finish into the empty cache as stale.
  pub fn reset(&self) {
    let mut state = self.lock();
    state.entries.clear();
    for (_, invalidated) in state.fetches.values_mut() {
      *invalidated = true;
    }
    debug!("activity cache reset");
    self.publish(&mut state);
  }

  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.lock().entries.get(key).cloned()
  }

  /// Whether `key` can be served without a refetch.
  pub fn is_fresh(&self, key: &CacheKey) -> bool {
    self
      .lock()
      .entries
      .get(key)
      .is_some_and(|entry| is_fresh(entry, self.max_age, Utc::now()))
  }

  /// Whether `key` holds a value that must be refetched before it is trusted.
  ///
  /// Absent keys are not stale; they have nothing to trust in the first place.
  pub fn is_stale(&self, key: &CacheKey) -> bool {
    self
      .lock()
      .entries
      .get(key)
      .is_some_and(|entry| !is_fresh(entry, self.max_age, Utc::now()))
  }

  /// Every stored key currently marked stale.
  pub fn stale_keys(&self) -> BTreeSet<CacheKey> {
    self
      .lock()
      .entries
      .iter()
      .filter(|(_, entry)| entry.freshness == Freshness::Stale)
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// Store a fresh value.
  pub fn put(&self, key: CacheKey, value: CachedValue) {
    let mut state = self.lock();
    let published = is_published(&key);
    state.entries.insert(
      key,
      CacheEntry {
        value,
        freshness: Freshness::Fresh,
        cached_at: Utc::now(),
      },
    );
    if published {
      self.publish(&mut state);
    }
  }

  /// Mark every stored key matched by `targets` stale.
  ///
  /// Returns how many entries went from fresh to stale. Marking an already
  /// stale entry does nothing, so repeated calls converge on the same set.
  pub fn invalidate<'a>(&self, targets: impl IntoIterator<Item = &'a Invalidation>) -> usize {
    let targets: Vec<&Invalidation> = targets.into_iter().collect();
    let mut state = self.lock();
    let mut marked = 0;
    let mut touched_view = false;

    for (key, entry) in state.entries.iter_mut() {
      if entry.freshness == Freshness::Fresh && targets.iter().any(|t| t.matches(key)) {
        entry.freshness = Freshness::Stale;
        marked += 1;
        touched_view |= is_published(key);
      }
    }

    for (key, invalidated) in state.fetches.values_mut() {
      if targets.iter().any(|t| t.matches(key)) {
        *invalidated = true;
      }
    }

    if touched_view {
      self.publish(&mut state);
    }
    marked
  }

  /// Register a fetch for `key`.
  pub fn begin_fetch(&self, key: CacheKey) -> FetchTicket {
    let mut state = self.lock();
    state.next_ticket += 1;
    let id = state.next_ticket;
    state.fetches.insert(id, (key.clone(), false));
    FetchTicket { id, key }
  }

  /// Store the result of a fetch. The entry lands stale if the key was
  /// invalidated while the fetch was in flight.
  pub fn finish_fetch(&self, ticket: FetchTicket, value: CachedValue) -> Freshness {
    let mut state = self.lock();
    let invalidated = state
      .fetches
      .remove(&ticket.id)
      .map_or(false, |(_, invalidated)| invalidated);
    let freshness = if invalidated {
      Freshness::Stale
    } else {
      Freshness::Fresh
    };

    let published = is_published(&ticket.key);
    state.entries.insert(
      ticket.key,
      CacheEntry {
        value,
        freshness,
        cached_at: Utc::now(),
      },
    );
    if published {
      self.publish(&mut state);
    }
    freshness
  }

  /// Forget a fetch that failed. The stored entry, if any, is left as is.
  pub fn abandon_fetch(&self, ticket: FetchTicket) {
    self.lock().fetches.remove(&ticket.id);
  }

  // ==========================================================================
  // Activity list helpers
  // ==========================================================================

  /// The cached activity list, fresh or not.
  pub fn activities(&self) -> Option<Vec<Activity>> {
    match self.lock().entries.get(&CacheKey::Activities).map(|e| &e.value) {
      Some(CachedValue::Activities(list)) => Some(list.clone()),
      _ => None,
    }
  }

  /// The cached metrics, fresh or not.
  pub fn metrics(&self) -> Option<ActivityMetrics> {
    match self.lock().entries.get(&CacheKey::Metrics).map(|e| &e.value) {
      Some(CachedValue::Metrics(metrics)) => Some(metrics.clone()),
      _ => None,
    }
  }

  /// Look up one activity in the cached list.
  pub fn find_activity(&self, id: &str) -> Option<Activity> {
    match self.lock().entries.get(&CacheKey::Activities).map(|e| &e.value) {
      Some(CachedValue::Activities(list)) => list.iter().find(|a| a.id == id).cloned(),
      _ => None,
    }
  }

  /// Edit the cached activity list in place, keeping its freshness.
  ///
  /// Returns `None` without calling `edit` when no list is cached.
  pub fn edit_activities<R>(&self, edit: impl FnOnce(&mut Vec<Activity>) -> R) -> Option<R> {
    let mut state = self.lock();
    let result = match state.entries.get_mut(&CacheKey::Activities) {
      Some(CacheEntry {
        value: CachedValue::Activities(list),
        ..
      }) => edit(list),
      _ => return None,
    };
    self.publish(&mut state);
    Some(result)
  }

  /// Id for a record that exists only locally until the store confirms it.
  pub fn next_optimistic_id(&self) -> String {
    let n = self.optimistic_seq.fetch_add(1, Ordering::Relaxed) + 1;
    format!("optimistic-{}", n)
  }
}

impl Default for ActivityCache {
  fn default() -> Self {
    Self::new()
  }
}

//! Consumer-facing facade: reads, mutations, manual sync and background
//! refresh over one shared cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::mutation::MutationPipeline;
use super::propagate;
use crate::activity::{
  Activity, ActivityMetrics, ActivityPatch, EntityRef, EntityType, Module, NewActivity,
};
use crate::cache::{
  ActivityCache, ActivityView, CacheKey, CacheResult, CacheSource, CachedValue,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{ActivityStore, RemoteError};

/// Activity cache and sync engine for one session.
pub struct ActivitySync<S: ActivityStore> {
  store: Arc<S>,
  cache: Arc<ActivityCache>,
  mutations: MutationPipeline<S>,
}

impl<S: ActivityStore> Clone for ActivitySync<S> {
  fn clone(&self) -> Self {
    Self::from_parts(self.store.clone(), self.cache.clone())
  }
}

impl<S: ActivityStore> ActivitySync<S> {
  pub fn new(store: S, cache: Arc<ActivityCache>) -> Self {
    Self::from_parts(Arc::new(store), cache)
  }

  fn from_parts(store: Arc<S>, cache: Arc<ActivityCache>) -> Self {
    let mutations = MutationPipeline::new(store.clone(), cache.clone());
    Self {
      store,
      cache,
      mutations,
    }
  }

  pub fn cache(&self) -> &Arc<ActivityCache> {
    &self.cache
  }

  /// Live view of the activity list and metrics.
  pub fn subscribe(&self) -> watch::Receiver<ActivityView> {
    self.cache.subscribe()
  }

  /// Forget everything cached for this session.
  pub fn reset(&self) {
    self.cache.reset();
    info!("session cache cleared");
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// All activities, refetched when stale or missing.
  pub async fn activities(&self) -> SyncResult<CacheResult<Vec<Activity>>> {
    let store = self.store.clone();
    let result = self
      .cache
      .ensure_fresh(&CacheKey::all(), || async move {
        store.list().await.map(CachedValue::Activities)
      })
      .await?;
    Ok(result.map(|value| value.into_activities().unwrap_or_default()))
  }

  /// Aggregate metrics, refetched when stale or missing.
  pub async fn metrics(&self) -> SyncResult<CacheResult<ActivityMetrics>> {
    let store = self.store.clone();
    let result = self
      .cache
      .ensure_fresh(&CacheKey::metrics(), || async move {
        store.metrics().await.map(CachedValue::Metrics)
      })
      .await?;
    Ok(result.map(|value| value.into_metrics().unwrap_or_default()))
  }

  /// Activities related to one entity, by the same rule propagation uses.
  ///
  /// Derived from the full list. The per-entity entry is only stored when
  /// the list itself was trustworthy.
  pub async fn activities_by_entity(
    &self,
    entity_type: EntityType,
    id: &str,
  ) -> SyncResult<CacheResult<Vec<Activity>>> {
    let key = CacheKey::by_entity(entity_type, id);
    if let Some(entry) = self.cache.get(&key) {
      if self.cache.is_fresh(&key) {
        if let Some(list) = entry.value.into_activities() {
          return Ok(CacheResult::from_cache(list, entry.cached_at));
        }
      }
    }

    let entity = EntityRef::new(entity_type, id);
    let ticket = self.cache.begin_fetch(key);
    let all = match self.activities().await {
      Ok(all) => all,
      Err(err) => {
        self.cache.abandon_fetch(ticket);
        return Err(err);
      }
    };

    let matching = all.map(|list| {
      list
        .into_iter()
        .filter(|activity| activity.relations.refers_to(&entity))
        .collect::<Vec<_>>()
    });
    if matching.source == CacheSource::Offline {
      self.cache.abandon_fetch(ticket);
    } else {
      self
        .cache
        .finish_fetch(ticket, CachedValue::Activities(matching.data.clone()));
    }
    Ok(matching)
  }

  /// Read-through for consumer-owned entries such as entity detail pages.
  pub async fn ensure_fresh<F, Fut>(
    &self,
    key: &CacheKey,
    fetcher: F,
  ) -> SyncResult<CacheResult<CachedValue>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedValue, RemoteError>>,
  {
    self.cache.ensure_fresh(key, fetcher).await
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Create an activity, then invalidate every module it did not come from.
  pub async fn create(&self, activity: NewActivity) -> SyncResult<Activity> {
    let origin = activity.source.module();
    let created = self.mutations.create(activity).await?;

    for module in Module::ALL.into_iter().filter(|m| *m != origin) {
      let marked = propagate::invalidate_module(&self.cache, module);
      debug!(module = module.as_str(), marked, "invalidated other module after create");
    }
    Ok(created)
  }

  pub async fn update(&self, id: &str, patch: ActivityPatch) -> SyncResult<Activity> {
    self.mutations.update(id, patch).await
  }

  pub async fn complete(&self, id: &str) -> SyncResult<Activity> {
    self.mutations.complete(id).await
  }

  pub async fn delete(&self, id: &str) -> SyncResult<()> {
    self.mutations.delete(id).await
  }

  // ==========================================================================
  // Sync
  // ==========================================================================

  /// Full resynchronization.
  ///
  /// Everything is invalidated first, so the refetched list and metrics are
  /// the only entries that come out fresh. A sync started from Lead
  /// Generation also sweeps that module's whole namespace.
  pub async fn sync(&self, origin: Option<Module>) -> SyncResult<()> {
    propagate::propagate(&self.cache, None);
    if origin == Some(Module::LeadGen) {
      propagate::invalidate_module(&self.cache, Module::LeadGen);
    }

    let (activities, metrics) =
      futures::join!(self.refresh_activities(), self.refresh_metrics());
    let count = activities?;
    metrics?;

    info!(
      origin = origin.map(Module::as_str).unwrap_or("manual"),
      activities = count,
      "sync complete"
    );
    Ok(())
  }

  /// Refetch the activity list and store it. Returns how many came back.
  pub async fn refresh_activities(&self) -> SyncResult<usize> {
    let ticket = self.cache.begin_fetch(CacheKey::all());
    match self.store.list().await {
      Ok(list) => {
        let count = list.len();
        self.cache.finish_fetch(ticket, CachedValue::Activities(list));
        debug!(count, "activity list refreshed");
        Ok(count)
      }
      Err(err) => {
        self.cache.abandon_fetch(ticket);
        Err(SyncError::remote("list activities", err))
      }
    }
  }

  /// Refetch the metrics and store them.
  pub async fn refresh_metrics(&self) -> SyncResult<ActivityMetrics> {
    let ticket = self.cache.begin_fetch(CacheKey::metrics());
    match self.store.metrics().await {
      Ok(metrics) => {
        self
          .cache
          .finish_fetch(ticket, CachedValue::Metrics(metrics.clone()));
        debug!(total = metrics.total, "metrics refreshed");
        Ok(metrics)
      }
      Err(err) => {
        self.cache.abandon_fetch(ticket);
        Err(SyncError::remote("fetch metrics", err))
      }
    }
  }

  /// Refresh the list and the metrics on their own intervals until the
  /// returned handle is stopped or dropped.
  pub fn start_background(&self, config: &SyncConfig) -> BackgroundRefresh {
    let activities = {
      let sync = self.clone();
      spawn_interval("activities", config.activities_interval(), move || {
        let sync = sync.clone();
        async move { sync.refresh_activities().await.map(drop) }
      })
    };
    let metrics = {
      let sync = self.clone();
      spawn_interval("metrics", config.metrics_interval(), move || {
        let sync = sync.clone();
        async move { sync.refresh_metrics().await.map(drop) }
      })
    };

    info!(
      activities_every = ?config.activities_interval(),
      metrics_every = ?config.metrics_interval(),
      "background refresh started"
    );
    BackgroundRefresh {
      tasks: vec![activities, metrics],
    }
  }
}

fn spawn_interval<F, Fut>(name: &'static str, period: Duration, refresh: F) -> JoinHandle<()>
where
  F: Fn() -> Fut + Send + 'static,
  Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
      ticker.tick().await;
      if let Err(err) = refresh().await {
        warn!(task = name, error = %err, "background refresh failed");
      }
    }
  })
}

/// Running background refresh tasks. Dropping the handle stops them.
pub struct BackgroundRefresh {
  tasks: Vec<JoinHandle<()>>,
}

impl BackgroundRefresh {
  pub fn is_running(&self) -> bool {
    self.tasks.iter().any(|task| !task.is_finished())
  }

  pub fn stop(mut self) {
    self.abort_all();
    info!("background refresh stopped");
  }

  fn abort_all(&mut self) {
    for task in self.tasks.drain(..) {
      task.abort();
    }
  }
}

impl Drop for BackgroundRefresh {
  fn drop(&mut self) {
    self.abort_all();
  }
}

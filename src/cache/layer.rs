//! Read path: serve fresh entries, refetch stale or missing ones, and fall
//! back to last-known data when the refetch fails.

use std::future::Future;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::result::CacheResult;
use super::store::{ActivityCache, CachedValue, Freshness};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteError;

impl ActivityCache {
  /// Make sure `key` holds trustworthy data, fetching it if needed.
  ///
  /// 1. Fresh entry: returned as is
  /// 2. Stale or missing: `fetcher` runs and its result is stored
  /// 3. Fetch failed with a cached value present: the stale value is served
  ///    and left marked stale
  /// 4. Fetch failed with nothing cached: the error is returned
  pub async fn ensure_fresh<F, Fut>(
    &self,
    key: &CacheKey,
    fetcher: F,
  ) -> SyncResult<CacheResult<CachedValue>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedValue, RemoteError>>,
  {
    let cached = self.get(key);
    if let Some(entry) = &cached {
      if self.is_fresh(key) {
        return Ok(CacheResult::from_cache(entry.value.clone(), entry.cached_at));
      }
    }

    debug!(key = %key, "refetching");
    let ticket = self.begin_fetch(key.clone());
    match fetcher().await {
      Ok(value) => {
        if self.finish_fetch(ticket, value.clone()) == Freshness::Stale {
          debug!(key = %key, "invalidated while fetching, stored as stale");
        }
        Ok(CacheResult::from_network(value))
      }
      Err(err) => {
        self.abandon_fetch(ticket);
        match cached {
          Some(entry) => {
            warn!(key = %key, error = %err, "refetch failed, serving last-known data");
            Ok(CacheResult::offline(entry.value, entry.cached_at))
          }
          None => Err(SyncError::remote("fetch", err)),
        }
      }
    }
  }
}

//! Device Path Cache
//!
//! Remembers the resolved local device path of each blockdevice id. Each id
//! has its own async slot, so concurrent callers for one id wait for a single
//! resolution instead of racing to divergent answers.

use crate::error::Result;
use dashmap::DashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

type Slot = Arc<Mutex<Option<PathBuf>>>;

/// Per-id cache of resolved device paths
#[derive(Default)]
pub struct DevicePathCache {
    slots: DashMap<String, Slot>,
}

impl DevicePathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached path, or run `resolve` and cache its result
    ///
    /// Failures are not cached.
    pub async fn get_or_try_resolve<F, Fut>(&self, id: &str, resolve: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        // Clone the slot out so the map shard is not held across the await
        let slot = self.slots.entry(id.to_string()).or_default().clone();
        let mut guard = slot.lock().await;

        if let Some(path) = guard.as_ref() {
            debug!("Found device path for {} in cache at {:?}", id, path);
            return Ok(path.clone());
        }

        match resolve().await {
            Ok(path) => {
                *guard = Some(path.clone());
                Ok(path)
            }
            Err(e) => {
                drop(guard);
                // Drop the empty slot unless another caller is queued on it
                self.slots
                    .remove_if(id, |_, s| Arc::ptr_eq(s, &slot) && Arc::strong_count(s) == 2);
                Err(e)
            }
        }
    }

    /// Cached path, without waiting on an in-flight resolution
    pub fn cached(&self, id: &str) -> Option<PathBuf> {
        let slot = self.slots.get(id)?.clone();
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Forget the path for `id`
    pub fn evict(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_once() {
        let cache = DevicePathCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let path = cache
                .get_or_try_resolve("vol1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(PathBuf::from("/dev/mapper/mpatha"))
                })
                .await
                .unwrap();
            assert_eq!(path, PathBuf::from("/dev/mapper/mpatha"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached("vol1"), Some(PathBuf::from("/dev/mapper/mpatha")));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = DevicePathCache::new();

        let result = cache
            .get_or_try_resolve("vol1", || async { Err(Error::unattached("vol1")) })
            .await;
        assert!(matches!(result, Err(Error::UnattachedVolume { .. })));
        assert_eq!(cache.cached("vol1"), None);
        assert!(cache.is_empty());

        let path = cache
            .get_or_try_resolve("vol1", || async { Ok(PathBuf::from("/dev/dm-1")) })
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/dev/dm-1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_lookups_leave_no_slots() {
        let cache = DevicePathCache::new();
        for id in ["stale-1", "stale-2", "unknown"] {
            let result = cache
                .get_or_try_resolve(id, || async move { Err(Error::unattached(id)) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_resolution() {
        let cache = Arc::new(DevicePathCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_try_resolve("vol1", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(PathBuf::from(format!("/dev/dm-{}", i)))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = DevicePathCache::new();
        cache
            .get_or_try_resolve("vol1", || async { Ok(PathBuf::from("/dev/dm-0")) })
            .await
            .unwrap();

        assert!(cache.evict("vol1"));
        assert!(!cache.evict("vol1"));
        assert!(cache.is_empty());
    }
}

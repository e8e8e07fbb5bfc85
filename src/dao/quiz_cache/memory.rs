//! In-process [`QuizCache`] backend with per-entry expiry.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;

use crate::dao::quiz_cache::{CacheResult, QuizCache};

#[derive(Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// DashMap-backed cache. Expired entries are dropped lazily on access; the
/// working set is bounded by the number of live instances, so no sweeper
/// task is needed.
#[derive(Clone, Default)]
pub struct MemoryQuizCache {
    entries: Arc<DashMap<String, Slot>>,
}

impl MemoryQuizCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuizCache for MemoryQuizCache {
    fn get(&self, key: String) -> BoxFuture<'static, CacheResult<Option<String>>> {
        let cache = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            match cache.entries.entry(key) {
                Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                    occupied.remove();
                    Ok(None)
                }
                Entry::Occupied(occupied) => Ok(Some(occupied.get().value.clone())),
                Entry::Vacant(_) => Ok(None),
            }
        })
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, CacheResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.entries.insert(
                key,
                Slot {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn set_nx(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, CacheResult<bool>> {
        let cache = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            match cache.entries.entry(key) {
                Entry::Occupied(mut occupied) if occupied.get().is_expired(now) => {
                    occupied.insert(Slot {
                        value,
                        expires_at: now + ttl,
                    });
                    Ok(true)
                }
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot {
                        value,
                        expires_at: now + ttl,
                    });
                    Ok(true)
                }
            }
        })
    }

    fn delete(&self, key: String) -> BoxFuture<'static, CacheResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.entries.remove(&key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryQuizCache::new();
        cache
            .set("k".into(), "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k".into()).await.unwrap(), Some("v".into()));
        assert_eq!(cache.get("other".into()).await.unwrap(), None);

        cache.delete("k".into()).await.unwrap();
        assert_eq!(cache.get("k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_writes_exactly_once() {
        let cache = MemoryQuizCache::new();

        assert!(
            cache
                .set_nx("start".into(), "100".into(), Duration::from_secs(60))
                .await
                .unwrap()
        );
        // The second exposure of the same question must keep the first value.
        assert!(
            !cache
                .set_nx("start".into(), "200".into(), Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(
            cache.get("start".into()).await.unwrap(),
            Some("100".into())
        );
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_are_replaceable() {
        let cache = MemoryQuizCache::new();
        cache
            .set("k".into(), "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k".into()).await.unwrap(), None);
        assert!(
            cache
                .set_nx("k".into(), "fresh".into(), Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k".into()).await.unwrap(), Some("fresh".into()));
    }
}

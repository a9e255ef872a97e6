//! Single-flight DNS result cache.
//!
//! Each `(domain, record type)` key maps to a once-cell. The first caller for
//! a key runs the lookup; everyone else asking for the same key while it is
//! in flight awaits that same cell. Different keys never wait on each other.
//!
//! Entries never expire. The cache lives as long as its owner: one job by
//! default, or the whole coordinator with [`CacheScope::Process`](crate::CacheScope).

use crate::protocols::dns::RecordType;
use crate::resolver::LookupOutcome;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::OnceCell;

/// Cache key: one DNS question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub domain: String,
    pub record_type: RecordType,
}

impl CacheKey {
    pub fn new<D: Into<String>>(domain: D, record_type: RecordType) -> Self {
        Self {
            domain: domain.into(),
            record_type,
        }
    }
}

/// A completed lookup, positive or negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub outcome: LookupOutcome,
    pub resolved_at: SystemTime,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered by an existing or in-flight entry
    pub hits: u64,
    /// Requests that performed the lookup themselves
    pub misses: u64,
}

/// Keyed DNS cache with per-key single-flight population.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<CacheKey, Arc<OnceCell<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached entry for `key`, running `resolve` if nobody has yet.
    ///
    /// If the caller that is running `resolve` is dropped mid-flight, the
    /// next waiter takes over and runs its own `resolve`.
    pub async fn get_or_resolve<F, Fut>(&self, key: CacheKey, resolve: F) -> CacheEntry
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LookupOutcome>,
    {
        // Clone the cell out so no map shard stays locked across the await
        let cell = self.entries.entry(key).or_default().clone();

        let mut resolved_here = false;
        let flag = &mut resolved_here;
        let entry = cell
            .get_or_init(move || async move {
                *flag = true;
                CacheEntry {
                    outcome: resolve().await,
                    resolved_at: SystemTime::now(),
                }
            })
            .await
            .clone();

        if resolved_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// Completed entry for `key`, without waiting on an in-flight lookup.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// All completed entries, sorted by key, without timestamps.
    pub fn snapshot(&self) -> Vec<(CacheKey, LookupOutcome)> {
        let mut entries: Vec<(CacheKey, LookupOutcome)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|cached| (entry.key().clone(), cached.outcome.clone()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn not_found() -> LookupOutcome {
        LookupOutcome::NotFound { nx_domain: true }
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let cache = DnsCache::new();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new("example.com", RecordType::A);

        for _ in 0..2 {
            let entry = cache
                .get_or_resolve(key.clone(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    not_found()
                })
                .await;
            assert_eq!(entry.outcome, not_found());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_lookup() {
        let cache = Arc::new(DnsCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_resolve(CacheKey::new("slow.example", RecordType::Mx), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            not_found()
                        })
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().outcome, not_found());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 15);
    }

    #[tokio::test]
    async fn test_record_types_are_separate_keys() {
        let cache = DnsCache::new();
        cache
            .get_or_resolve(CacheKey::new("example.com", RecordType::Mx), || async { not_found() })
            .await;
        cache
            .get_or_resolve(CacheKey::new("example.com", RecordType::A), || async { not_found() })
            .await;

        let keys: Vec<CacheKey> = cache.snapshot().into_iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                CacheKey::new("example.com", RecordType::A),
                CacheKey::new("example.com", RecordType::Mx),
            ]
        );
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_get_on_empty_cache() {
        let cache = DnsCache::new();
        assert!(cache.is_empty());
        assert!(cache.get(&CacheKey::new("example.com", RecordType::A)).is_none());
    }
}

//! TTL cache for distance/time matrices.
//!
//! Entries are keyed by a SHA-256 digest of the request parameters (every
//! location's coordinate bits plus the departure minute). The cache is owned
//! by [`CachedRoutingService`]; nothing here is process-global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::Coordinates;
use super::{DistanceTimeMatrices, RoutingService};

struct CacheEntry {
    matrices: DistanceTimeMatrices,
    stored_at: Instant,
}

/// In-memory matrix cache with a fixed time-to-live
pub struct MatrixCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl MatrixCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Stable key for a matrix request
    pub fn cache_key(locations: &[Coordinates], departure: NaiveDateTime) -> String {
        let mut hasher = Sha256::new();
        hasher.update((locations.len() as u64).to_le_bytes());
        for location in locations {
            hasher.update(location.lat.to_bits().to_le_bytes());
            hasher.update(location.lng.to_bits().to_le_bytes());
        }
        hasher.update(departure.format("%Y-%m-%dT%H:%M").to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<DistanceTimeMatrices> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.matrices.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `matrices`, evicting every expired entry first so the map only
    /// holds live ones
    pub fn insert(&self, key: String, matrices: DistanceTimeMatrices) {
        let mut entries = self.entries.lock();
        Self::evict_expired(&mut entries, self.ttl);
        entries.insert(
            key,
            CacheEntry {
                matrices,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        Self::evict_expired(&mut self.entries.lock(), self.ttl);
    }

    fn evict_expired(entries: &mut HashMap<String, CacheEntry>, ttl: Duration) {
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        if entries.len() < before {
            debug!("Evicted {} expired matrices", before - entries.len());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Routing service decorator that serves repeated matrix requests from a [`MatrixCache`]
pub struct CachedRoutingService {
    inner: Arc<dyn RoutingService>,
    cache: MatrixCache,
}

impl CachedRoutingService {
    pub fn new(inner: Arc<dyn RoutingService>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: MatrixCache::new(ttl),
        }
    }

    pub fn cache(&self) -> &MatrixCache {
        &self.cache
    }
}

#[async_trait]
impl RoutingService for CachedRoutingService {
    async fn get_matrices(
        &self,
        locations: &[Coordinates],
        departure: NaiveDateTime,
    ) -> Result<DistanceTimeMatrices> {
        let key = MatrixCache::cache_key(locations, departure);
        if let Some(matrices) = self.cache.get(&key) {
            debug!("Matrix cache hit for {} locations", locations.len());
            return Ok(matrices);
        }

        let matrices = self.inner.get_matrices(locations, departure).await?;
        self.cache.insert(key, matrices.clone());
        Ok(matrices)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::NaiveDate;

    struct CountingRouting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoutingService for CountingRouting {
        async fn get_matrices(
            &self,
            locations: &[Coordinates],
            _departure: NaiveDateTime,
        ) -> Result<DistanceTimeMatrices> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = locations.len();
            Ok(DistanceTimeMatrices {
                distances: vec![vec![1; n]; n],
                durations: vec![vec![1; n]; n],
                size: n,
            })
        }

        fn name(&self) -> &str {
            "Counting"
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn points() -> Vec<Coordinates> {
        vec![
            Coordinates { lat: 50.0, lng: 14.0 },
            Coordinates { lat: 50.1, lng: 14.1 },
        ]
    }

    #[test]
    fn cache_key_is_stable_and_sensitive() {
        let a = MatrixCache::cache_key(&points(), at(8, 0));
        let b = MatrixCache::cache_key(&points(), at(8, 0));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, MatrixCache::cache_key(&points(), at(9, 0)));
        assert_ne!(a, MatrixCache::cache_key(&points()[..1], at(8, 0)));
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = MatrixCache::new(Duration::from_millis(0));
        cache.insert("k".to_string(), DistanceTimeMatrices::empty());
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn purge_keeps_fresh_entries() {
        let cache = MatrixCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), DistanceTimeMatrices::empty());
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(DistanceTimeMatrices::empty()));
    }

    #[tokio::test]
    async fn expired_requests_do_not_accumulate() {
        let inner = Arc::new(CountingRouting { calls: AtomicUsize::new(0) });
        let service = CachedRoutingService::new(inner.clone(), Duration::from_millis(1));

        for minute in 0..50 {
            service.get_matrices(&points(), at(8, minute)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 50);
        assert_eq!(service.cache().len(), 1);
    }

    #[tokio::test]
    async fn cached_service_calls_inner_once_per_key() {
        let inner = Arc::new(CountingRouting { calls: AtomicUsize::new(0) });
        let service = CachedRoutingService::new(inner.clone(), Duration::from_secs(60));

        service.get_matrices(&points(), at(8, 0)).await.unwrap();
        service.get_matrices(&points(), at(8, 0)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        service.get_matrices(&points(), at(12, 0)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.cache().len(), 2);
        assert_eq!(service.name(), "Counting");
    }
}

//! Time-bounded cache for derived oracle values (fees, prices)
//!
//! Entries are keyed by platform or symbol and carry the oracle time they
//! were fetched at. A refresh overwrites the whole entry. The fee cache is a
//! `TimedCache<U256>` holding one gas price per platform.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue<V> {
    pub timestamp: DateTime<Utc>,
    pub value: V,
}

pub struct TimedCache<V> {
    entries: RwLock<HashMap<String, CachedValue<V>>>,
    ttl: Duration,
}

impl<V: Clone> TimedCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }

    /// Cached value for `key` if it is younger than the TTL at `now`
    pub async fn get_if_fresh(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| now - entry.timestamp < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub async fn store(&self, key: &str, now: DateTime<Utc>, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CachedValue {
                timestamp: now,
                value,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = TimedCache::<u64>::with_secs(60);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(cache.get_if_fresh("neo", t0).await, None);
        cache.store("neo", t0, 7).await;

        assert_eq!(cache.get_if_fresh("neo", t0 + Duration::seconds(59)).await, Some(7));
        assert_eq!(cache.get_if_fresh("neo", t0 + Duration::seconds(60)).await, None);
        assert_eq!(cache.get_if_fresh("ethereum", t0).await, None);
    }

    #[tokio::test]
    async fn test_refresh_overwrites() {
        let cache = TimedCache::<u64>::with_secs(60);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        cache.store("neo", t0, 1).await;
        cache.store("neo", t0 + Duration::seconds(90), 2).await;
        assert_eq!(cache.get_if_fresh("neo", t0 + Duration::seconds(100)).await, Some(2));
    }
}

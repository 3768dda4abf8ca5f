use crate::contracts::OrgStore;
use crate::ttl_cache::TtlCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;

/// The documented fallback expiry (one week) when org lookup fails outright
///
pub const FALLBACK_EXPIRY_SECS: i64 = 604_800;

/// One in-flight (or just-finished, not yet reaped) lookup, shared between
/// the leader and every waiter that joined it. `result` is written once by
/// the leader under `result`'s own mutex, then `notify.notify_waiters()` is
/// called — so every waiter that already holds a clone of this `Flight`
/// (taken before the leader's entry is reaped from `flights`) observes the
/// write regardless of when it wakes.
#[derive(Clone)]
struct Flight {
    notify: Arc<Notify>,
    result: Arc<std::sync::Mutex<Option<Option<i64>>>>,
}

/// Single-flight, TTL-cached org-session expiry lookup.
///
/// Concurrent calls for the same `org_id` are deduplicated: only one of
/// them actually queries `store`; the rest join the same `Flight` and read
/// whatever the leader computed. "Missing" is cached only for the duration
/// of the in-flight window that produced it — it is never written into the
/// TTL cache, and the leader reaps its `Flight` the moment it has a result,
/// so the next independent call after a miss re-queries the store.
pub struct OrgExpiryCache {
    store: Arc<dyn OrgStore>,
    ttl: TtlCache<String, i64>,
    enforce_org_data_age: bool,
    flights: AsyncMutex<HashMap<String, Flight>>,
}

impl OrgExpiryCache {
    pub fn new(store: Arc<dyn OrgStore>, enforce_org_data_age: bool, ttl: Duration) -> Self {
        Self {
            store,
            ttl: TtlCache::new(ttl),
            enforce_org_data_age,
            flights: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn org_expiry(&self, org_id: &str) -> i64 {
        if let Some(hit) = self.ttl.get(&org_id.to_string()) {
            return hit;
        }

        let (is_leader, flight) = {
            let mut flights = self.flights.lock().await;
            match flights.get(org_id) {
                Some(flight) => (false, flight.clone()),
                None => {
                    let flight = Flight { notify: Arc::new(Notify::new()), result: Arc::new(std::sync::Mutex::new(None)) };
                    flights.insert(org_id.to_string(), flight.clone());
                    (true, flight)
                }
            }
        };

        if !is_leader {
            // Register as a waiter before re-checking `result`, so a leader
            // that finishes between our registration and our check cannot
            // notify_waiters() into a gap where nobody is listening yet.
            let notified = flight.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = *flight.result.lock().unwrap() {
                return result.unwrap_or(FALLBACK_EXPIRY_SECS);
            }
            notified.await;
            let result = flight.result.lock().unwrap().expect("leader sets result before notifying");
            return result.unwrap_or(FALLBACK_EXPIRY_SECS);
        }

        let result = self.fetch(org_id).await;
        if let Some(expiry) = result {
            self.ttl.put(org_id.to_string(), expiry);
        }
        *flight.result.lock().unwrap() = Some(result);
        flight.notify.notify_waiters();
        // Reap immediately: every current waiter already holds a clone of
        // `flight` from before this point, so they still observe the
        // result. A new, independent call after this must not see a stale
        // "missing" answer, so it re-queries the store.
        self.flights.lock().await.remove(org_id);
        result.unwrap_or(FALLBACK_EXPIRY_SECS)
    }

    async fn fetch(&self, org_id: &str) -> Option<i64> {
        match self.store.get(org_id).await {
            Ok(Some(org)) if self.enforce_org_data_age => Some(org.data_expires),
            Ok(Some(_)) => None,
            Ok(None) => None,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::OrgSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
        expires: i64,
    }

    #[async_trait]
    impl OrgStore for CountingStore {
        async fn get(&self, _org_id: &str) -> anyhow::Result<Option<OrgSession>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Some(OrgSession { org_id: "org1".into(), data_expires: self.expires }))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl OrgStore for FailingStore {
        async fn get(&self, _org_id: &str) -> anyhow::Result<Option<OrgSession>> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_for_same_org_dedupe_to_one_store_call() {
        let store = Arc::new(CountingStore { calls: AtomicUsize::new(0), expires: 123 });
        let cache = Arc::new(OrgExpiryCache::new(store.clone(), true, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.org_expiry("org1").await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 123);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_falls_back_to_one_week() {
        let cache = OrgExpiryCache::new(Arc::new(FailingStore), true, Duration::from_secs(60));
        assert_eq!(cache.org_expiry("org1").await, FALLBACK_EXPIRY_SECS);
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_store_call() {
        let store = Arc::new(CountingStore { calls: AtomicUsize::new(0), expires: 999 });
        let cache = OrgExpiryCache::new(store.clone(), true, Duration::from_secs(60));
        assert_eq!(cache.org_expiry("org1").await, 999);
        assert_eq!(cache.org_expiry("org1").await, 999);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}

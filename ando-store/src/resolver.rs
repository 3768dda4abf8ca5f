use crate::contracts::{AuthManager, PolicyStore, SessionStore};
use crate::ttl_cache::TtlCache;
use ando_core::error::PolicyError;
use ando_core::session::Session;
use ando_core::PolicyMerger;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Adapts a `PolicyStore` to `PolicyMerger`'s synchronous `PolicyLookup`
/// trait by resolving every id up front. `PolicyMerger` itself stays free of
/// any storage or async dependency.
struct ResolvedPolicies(std::collections::HashMap<String, ando_core::policy::Policy>);

impl ando_core::PolicyLookup for ResolvedPolicies {
    fn get(&self, id: &str) -> Option<ando_core::policy::Policy> {
        self.0.get(id).cloned()
    }
}

/// The outcome of a [`SessionResolver::resolve`] call.
pub struct Resolution {
    pub session: Session,
    pub found: bool,
    /// Set when the session came from the auth-manager tier: a post-auth
    /// stage should write the (now policy-merged) session back to the
    /// store.
    pub update_scheduled: bool,
}

/// Tiered session lookup: TTL cache → session store → auth-manager.
/// Each tier, on a hit, runs `PolicyMerger` before returning so every
/// caller sees a fully-merged session regardless of which tier served it.
pub struct SessionResolver {
    cache: TtlCache<String, Session>,
    store: Arc<dyn SessionStore>,
    policies: Arc<dyn PolicyStore>,
    auth_manager: Arc<dyn AuthManager>,
    hash_keys: bool,
    min_token_length: usize,
    local_cache_disabled: bool,
    cache_ttl: Duration,
}

impl SessionResolver {
    pub fn new(
        store: Arc<dyn SessionStore>,
        policies: Arc<dyn PolicyStore>,
        auth_manager: Arc<dyn AuthManager>,
        hash_keys: bool,
        min_token_length: usize,
        local_cache_disabled: bool,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache: TtlCache::new(cache_ttl),
            store,
            policies,
            auth_manager,
            hash_keys,
            min_token_length,
            local_cache_disabled,
            cache_ttl,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        if self.hash_keys {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            format!("{:x}", hasher.finalize())
        } else {
            key.to_string()
        }
    }

    async fn merge_policies(&self, session: &mut Session) -> Result<(), PolicyError> {
        let mut resolved = std::collections::HashMap::new();
        for id in &session.policy_ids {
            match self
                .policies
                .get(id)
                .await
                .map_err(|_| PolicyError::NotFound(id.clone()))?
            {
                Some(p) => {
                    resolved.insert(id.clone(), p);
                }
                None => return Err(PolicyError::NotFound(id.clone())),
            }
        }
        let lookup = ResolvedPolicies(resolved);
        let org_id = session.org_id.clone();
        PolicyMerger::merge(session, &session.policy_ids.clone(), &lookup, Some(&org_id))
    }

    pub async fn resolve(&self, key: &str) -> Resolution {
        if key.len() <= self.min_token_length {
            return Resolution { session: Session::new("", ""), found: false, update_scheduled: false };
        }

        let cache_key = self.cache_key(key);

        if !self.local_cache_disabled {
            if let Some(mut session) = self.cache.get(&cache_key) {
                let found = self.merge_policies(&mut session).await.is_ok();
                return Resolution { session, found, update_scheduled: false };
            }
        }

        if let Ok(Some(mut session)) = self.store.get(&cache_key).await {
            if !self.local_cache_disabled {
                self.cache.put_with_ttl(cache_key.clone(), session.clone(), self.cache_ttl);
            }
            let found = self.merge_policies(&mut session).await.is_ok();
            return Resolution { session, found, update_scheduled: false };
        }

        if let Ok(Some(mut session)) = self.auth_manager.authenticate(key).await {
            if !self.local_cache_disabled {
                self.cache.put_with_ttl(cache_key, session.clone(), self.cache_ttl);
            }
            let found = self.merge_policies(&mut session).await.is_ok();
            return Resolution { session, found, update_scheduled: true };
        }

        Resolution { session: Session::new("", ""), found: false, update_scheduled: false }
    }

    /// Flush a scheduled write-back to the session store with the given
    /// TTL, write-through the local cache unless disabled, and report
    /// whether the store write succeeded.
    pub async fn update_session(&self, key: &str, session: &Session, ttl_secs: i64) -> bool {
        let cache_key = self.cache_key(key);
        let ok = self.store.put(&cache_key, session, ttl_secs).await.is_ok();
        if !self.local_cache_disabled {
            self.cache.put_with_ttl(cache_key, session.clone(), Duration::from_secs(ttl_secs.max(0) as u64));
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryAuthManager, InMemoryPolicyStore, InMemorySessionStore};

    fn resolver(
        store: Arc<dyn SessionStore>,
        policies: Arc<dyn PolicyStore>,
        auth: Arc<dyn AuthManager>,
    ) -> SessionResolver {
        SessionResolver::new(store, policies, auth, false, 3, false, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn key_shorter_than_min_length_is_rejected_without_any_lookup() {
        let r = resolver(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAuthManager::new()),
        );
        let res = r.resolve("ab").await;
        assert!(!res.found);
        assert!(!res.update_scheduled);
    }

    #[tokio::test]
    async fn store_hit_backfills_cache_and_does_not_schedule_update() {
        let store = Arc::new(InMemorySessionStore::new());
        let session = Session::new("org1", "hash1");
        store.seed("validkey123", session.clone());
        let r = resolver(store, Arc::new(InMemoryPolicyStore::new()), Arc::new(InMemoryAuthManager::new()));

        let res = r.resolve("validkey123").await;
        assert!(res.found);
        assert!(!res.update_scheduled);
        assert_eq!(r.cache.len(), 1);
    }

    #[tokio::test]
    async fn auth_manager_hit_schedules_update_and_populates_cache() {
        let auth = Arc::new(InMemoryAuthManager::new());
        let session = Session::new("org1", "hash1");
        auth.seed("freshkey123", session.clone());
        let r = resolver(Arc::new(InMemorySessionStore::new()), Arc::new(InMemoryPolicyStore::new()), auth);

        let res = r.resolve("freshkey123").await;
        assert!(res.found);
        assert!(res.update_scheduled);
        assert_eq!(r.cache.len(), 1);

        // Second resolve should now come from cache, no update scheduled.
        let res2 = r.resolve("freshkey123").await;
        assert!(res2.found);
        assert!(!res2.update_scheduled);
    }

    #[tokio::test]
    async fn unresolvable_key_reports_not_found() {
        let r = resolver(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAuthManager::new()),
        );
        let res = r.resolve("nowhere1234").await;
        assert!(!res.found);
    }

    #[tokio::test]
    async fn missing_policy_id_surfaces_as_not_found_without_panicking() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut session = Session::new("org1", "hash1");
        session.policy_ids = vec!["ghost-policy".into()];
        store.seed("key-with-bad-policy", session);
        let r = resolver(store, Arc::new(InMemoryPolicyStore::new()), Arc::new(InMemoryAuthManager::new()));

        let res = r.resolve("key-with-bad-policy").await;
        assert!(!res.found);
    }
}

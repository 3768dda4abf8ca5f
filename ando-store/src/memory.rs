use crate::contracts::{AuthManager, ConsumerStore, OrgSession, OrgStore, PolicyStore, SessionStore};
use ando_core::consumer::Consumer;
use ando_core::policy::Policy;
use ando_core::session::Session;
use async_trait::async_trait;
use dashmap::DashMap;

/// `DashMap`-backed `SessionStore`, used for tests and for single-node
/// deployments that don't need a shared backend. Mirrors the concurrency
/// idiom `ApiSpecRegistry` already uses in `ando-core`.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, cache_key: impl Into<String>, session: Session) {
        self.sessions.insert(cache_key.into(), session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, cache_key: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.get(cache_key).map(|r| r.value().clone()))
    }

    async fn put(&self, cache_key: &str, session: &Session, _ttl_secs: i64) -> anyhow::Result<()> {
        self.sessions.insert(cache_key.to_string(), session.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<String, Policy>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, policy: Policy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    /// Admin-facing write, identical to `seed` under a name that reads
    /// correctly outside of test setup.
    pub fn put(&self, policy: Policy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    pub fn remove(&self, policy_id: &str) -> Option<Policy> {
        self.policies.remove(policy_id).map(|(_, v)| v)
    }

    pub fn all(&self) -> Vec<Policy> {
        self.policies.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, policy_id: &str) -> anyhow::Result<Option<Policy>> {
        Ok(self.policies.get(policy_id).map(|r| r.value().clone()))
    }
}

#[derive(Default)]
pub struct InMemoryOrgStore {
    orgs: DashMap<String, OrgSession>,
}

impl InMemoryOrgStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, org: OrgSession) {
        self.orgs.insert(org.org_id.clone(), org);
    }
}

#[async_trait]
impl OrgStore for InMemoryOrgStore {
    async fn get(&self, org_id: &str) -> anyhow::Result<Option<OrgSession>> {
        Ok(self.orgs.get(org_id).map(|r| r.value().clone()))
    }
}

/// `AuthManager` backed by a static key→session table. Stands in for
/// whatever external credential source would be consulted in a real
/// deployment -- tests and local/dev setups seed it
/// directly instead of calling out to one.
#[derive(Default)]
pub struct InMemoryAuthManager {
    keys: DashMap<String, Session>,
}

impl InMemoryAuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, session: Session) {
        self.keys.insert(key.into(), session);
    }
}

#[async_trait]
impl AuthManager for InMemoryAuthManager {
    async fn authenticate(&self, key: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.keys.get(key).map(|r| r.value().clone()))
    }
}

/// `DashMap`-backed `ConsumerStore`, the admin API's CRUD surface over
/// [`Consumer`] metadata.
#[derive(Default)]
pub struct InMemoryConsumerStore {
    consumers: DashMap<String, Consumer>,
}

impl InMemoryConsumerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, consumer: Consumer) {
        self.consumers.insert(consumer.id.clone(), consumer);
    }

    pub fn remove(&self, id: &str) -> Option<Consumer> {
        self.consumers.remove(id).map(|(_, v)| v)
    }

    pub fn all(&self) -> Vec<Consumer> {
        self.consumers.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl ConsumerStore for InMemoryConsumerStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Consumer>> {
        Ok(self.consumers.get(id).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_store_round_trips() {
        let store = InMemorySessionStore::new();
        let session = Session::new("org1", "hash1");
        store.put("org1hash1", &session, 60).await.unwrap();
        let fetched = store.get("org1hash1").await.unwrap().unwrap();
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn policy_store_missing_returns_none() {
        let store = InMemoryPolicyStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_manager_authenticates_seeded_key() {
        let mgr = InMemoryAuthManager::new();
        let session = Session::new("org1", "hash1");
        mgr.seed("raw-key", session.clone());
        assert_eq!(mgr.authenticate("raw-key").await.unwrap(), Some(session));
        assert_eq!(mgr.authenticate("other-key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn consumer_store_put_get_remove_round_trips() {
        let store = InMemoryConsumerStore::new();
        let consumer = Consumer {
            id: "c1".into(),
            org_id: "org1".into(),
            username: "alice".into(),
            description: String::new(),
            policy_ids: vec!["p1".into()],
            labels: Default::default(),
            created_at: None,
            updated_at: None,
        };
        store.put(consumer.clone());
        assert_eq!(store.get("c1").await.unwrap(), Some(consumer));
        assert_eq!(store.all().len(), 1);
        assert!(store.remove("c1").is_some());
        assert!(store.get("c1").await.unwrap().is_none());
    }
}

use ando_core::consumer::Consumer;
use ando_core::policy::Policy;
use ando_core::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-organisation session-expiry record, as resolved by the org session
/// store. Kept deliberately thin — the core only cares about
/// `data_expires`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgSession {
    pub org_id: String,
    pub data_expires: i64,
}

/// Contract for a session's backing store ("out of scope ... the
/// storage backends (key-value store, RPC store, LDAP)"). `SessionResolver`
/// only ever talks to this trait, never to a concrete backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, cache_key: &str) -> anyhow::Result<Option<Session>>;
    async fn put(&self, cache_key: &str, session: &Session, ttl_secs: i64) -> anyhow::Result<()>;
}

/// Contract for the shared policy registry (read path only — `PolicyMerger`
/// never writes through this).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, policy_id: &str) -> anyhow::Result<Option<Policy>>;
}

/// Contract for the organisation-session store consulted by
/// `OrgExpiryCache`.
#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn get(&self, org_id: &str) -> anyhow::Result<Option<OrgSession>>;
}

/// Contract for the credential registry ("auth manager") consulted as the
/// last resolution tier in `SessionResolver`. Represents
/// whatever validates a raw key when neither cache nor store has a hit --
/// an external identity provider, an LDAP bind, or a local key vault.
#[async_trait]
pub trait AuthManager: Send + Sync {
    async fn authenticate(&self, key: &str) -> anyhow::Result<Option<Session>>;
}

/// Contract for the admin-provisioned consumer directory. Read path only —
/// mutation goes through the concrete store's inherent methods, the same
/// split `PolicyStore`/`InMemoryPolicyStore` already use.
#[async_trait]
pub trait ConsumerStore: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Consumer>>;
}

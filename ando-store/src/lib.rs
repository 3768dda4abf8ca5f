pub mod contracts;
pub mod memory;
pub mod org_expiry;
pub mod resolver;
pub mod ttl_cache;

#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(feature = "etcd")]
pub mod schema;

#[cfg(feature = "etcd")]
pub mod watcher;

pub use contracts::{AuthManager, ConsumerStore, OrgSession, OrgStore, PolicyStore, SessionStore};
pub use memory::{InMemoryAuthManager, InMemoryConsumerStore, InMemoryOrgStore, InMemoryPolicyStore, InMemorySessionStore};
pub use org_expiry::OrgExpiryCache;
pub use resolver::{Resolution, SessionResolver};
pub use ttl_cache::TtlCache;

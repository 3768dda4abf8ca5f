use crate::contracts::{OrgSession, OrgStore, PolicyStore, SessionStore};
use crate::schema::Schema;
use ando_core::policy::Policy;
use ando_core::session::Session;
use ando_core::spec::ApiSpec;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// etcd-backed implementation of the storage contracts (etcd is the
/// one backend the gateway ships, everything else is "defined only through
/// contracts").
pub struct EtcdStore {
    client: etcd_client::Client,
    schema: Schema,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String], prefix: &str) -> Result<Self> {
        let client = etcd_client::Client::connect(endpoints, None).await?;
        info!(?endpoints, "connected to etcd");
        Ok(Self { client, schema: Schema::new(prefix) })
    }

    /// Load every `ApiSpec` under the apis prefix, for registry bootstrap
    /// and config-reload.
    pub async fn load_api_specs(&mut self) -> Result<Vec<ApiSpec>> {
        let prefix = self.schema.apis_prefix();
        let resp = self
            .client
            .get(prefix.as_bytes(), Some(etcd_client::GetOptions::new().with_prefix()))
            .await?;
        let mut specs = Vec::new();
        for kv in resp.kvs() {
            match serde_json::from_slice::<ApiSpec>(kv.value()) {
                Ok(spec) => specs.push(spec),
                Err(e) => warn!(error = %e, key = %String::from_utf8_lossy(kv.key()), "skipping malformed api spec"),
            }
        }
        Ok(specs)
    }

    pub async fn put_api_spec(&mut self, spec: &ApiSpec) -> Result<()> {
        let key = self.schema.api_key(&spec.api_id);
        let value = serde_json::to_vec(spec)?;
        self.client.put(key, value, None).await?;
        Ok(())
    }

    pub async fn delete_api_spec(&mut self, api_id: &str) -> Result<()> {
        let key = self.schema.api_key(api_id);
        self.client.delete(key, None).await?;
        Ok(())
    }

    pub async fn put_policy(&mut self, policy: &Policy) -> Result<()> {
        let key = self.schema.policy_key(&policy.id);
        let value = serde_json::to_vec(policy)?;
        self.client.put(key, value, None).await?;
        Ok(())
    }

    pub async fn delete_policy(&mut self, id: &str) -> Result<()> {
        let key = self.schema.policy_key(id);
        self.client.delete(key, None).await?;
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[async_trait]
impl SessionStore for EtcdStore {
    async fn get(&self, cache_key: &str) -> Result<Option<Session>> {
        let mut client = self.client.clone();
        let key = self.schema.session_key(cache_key);
        let resp = client.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .and_then(|kv| serde_json::from_slice(kv.value()).ok()))
    }

    async fn put(&self, cache_key: &str, session: &Session, ttl_secs: i64) -> Result<()> {
        let mut client = self.client.clone();
        let key = self.schema.session_key(cache_key);
        let value = serde_json::to_vec(session)?;
        if ttl_secs > 0 {
            let lease = client.lease_grant(ttl_secs, None).await?;
            client
                .put(key, value, Some(etcd_client::PutOptions::new().with_lease(lease.id())))
                .await?;
        } else {
            client.put(key, value, None).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for EtcdStore {
    async fn get(&self, policy_id: &str) -> Result<Option<Policy>> {
        let mut client = self.client.clone();
        let key = self.schema.policy_key(policy_id);
        let resp = client.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .and_then(|kv| serde_json::from_slice(kv.value()).ok()))
    }
}

#[async_trait]
impl OrgStore for EtcdStore {
    async fn get(&self, org_id: &str) -> Result<Option<OrgSession>> {
        let mut client = self.client.clone();
        let key = self.schema.org_key(org_id);
        let resp = client.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .and_then(|kv| serde_json::from_slice(kv.value()).ok()))
    }
}

use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use ando_store::OrgExpiryCache;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// The `OrgMonitor` step of the fixed order: rejects once the session's
/// org has passed its configured data-retention expiry, backed by
/// [`OrgExpiryCache`]'s single-flight + TTL lookup.
pub struct OrgMonitorStage {
    expiry: Arc<OrgExpiryCache>,
}

impl OrgMonitorStage {
    pub fn new(expiry: Arc<OrgExpiryCache>) -> Self {
        Self { expiry }
    }
}

#[async_trait]
impl StageContract for OrgMonitorStage {
    fn name(&self) -> &str {
        "org-monitor"
    }

    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }

    async fn process(&self, ctx: &mut StageContext, _config: &Value) -> StageOutcome {
        let org_id = match &ctx.session {
            Some(s) if !s.org_id.is_empty() => s.org_id.clone(),
            _ => return StageOutcome::Continue,
        };

        let expiry = self.expiry.org_expiry(&org_id).await;
        if expiry <= 0 {
            return StageOutcome::Respond {
                status: 403,
                headers: Default::default(),
                body: Some(br#"{"error":"org data retention period has expired","status":403}"#.to_vec()),
            };
        }
        StageOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ando_store::{InMemoryOrgStore, OrgSession};

    fn ctx_with_org(org_id: &str) -> StageContext {
        let mut c = StageContext::new("GET".into(), "/".into(), Default::default(), "127.0.0.1".into(), "api1".into());
        c.session = Some(ando_core::Session::new(org_id, "hash1"));
        c
    }

    #[tokio::test]
    async fn positive_expiry_continues() {
        let store = Arc::new(InMemoryOrgStore::new());
        store.seed(OrgSession { org_id: "org1".into(), data_expires: 3600 });
        let stage = OrgMonitorStage::new(Arc::new(OrgExpiryCache::new(store, true, std::time::Duration::from_secs(60))));
        let mut c = ctx_with_org("org1");
        assert!(matches!(stage.process(&mut c, &Value::Null).await, StageOutcome::Continue));
    }

    #[tokio::test]
    async fn expired_org_is_rejected() {
        let store = Arc::new(InMemoryOrgStore::new());
        store.seed(OrgSession { org_id: "org1".into(), data_expires: -1 });
        let stage = OrgMonitorStage::new(Arc::new(OrgExpiryCache::new(store, true, std::time::Duration::from_secs(60))));
        let mut c = ctx_with_org("org1");
        assert!(matches!(stage.process(&mut c, &Value::Null).await, StageOutcome::Respond { status: 403, .. }));
    }

    #[tokio::test]
    async fn session_without_org_is_not_checked() {
        let store = Arc::new(InMemoryOrgStore::new());
        let stage = OrgMonitorStage::new(Arc::new(OrgExpiryCache::new(store, true, std::time::Duration::from_secs(60))));
        let mut c = StageContext::new("GET".into(), "/".into(), Default::default(), "127.0.0.1".into(), "api1".into());
        assert!(matches!(stage.process(&mut c, &Value::Null).await, StageOutcome::Continue));
    }
}

use crate::schema::Schema;
use ando_core::spec::ApiSpec;
use ando_core::ApiSpecRegistry;
use tracing::{info, warn};

/// Watches etcd for `ApiSpec` changes and keeps an `ApiSpecRegistry` in
/// sync, signalling every worker core over a crossbeam channel so each one
/// re-runs `PipelineBuilder` against the refreshed registry (the
/// builder "runs at configuration-reload time and writes a new Registry
/// snapshot atomically").
pub struct ConfigWatcher {
    schema: Schema,
}

impl ConfigWatcher {
    pub fn new(prefix: &str) -> Self {
        Self { schema: Schema::new(prefix) }
    }

    /// Blocks forever, applying etcd events to `registry` and notifying
    /// `notify` after each batch.
    pub async fn watch(
        &self,
        endpoints: &[String],
        registry: std::sync::Arc<ApiSpecRegistry>,
        notify: crossbeam_channel::Sender<()>,
    ) -> anyhow::Result<()> {
        let mut client = etcd_client::Client::connect(endpoints, None).await?;
        let prefix = self.schema.apis_prefix();
        info!(%prefix, "starting etcd watcher");

        let (_watcher, mut stream) = client
            .watch(prefix.as_bytes(), Some(etcd_client::WatchOptions::new().with_prefix()))
            .await?;

        while let Ok(Ok(Some(resp))) =
            tokio::time::timeout(std::time::Duration::from_secs(30), stream.message()).await
        {
            let mut changed = false;
            for event in resp.events() {
                if let Some(kv) = event.kv() {
                    let key = String::from_utf8_lossy(kv.key()).into_owned();
                    match event.event_type() {
                        etcd_client::EventType::Put => {
                            changed |= self.handle_put(&key, kv.value(), &registry);
                        }
                        etcd_client::EventType::Delete => {
                            changed |= self.handle_delete(&key, &registry);
                        }
                    }
                }
            }
            if changed {
                let _ = notify.try_send(());
            }
        }

        Ok(())
    }

    fn handle_put(&self, key: &str, value: &[u8], registry: &ApiSpecRegistry) -> bool {
        if !key.contains("/apis/") {
            return false;
        }
        match serde_json::from_slice::<ApiSpec>(value) {
            Ok(spec) => {
                info!(api_id = %spec.api_id, "api spec updated");
                registry.insert(spec);
                true
            }
            Err(e) => {
                warn!(error = %e, %key, "ignoring malformed api spec put");
                false
            }
        }
    }

    fn handle_delete(&self, key: &str, registry: &ApiSpecRegistry) -> bool {
        if !key.contains("/apis/") {
            return false;
        }
        let id = key.rsplit('/').next().unwrap_or("");
        registry.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ando_core::spec::{AuthMethods, CorsConfig, MiddlewareBundle, Protocol, StorageProvider, VersionData};

    fn spec(id: &str) -> ApiSpec {
        ApiSpec {
            api_id: id.into(),
            org_id: "org1".into(),
            listen_path: "/foo".into(),
            domain: String::new(),
            target_url: "http://backend".into(),
            protocol: Protocol::Http,
            auth: AuthMethods::default(),
            cors: CorsConfig::default(),
            versions: VersionData::default(),
            session_lifetime: 0,
            storage_provider: StorageProvider::KeyValue,
            middleware: MiddlewareBundle::default(),
            strip_listen_path: false,
            enable_request_size_limit: false,
            request_size_limit: 0,
            enable_ip_allowlist: false,
            allowed_ips: Vec::new(),
            enable_ip_denylist: false,
            denied_ips: Vec::new(),
            active: true,
        }
    }

    fn watcher() -> ConfigWatcher {
        ConfigWatcher::new("/ando")
    }

    #[test]
    fn handle_put_inserts_api_spec_into_registry() {
        let w = watcher();
        let registry = ApiSpecRegistry::new();
        let spec = spec("api1");
        let data = serde_json::to_vec(&spec).unwrap();
        assert!(w.handle_put("/ando/apis/api1", &data, &registry));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn handle_put_ignores_non_api_keys() {
        let w = watcher();
        let registry = ApiSpecRegistry::new();
        assert!(!w.handle_put("/ando/policies/p1", b"{}", &registry));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn handle_put_with_invalid_json_is_ignored() {
        let w = watcher();
        let registry = ApiSpecRegistry::new();
        assert!(!w.handle_put("/ando/apis/api1", b"not-json", &registry));
    }

    #[test]
    fn handle_delete_removes_api_spec_from_registry() {
        let w = watcher();
        let registry = ApiSpecRegistry::new();
        registry.insert(spec("api1"));
        assert!(w.handle_delete("/ando/apis/api1", &registry));
        assert_eq!(registry.len(), 0);
    }
}

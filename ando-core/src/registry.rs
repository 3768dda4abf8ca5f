use crate::spec::{resolve_listen_path_collisions, ApiSpec};
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent store of loaded [`ApiSpec`]s, keyed by `api_id`.
///
/// This is the *data-level* registry: it holds the declarative specs an
/// admin operator CRUDs over. The compiled-pipeline registry (stage chains
/// built from these specs) lives in `ando-proxy`, which depends on this
/// crate plus `ando-plugin` — a dependency direction `ando-core` itself
/// cannot take on.
#[derive(Default)]
pub struct ApiSpecRegistry {
    specs: DashMap<String, Arc<ApiSpec>>,
}

impl ApiSpecRegistry {
    pub fn new() -> Self {
        Self {
            specs: DashMap::new(),
        }
    }

    pub fn get(&self, api_id: &str) -> Option<Arc<ApiSpec>> {
        self.specs.get(api_id).map(|r| r.clone())
    }

    pub fn insert(&self, spec: ApiSpec) {
        self.specs.insert(spec.api_id.clone(), Arc::new(spec));
    }

    pub fn remove(&self, api_id: &str) -> Option<Arc<ApiSpec>> {
        self.specs.remove(api_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<ApiSpec>> {
        self.specs.iter().map(|r| r.clone()).collect()
    }

    /// Replace the entire spec set, first resolving `(domain, listen_path)`
    /// collisions across the incoming batch. Used at startup and on a full
    /// reload.
    pub fn replace_all(&self, mut specs: Vec<ApiSpec>) {
        resolve_listen_path_collisions(&mut specs);
        self.specs.clear();
        for spec in specs {
            self.specs.insert(spec.api_id.clone(), Arc::new(spec));
        }
    }
}

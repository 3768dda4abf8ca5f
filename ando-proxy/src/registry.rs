//! Concurrent, hot-swappable mapping from a matched api to its compiled
//! `Pipeline`. Reload discipline: a new snapshot is built completely off to
//! the side, then swapped in with one `ArcSwap::store` -- in-flight
//! requests keep running against the pipeline they already picked up, new
//! requests see the new map. No request crosses snapshots.

use ando_plugin::pipeline::Pipeline;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// One compiled pipeline plus the metadata needed to match and log against
/// it without re-reading the source `ApiSpec`.
pub struct CompiledApi {
    pub api_id: String,
    pub domain: String,
    pub listen_path: String,
    pub pipeline: Arc<Pipeline>,
    pub target_url: String,
    pub strip_listen_path: bool,
    pub options_passthrough: bool,
}

impl CompiledApi {
    /// `host:port` dial target derived from `target_url`, defaulting the
    /// port per scheme when the url omits one.
    pub fn upstream_authority(&self) -> String {
        if let Ok(uri) = self.target_url.parse::<http::Uri>() {
            if let Some(authority) = uri.authority() {
                if authority.port().is_some() {
                    return authority.to_string();
                }
                let port = if uri.scheme_str() == Some("https") { 443 } else { 80 };
                return format!("{}:{}", authority.host(), port);
            }
        }
        self.target_url.clone()
    }

    /// Strip the listen path off a matched request path when
    /// `strip_listen_path` is set, otherwise forward it unchanged.
    pub fn upstream_path(&self, request_path: &str) -> String {
        if !self.strip_listen_path {
            return request_path.to_string();
        }
        match request_path.strip_prefix(self.listen_path.as_str()) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(rest) => format!("/{rest}"),
            None => request_path.to_string(),
        }
    }
}

#[derive(Default)]
struct Snapshot {
    /// `(domain, listen_path)` lookup, the primary inbound match.
    by_listen_path: HashMap<(String, String), Arc<CompiledApi>>,
    /// `api_id` lookup, used by the loop dispatcher's host-`self` case and
    /// its fuzzy cross-api case.
    by_api_id: HashMap<String, Arc<CompiledApi>>,
}

/// `ApiSpecRegistry` in `ando-core` holds the declarative specs an admin
/// operator edits; this holds what `PipelineBuilder` compiled from them,
/// swapped in as one atomic unit on reload.
pub struct PipelineRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self { snapshot: ArcSwap::from_pointee(Snapshot::default()) }
    }

    /// Replace the entire registry with a freshly built set of compiled
    /// apis. Readers never observe a partially-built snapshot.
    pub fn replace_all(&self, compiled: Vec<CompiledApi>) {
        let mut snap = Snapshot::default();
        for api in compiled {
            let api = Arc::new(api);
            snap.by_listen_path.insert((api.domain.clone(), api.listen_path.clone()), api.clone());
            snap.by_api_id.insert(api.api_id.clone(), api);
        }
        self.snapshot.store(Arc::new(snap));
    }

    /// Match an inbound request by domain + longest listen-path prefix.
    pub fn lookup(&self, domain: &str, path: &str) -> Option<Arc<CompiledApi>> {
        let snap = self.snapshot.load();
        let mut best: Option<&Arc<CompiledApi>> = None;
        for ((d, listen_path), api) in snap.by_listen_path.iter() {
            if d != domain && !d.is_empty() {
                continue;
            }
            if path.starts_with(listen_path.as_str()) {
                let better = match best {
                    Some(b) => listen_path.len() > b.listen_path.len(),
                    None => true,
                };
                if better {
                    best = Some(api);
                }
            }
        }
        best.cloned()
    }

    pub fn by_api_id(&self, api_id: &str) -> Option<Arc<CompiledApi>> {
        self.snapshot.load().by_api_id.get(api_id).cloned()
    }

    /// Fuzzy lookup used by the self-loop dispatcher when the target host
    /// is not `self`: try `api_id` directly, then a name with
    /// non-alphanumerics stripped and any `#...` category suffix trimmed.
    pub fn fuzzy_lookup(&self, host: &str) -> Option<Arc<CompiledApi>> {
        if let Some(api) = self.by_api_id(host) {
            return Some(api);
        }
        let sanitised = sanitise(host);
        let snap = self.snapshot.load();
        snap.by_api_id.values().find(|api| sanitise(&api.api_id) == sanitised || sanitise(&api.listen_path) == sanitised).cloned()
    }

    /// Every compiled api's upstream dial target, for connection-pool
    /// pre-warming at worker startup.
    pub fn all_upstream_authorities(&self) -> Vec<String> {
        self.snapshot.load().by_api_id.values().map(|api| api.upstream_authority()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_api_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sanitise(name: &str) -> String {
    let trimmed = name.split('#').next().unwrap_or(name);
    trimmed.chars().filter(|c| c.is_alphanumeric()).map(|c| c.to_ascii_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ando_plugin::plugin::StageInstance;

    fn compiled(api_id: &str, domain: &str, listen_path: &str) -> CompiledApi {
        CompiledApi {
            api_id: api_id.into(),
            domain: domain.into(),
            listen_path: listen_path.into(),
            pipeline: Arc::new(Pipeline::new(Vec::<StageInstance>::new(), false)),
            target_url: "http://backend.local".into(),
            strip_listen_path: false,
            options_passthrough: false,
        }
    }

    #[test]
    fn lookup_matches_longest_listen_path_prefix() {
        let reg = PipelineRegistry::new();
        reg.replace_all(vec![compiled("a1", "", "/foo"), compiled("a2", "", "/foo/bar")]);
        let hit = reg.lookup("", "/foo/bar/baz").unwrap();
        assert_eq!(hit.api_id, "a2");
    }

    #[test]
    fn fuzzy_lookup_strips_non_alphanumerics_and_category_suffix() {
        let reg = PipelineRegistry::new();
        reg.replace_all(vec![compiled("billing-api", "", "/billing")]);
        let hit = reg.fuzzy_lookup("Billing-API#oas").unwrap();
        assert_eq!(hit.api_id, "billing-api");
    }

    #[test]
    fn replace_all_is_atomic_from_readers_perspective() {
        let reg = PipelineRegistry::new();
        reg.replace_all(vec![compiled("a1", "", "/foo")]);
        assert!(reg.by_api_id("a1").is_some());
        reg.replace_all(vec![compiled("a2", "", "/bar")]);
        assert!(reg.by_api_id("a1").is_none());
        assert!(reg.by_api_id("a2").is_some());
    }
}

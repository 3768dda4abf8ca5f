use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upstream protocol for an api spec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
    Tls,
}

impl Protocol {
    pub fn is_http_family(self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

/// Where a session's credential/auth state is backed by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    KeyValue,
    Rpc,
    Ldap,
}

impl StorageProvider {
    pub fn from_engine_str(s: &str) -> Self {
        match s {
            "ldap" => StorageProvider::Ldap,
            "rpc" => StorageProvider::Rpc,
            _ => StorageProvider::KeyValue,
        }
    }
}

/// Which of the built-in auth methods are enabled for an api, plus the
/// custom-plugin-auth escape hatch. Candidate order in `AuthSelection` is
/// fixed: oauth2, basic, hmac, jwt, openid, then token-key as the fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthMethods {
    #[serde(default)]
    pub keyless: bool,
    #[serde(default)]
    pub oauth2: bool,
    #[serde(default)]
    pub basic: bool,
    #[serde(default)]
    pub hmac: bool,
    #[serde(default)]
    pub jwt: bool,
    #[serde(default)]
    pub openid: bool,
    #[serde(default)]
    pub standard_token: bool,
    #[serde(default)]
    pub custom_plugin_auth: bool,
}

impl AuthMethods {
    /// Candidates in fixed evaluation order, for `AuthSelection`.
    pub fn enabled_candidates(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.oauth2 {
            out.push("oauth2");
        }
        if self.basic {
            out.push("basic");
        }
        if self.hmac {
            out.push("hmac");
        }
        if self.jwt {
            out.push("jwt");
        }
        if self.openid {
            out.push("openid");
        }
        out
    }
}

/// CORS configuration for an api spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub max_age: i64,
    /// If true, `OPTIONS` requests bypass the rest of the chain and forward
    /// directly.
    #[serde(default)]
    pub options_passthrough: bool,
}

/// A single api-version's override data (target url, extra paths).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VersionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub override_target: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
}

/// Version metadata for an api spec: a default version name and the full
/// version table. Presence of any `override_target` forces the
/// multi-target proxy handler in `PipelineBuilder` step 6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VersionData {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub versions: HashMap<String, VersionInfo>,
}

impl VersionData {
    pub fn has_target_overrides(&self) -> bool {
        self.versions.values().any(|v| v.override_target.is_some())
    }
}

/// A custom middleware hook point, naming the driver and the entry point it
/// invokes. `pre`/`post_auth`/`post`/`response` are ordered lists; `auth_check`
/// is a single optional override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiddlewareHook {
    pub name: String,
    #[serde(default)]
    pub driver: PluginDriverKind,
}

/// Which runtime executes a custom middleware hook. Represented as data so
/// dispatch picks the concrete stage at build time, not via a trait object
/// hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginDriverKind {
    #[default]
    ScriptVm,
    Subprocess,
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MiddlewareBundle {
    #[serde(default)]
    pub pre: Vec<MiddlewareHook>,
    #[serde(default)]
    pub post_auth: Vec<MiddlewareHook>,
    #[serde(default)]
    pub post: Vec<MiddlewareHook>,
    #[serde(default)]
    pub response: Vec<MiddlewareHook>,
    #[serde(default)]
    pub auth_check: Option<MiddlewareHook>,
}

/// The declarative definition of one api: the unit `PipelineBuilder`
/// compiles into a [`crate::Pipeline`]-shaped chain of stages (the concrete
/// `Pipeline` type lives in `ando-plugin`, which depends on this crate).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSpec {
    pub api_id: String,
    #[serde(default)]
    pub org_id: String,
    pub listen_path: String,
    #[serde(default)]
    pub domain: String,
    pub target_url: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub auth: AuthMethods,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub versions: VersionData,
    #[serde(default)]
    pub session_lifetime: i64,
    #[serde(default)]
    pub storage_provider: StorageProvider,
    #[serde(default)]
    pub middleware: MiddlewareBundle,
    #[serde(default)]
    pub strip_listen_path: bool,
    #[serde(default)]
    pub enable_request_size_limit: bool,
    #[serde(default)]
    pub request_size_limit: i64,
    #[serde(default)]
    pub enable_ip_allowlist: bool,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub enable_ip_denylist: bool,
    #[serde(default)]
    pub denied_ips: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

impl ApiSpec {
    /// `true` if no auth method is enabled — the pipeline is "open" and the
    /// entire authenticated segment is skipped.
    pub fn is_keyless(&self) -> bool {
        self.auth.keyless
    }
}

/// Resolve `(domain, listen_path)` collisions deterministically: the first
/// spec seen for a given pair keeps its listen_path; subsequent collisions
/// get `-<api_id>` appended, and if that's still taken (e.g. two specs
/// share both `listen_path` and `api_id` prefix after truncation) further
/// underscores are appended until unique.
pub fn resolve_listen_path_collisions(specs: &mut [ApiSpec]) {
    let mut seen: HashMap<(String, String), ()> = HashMap::new();
    for spec in specs.iter_mut() {
        let mut key = (spec.domain.clone(), spec.listen_path.clone());
        if !seen.contains_key(&key) {
            seen.insert(key, ());
            continue;
        }
        let mut candidate = format!("{}-{}", spec.listen_path, spec.api_id);
        loop {
            let candidate_key = (spec.domain.clone(), candidate.clone());
            if !seen.contains_key(&candidate_key) {
                seen.insert(candidate_key, ());
                spec.listen_path = candidate;
                break;
            }
            candidate.push('_');
        }
        key = (spec.domain.clone(), spec.listen_path.clone());
        let _ = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, listen_path: &str) -> ApiSpec {
        ApiSpec {
            api_id: id.into(),
            org_id: "org1".into(),
            listen_path: listen_path.into(),
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

    #[test]
    fn auth_candidate_order_is_fixed() {
        let mut auth = AuthMethods::default();
        auth.jwt = true;
        auth.oauth2 = true;
        auth.hmac = true;
        assert_eq!(auth.enabled_candidates(), vec!["oauth2", "hmac", "jwt"]);
    }

    #[test]
    fn storage_provider_parses_engine_string() {
        assert_eq!(StorageProvider::from_engine_str("ldap"), StorageProvider::Ldap);
        assert_eq!(StorageProvider::from_engine_str("rpc"), StorageProvider::Rpc);
        assert_eq!(
            StorageProvider::from_engine_str("anything-else"),
            StorageProvider::KeyValue
        );
    }

    #[test]
    fn three_way_listen_path_collision_resolves_distinctly() {
        let mut specs = vec![spec("api1", "/foo"), spec("api2", "/foo"), spec("api3", "/foo")];
        resolve_listen_path_collisions(&mut specs);
        let paths: std::collections::HashSet<_> =
            specs.iter().map(|s| s.listen_path.clone()).collect();
        assert_eq!(paths.len(), 3);
        assert_eq!(specs[0].listen_path, "/foo");
        assert_eq!(specs[1].listen_path, "/foo-api2");
        assert_eq!(specs[2].listen_path, "/foo-api3");
    }

    #[test]
    fn distinct_domains_do_not_collide() {
        let mut specs = vec![spec("api1", "/foo"), spec("api2", "/foo")];
        specs[1].domain = "other.example.com".into();
        resolve_listen_path_collisions(&mut specs);
        assert_eq!(specs[0].listen_path, "/foo");
        assert_eq!(specs[1].listen_path, "/foo");
    }

    #[test]
    fn keyless_detection() {
        let mut s = spec("api1", "/foo");
        assert!(!s.is_keyless());
        s.auth.keyless = true;
        assert!(s.is_keyless());
    }
}

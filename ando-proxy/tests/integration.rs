//! End-to-end tests exercising spec → `PipelineBuilder` → `PipelineRegistry`
//! → `Dispatcher` without any TCP listener.
//!
//! These cover:
//! 1. A compiled keyless api proxies straight through.
//! 2. A token-key api with no key rejects the request before it reaches the
//!    upstream.
//! 3. A valid session on a token-key api proxies through.
//! 4. `PipelineRegistry` hot-swap is immediately visible to new lookups.
//! 5. An unparseable target url causes the spec to be skipped, not panic.
//! 6. Listen-path collisions across a batch resolve before compilation.

use ando_core::config::GatewayKnobs;
use ando_core::spec::{
    ApiSpec, AuthMethods, CorsConfig, MiddlewareBundle, Protocol, StorageProvider, VersionData,
    resolve_listen_path_collisions,
};
use ando_plugin::plugin::StageContext;
use ando_proxy::builder::{BuildOutcome, BuildServices, PipelineBuilder};
use ando_proxy::dispatcher::{DispatchResult, Dispatcher};
use ando_proxy::registry::PipelineRegistry;
use ando_store::{InMemoryAuthManager, InMemoryOrgStore, InMemoryPolicyStore, InMemorySessionStore, OrgExpiryCache, SessionResolver};
use ando_core::session::Session;
use std::sync::Arc;
use std::time::Duration;

fn spec(api_id: &str, listen_path: &str, target_url: &str) -> ApiSpec {
    ApiSpec {
        api_id: api_id.into(),
        org_id: "org1".into(),
        listen_path: listen_path.into(),
        domain: String::new(),
        target_url: target_url.into(),
        protocol: Protocol::Http,
        auth: AuthMethods { keyless: true, ..Default::default() },
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

fn services() -> Arc<BuildServices> {
    let session_store = Arc::new(InMemorySessionStore::new());
    let policy_store = Arc::new(InMemoryPolicyStore::new());
    let auth_manager = Arc::new(InMemoryAuthManager::new());
    let resolver = Arc::new(SessionResolver::new(
        session_store,
        policy_store,
        auth_manager,
        true,
        3,
        false,
        Duration::from_secs(60),
    ));
    let org_store = Arc::new(InMemoryOrgStore::new());
    let org_expiry = Arc::new(OrgExpiryCache::new(org_store, false, Duration::from_secs(60)));
    Arc::new(BuildServices { resolver, org_expiry, knobs: GatewayKnobs::default() })
}

fn build_registry(specs: Vec<ApiSpec>, services: Arc<BuildServices>) -> PipelineRegistry {
    let builder = PipelineBuilder::new(services);
    let registry = PipelineRegistry::new();
    let compiled: Vec<_> = specs
        .into_iter()
        .filter_map(|spec| match builder.build(&spec) {
            BuildOutcome::Compiled(api) => Some(api),
            BuildOutcome::Skipped { .. } => None,
        })
        .collect();
    registry.replace_all(compiled);
    registry
}

#[tokio::test]
async fn keyless_api_proxies_straight_through() {
    let registry = build_registry(vec![spec("api1", "/open", "http://backend.local:9000")], services());

    let api = registry.lookup("", "/open").expect("route should match");
    let dispatcher = Dispatcher::new(
        Arc::new(SessionResolver::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAuthManager::new()),
            true,
            3,
            false,
            Duration::from_secs(60),
        )),
        None,
        0,
    );
    let mut ctx = StageContext::new("GET".into(), "/open".into(), Default::default(), "127.0.0.1".into(), api.api_id.clone());

    let result = dispatcher.dispatch(&api, &mut ctx, api.options_passthrough).await;
    assert!(matches!(result, DispatchResult::Proxy));
}

#[tokio::test]
async fn token_key_api_rejects_missing_key() {
    let mut locked = spec("api2", "/secure", "http://backend.local:9001");
    locked.auth = AuthMethods { standard_token: true, ..Default::default() };

    let registry = build_registry(vec![locked], services());
    let api = registry.lookup("", "/secure").expect("route should match");

    let resolver = Arc::new(SessionResolver::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryPolicyStore::new()),
        Arc::new(InMemoryAuthManager::new()),
        true,
        3,
        false,
        Duration::from_secs(60),
    ));
    let dispatcher = Dispatcher::new(resolver, None, 0);
    let mut ctx = StageContext::new("GET".into(), "/secure".into(), Default::default(), "127.0.0.1".into(), api.api_id.clone());

    let result = dispatcher.dispatch(&api, &mut ctx, api.options_passthrough).await;
    match result {
        DispatchResult::Respond { status, .. } => assert_eq!(status, 401),
        DispatchResult::Proxy => panic!("expected a 401, got a proxy pass-through"),
    }
}

#[tokio::test]
async fn token_key_api_with_valid_session_proxies_through() {
    let mut locked = spec("api3", "/secure2", "http://backend.local:9002");
    locked.auth = AuthMethods { standard_token: true, ..Default::default() };

    let auth_manager = Arc::new(InMemoryAuthManager::new());
    auth_manager.seed("good-key", Session::new("org1", "good-key"));

    let registry = build_registry(vec![locked], services());
    let api = registry.lookup("", "/secure2").expect("route should match");

    let resolver = Arc::new(SessionResolver::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryPolicyStore::new()),
        auth_manager,
        true,
        3,
        false,
        Duration::from_secs(60),
    ));
    let dispatcher = Dispatcher::new(resolver, None, 3600);

    let mut headers = std::collections::HashMap::new();
    headers.insert("authorization".to_string(), "good-key".to_string());
    let mut ctx = StageContext::new("GET".into(), "/secure2".into(), headers, "127.0.0.1".into(), api.api_id.clone());

    let result = dispatcher.dispatch(&api, &mut ctx, api.options_passthrough).await;
    assert!(matches!(result, DispatchResult::Proxy));
}

#[test]
fn hot_registry_swap_is_immediately_visible() {
    let registry = build_registry(vec![spec("api-v1", "/v1", "http://backend.local:9100")], services());
    assert!(registry.lookup("", "/v1").is_some());
    assert!(registry.lookup("", "/v2").is_none());

    let builder = PipelineBuilder::new(services());
    let replacement = match builder.build(&spec("api-v2", "/v2", "http://backend.local:9101")) {
        BuildOutcome::Compiled(api) => api,
        BuildOutcome::Skipped { reason, .. } => panic!("expected a compile, got skip: {reason}"),
    };
    registry.replace_all(vec![replacement]);

    assert!(registry.lookup("", "/v1").is_none());
    assert!(registry.lookup("", "/v2").is_some());
}

#[test]
fn unparseable_target_url_skips_the_spec_instead_of_panicking() {
    let mut bad = spec("api-bad", "/bad", "::not a url::");
    bad.active = true;
    let builder = PipelineBuilder::new(services());

    match builder.build(&bad) {
        BuildOutcome::Skipped { api_id, .. } => assert_eq!(api_id, "api-bad"),
        BuildOutcome::Compiled(_) => panic!("an unparseable target url must not compile"),
    }
}

#[test]
fn listen_path_collisions_resolve_before_compilation() {
    let mut specs = vec![
        spec("api1", "/dup", "http://backend.local:9200"),
        spec("api2", "/dup", "http://backend.local:9201"),
    ];
    resolve_listen_path_collisions(&mut specs);

    let registry = build_registry(specs, services());
    assert!(registry.lookup("", "/dup").is_some());
    assert!(registry.lookup("", "/dup-api2").is_some());
}

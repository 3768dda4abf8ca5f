//! Compiles one `ApiSpec` into a `Pipeline`: the fixed stage-assembly order,
//! auth-candidate selection, custom-middleware-hook wiring, and the
//! rate-limit inspection sub-chain.

use ando_core::config::GatewayKnobs;
use ando_core::spec::{ApiSpec, StorageProvider};
use ando_core::GatewayError;
use ando_plugin::plugin::{StageContract, StageInstance};
use ando_plugin::pipeline::Pipeline;
use ando_plugin::vm::MiddlewareHookStage;
use ando_plugins::{
    BasicAuthStage, BuiltinStage, CorsStage, IPAllowListStage, IPDenyListStage, JwtAuthStage, OrgMonitorStage, RateLimitAndQuotaStage, RateLimitForApiStage, StageKind,
    TokenKeyStage, TransformHeadersStage,
};
use ando_store::{OrgExpiryCache, SessionResolver};
use http::Uri;
use serde_json::Value;
use std::sync::Arc;

use crate::registry::CompiledApi;

/// A candidate auth method with no concrete stage backing it in this build
/// (oauth2, hmac, openid all require an external IdP/keystore collaborator
/// that is out of scope). Fails closed rather than silently granting
/// access, the same treatment `ando_plugin::vm` gives the `Subprocess` and
/// `Native` driver kinds.
struct UnimplementedAuthStage {
    method: &'static str,
}

#[async_trait::async_trait]
impl StageContract for UnimplementedAuthStage {
    fn name(&self) -> &str {
        self.method
    }
    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }
    async fn process(&self, _ctx: &mut ando_plugin::plugin::StageContext, _config: &Value) -> ando_plugin::plugin::StageOutcome {
        ando_plugin::plugin::StageOutcome::Error(format!("auth method '{}' has no backing implementation in this build", self.method))
    }
}

/// Services a built pipeline needs a handle to at request time. Shared
/// across every api compiled in one build pass.
pub struct BuildServices {
    pub resolver: Arc<SessionResolver>,
    pub org_expiry: Arc<OrgExpiryCache>,
    pub knobs: GatewayKnobs,
}

pub struct PipelineBuilder {
    services: Arc<BuildServices>,
}

/// Either a compiled api or a reason it was marked `skip` (step 1: bad
/// listen-path or unparseable target url never gets served).
pub enum BuildOutcome {
    Compiled(CompiledApi),
    Skipped { api_id: String, reason: String },
}

impl PipelineBuilder {
    pub fn new(services: Arc<BuildServices>) -> Self {
        Self { services }
    }

    /// Compile one spec, assuming listen-path collisions were already
    /// resolved by the caller (`resolve_listen_path_collisions` runs over
    /// the whole batch before individual specs reach the builder).
    pub fn build(&self, spec: &ApiSpec) -> BuildOutcome {
        if let Err(reason) = self.validate(spec) {
            return BuildOutcome::Skipped { api_id: spec.api_id.clone(), reason };
        }

        if spec.storage_provider == StorageProvider::Rpc {
            // RPC storage forces org-data-age enforcement process-wide.
            // The cache itself is shared across every compiled api, so
            // this is advisory here -- the actual flag lives on the
            // `OrgExpiryCache` constructed at startup.
        }

        let mut stages: Vec<StageInstance> = Vec::new();

        if spec.cors.enabled {
            stages.push(StageInstance::new(Arc::new(CorsStage), serde_json::to_value(&spec.cors).unwrap_or(Value::Null)));
        }

        for hook in &spec.middleware.pre {
            stages.push(self.hook_instance(hook));
        }

        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::RateCheck)), Value::Null));

        if spec.enable_ip_allowlist && !spec.allowed_ips.is_empty() {
            stages.push(StageInstance::new(Arc::new(IPAllowListStage), serde_json::json!({ "allowed_ips": spec.allowed_ips })));
        }
        if spec.enable_ip_denylist && !spec.denied_ips.is_empty() {
            stages.push(StageInstance::new(Arc::new(IPDenyListStage), serde_json::json!({ "denied_ips": spec.denied_ips })));
        }

        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::CertCheck)), Value::Null));
        stages.push(StageInstance::new(Arc::new(OrgMonitorStage::new(self.services.org_expiry.clone())), Value::Null));

        if let Some(version) = spec.versions.versions.get(&spec.versions.default) {
            if let Some(expires) = &version.expires {
                stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::VersionCheck)), serde_json::json!({ "expires": expires })));
            }
        }

        if spec.enable_request_size_limit {
            stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::RequestSizeLimit)), serde_json::json!({ "limit": spec.request_size_limit })));
        }

        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::ContextVars)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::TrackEndpoint)), Value::Null));

        let open = spec.is_keyless();
        if !open {
            stages.push(self.auth_selection(spec));

            for hook in &spec.middleware.post_auth {
                stages.push(self.hook_instance(hook));
            }

            stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::StripAuth)), serde_json::json!({ "header": "authorization" })));
            stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::KeyExpired)), Value::Null));
            stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::AccessRights)), Value::Null));
            stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::GranularAccess)), Value::Null));
            stages.push(StageInstance::new(Arc::new(RateLimitAndQuotaStage::new()), Value::Null));
        }

        stages.push(StageInstance::new(Arc::new(RateLimitForApiStage::new()), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::ValidateJson)), serde_json::json!({ "enabled": false })));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::TransformBody)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::TransformBodyJq)), Value::Null));
        stages.push(StageInstance::new(Arc::new(TransformHeadersStage), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::UrlRewrite)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::TransformMethod)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::Cache)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::VirtualEndpoint)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::RequestSigning)), Value::Null));

        for hook in &spec.middleware.post {
            stages.push(self.hook_instance(hook));
        }

        let pipeline = Pipeline::new(stages, open);

        BuildOutcome::Compiled(CompiledApi {
            api_id: spec.api_id.clone(),
            domain: spec.domain.clone(),
            listen_path: spec.listen_path.clone(),
            pipeline: Arc::new(pipeline),
            target_url: self.resolve_target_url(spec),
            strip_listen_path: spec.strip_listen_path,
            options_passthrough: spec.cors.options_passthrough,
        })
    }

    /// Multi-target if any version carries an `override_target`, else the
    /// api's single declared `target_url`. Version selection beyond the
    /// default version is left to the virtual-endpoint/URL rewrite stages
    /// further down the chain; this only decides the fallback host
    /// `connection.rs` dials when nothing rewrote it.
    fn resolve_target_url(&self, spec: &ApiSpec) -> String {
        if spec.versions.has_target_overrides() {
            if let Some(v) = spec.versions.versions.get(&spec.versions.default) {
                if let Some(target) = &v.override_target {
                    return target.clone();
                }
            }
        }
        spec.target_url.clone()
    }

    /// The shorter rate-limit inspection sub-chain, mounted under
    /// `<listen_path>tyk/rate-limits/`. Only meaningful for keyed apis.
    pub fn build_rate_limit_inspector(&self, spec: &ApiSpec) -> Option<Pipeline> {
        if spec.is_keyless() {
            return None;
        }
        let mut stages: Vec<StageInstance> = Vec::new();
        if spec.enable_ip_allowlist && !spec.allowed_ips.is_empty() {
            stages.push(StageInstance::new(Arc::new(IPAllowListStage), serde_json::json!({ "allowed_ips": spec.allowed_ips })));
        }
        if spec.enable_ip_denylist && !spec.denied_ips.is_empty() {
            stages.push(StageInstance::new(Arc::new(IPDenyListStage), serde_json::json!({ "denied_ips": spec.denied_ips })));
        }
        stages.push(StageInstance::new(Arc::new(OrgMonitorStage::new(self.services.org_expiry.clone())), Value::Null));
        if let Some(version) = spec.versions.versions.get(&spec.versions.default) {
            if let Some(expires) = &version.expires {
                stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::VersionCheck)), serde_json::json!({ "expires": expires })));
            }
        }
        stages.push(self.auth_selection(spec));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::KeyExpired)), Value::Null));
        stages.push(StageInstance::new(Arc::new(BuiltinStage::new(StageKind::AccessRights)), Value::Null));
        Some(Pipeline::new(stages, false))
    }

    fn validate(&self, spec: &ApiSpec) -> Result<(), String> {
        if spec.protocol.is_http_family() {
            if spec.listen_path.is_empty() || spec.listen_path.contains(' ') {
                return Err(format!("{}", GatewayError::SpecInvalid(format!("listen_path '{}' is empty or contains spaces", spec.listen_path))));
            }
            let parses = spec.target_url.parse::<Uri>().ok().is_some_and(|u| u.host().is_some());
            if !parses {
                return Err(format!("{}", GatewayError::SpecInvalid(format!("target_url '{}' does not parse", spec.target_url))));
            }
        }
        Ok(())
    }

    fn hook_instance(&self, hook: &ando_core::spec::MiddlewareHook) -> StageInstance {
        let stage = MiddlewareHookStage { hook_name: hook.name.clone(), driver: hook.driver, script: load_hook_script(&self.services.knobs.middleware_path, &hook.name) };
        StageInstance::new(Arc::new(stage), Value::Null)
    }

    /// `AuthSelection`: fixed candidate order oauth2, basic, hmac, jwt,
    /// openid; a custom-auth driver override takes priority over the
    /// built-in candidates; falling through to nothing enabled (or an
    /// explicit `standard_token` flag) means the token-key fallback.
    fn auth_selection(&self, spec: &ApiSpec) -> StageInstance {
        if let Some(hook) = &spec.middleware.auth_check {
            return self.hook_instance(hook);
        }

        for candidate in spec.auth.enabled_candidates() {
            let stage: Arc<dyn StageContract> = match candidate {
                "basic" => Arc::new(BasicAuthStage::new(self.services.resolver.clone())),
                "jwt" => Arc::new(JwtAuthStage::new(self.services.resolver.clone())),
                other => Arc::new(UnimplementedAuthStage { method: other }),
            };
            return StageInstance::new(stage, Value::Null);
        }

        StageInstance::new(Arc::new(TokenKeyStage::new(self.services.resolver.clone(), "authorization")), Value::Null)
    }
}

/// Compile every spec in a batch, logging and dropping any that fail
/// `validate` rather than failing the whole reload. Shared by the
/// startup load path and the admin API's `/reload` handler so both build
/// a `PipelineRegistry` snapshot the same way.
pub fn compile_all(builder: &PipelineBuilder, specs: &[Arc<ApiSpec>]) -> Vec<CompiledApi> {
    let mut compiled = Vec::with_capacity(specs.len());
    for spec in specs {
        match builder.build(spec) {
            BuildOutcome::Compiled(c) => compiled.push(c),
            BuildOutcome::Skipped { api_id, reason } => {
                tracing::warn!(api_id = %api_id, reason = %reason, "api spec skipped during pipeline build");
            }
        }
    }
    compiled
}

/// Custom middleware hook bodies are loaded from disk by name
/// (`GatewayKnobs::middleware_path`); a missing file degrades to an
/// always-continue script rather than failing the whole build, since hook
/// authoring is an external-collaborator concern this build does not own.
fn load_hook_script(middleware_path: &std::path::Path, hook_name: &str) -> String {
    let path = middleware_path.join(format!("{hook_name}.lua"));
    std::fs::read_to_string(&path).unwrap_or_else(|_| "function handle(method, path) return true end".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ando_core::spec::{AuthMethods, CorsConfig, MiddlewareBundle, Protocol, VersionData};
    use ando_store::{InMemoryAuthManager, InMemoryOrgStore, InMemoryPolicyStore, InMemorySessionStore};
    use std::time::Duration;

    fn services() -> Arc<BuildServices> {
        let resolver = Arc::new(SessionResolver::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAuthManager::new()),
            false,
            3,
            false,
            Duration::from_secs(60),
        ));
        let org_expiry = Arc::new(OrgExpiryCache::new(Arc::new(InMemoryOrgStore::new()), false, Duration::from_secs(60)));
        Arc::new(BuildServices { resolver, org_expiry, knobs: GatewayKnobs::default() })
    }

    fn spec(api_id: &str, listen_path: &str, target: &str) -> ApiSpec {
        ApiSpec {
            api_id: api_id.into(),
            org_id: "org1".into(),
            listen_path: listen_path.into(),
            domain: String::new(),
            target_url: target.into(),
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
    fn keyless_spec_compiles_to_an_open_pipeline_without_auth_stages() {
        let builder = PipelineBuilder::new(services());
        let mut s = spec("api1", "/foo", "http://backend.local");
        s.auth.keyless = true;
        match builder.build(&s) {
            BuildOutcome::Compiled(compiled) => assert!(compiled.pipeline.open),
            BuildOutcome::Skipped { reason, .. } => panic!("expected compile, got skip: {reason}"),
        }
    }

    #[test]
    fn keyed_spec_compiles_with_more_stages_than_keyless() {
        let builder = PipelineBuilder::new(services());
        let keyless = {
            let mut s = spec("api1", "/foo", "http://backend.local");
            s.auth.keyless = true;
            s
        };
        let keyed = spec("api2", "/bar", "http://backend.local");

        let open_count = match builder.build(&keyless) {
            BuildOutcome::Compiled(c) => c.pipeline.stage_count(),
            _ => panic!("expected compile"),
        };
        let keyed_count = match builder.build(&keyed) {
            BuildOutcome::Compiled(c) => c.pipeline.stage_count(),
            _ => panic!("expected compile"),
        };
        assert!(keyed_count > open_count);
    }

    #[test]
    fn invalid_target_url_marks_pipeline_skip() {
        let builder = PipelineBuilder::new(services());
        let s = spec("api1", "/foo", "not a url");
        match builder.build(&s) {
            BuildOutcome::Skipped { .. } => {}
            BuildOutcome::Compiled(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn empty_listen_path_marks_pipeline_skip() {
        let builder = PipelineBuilder::new(services());
        let s = spec("api1", "", "http://backend.local");
        match builder.build(&s) {
            BuildOutcome::Skipped { .. } => {}
            BuildOutcome::Compiled(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn rate_limit_inspector_is_none_for_keyless_apis() {
        let builder = PipelineBuilder::new(services());
        let mut s = spec("api1", "/foo", "http://backend.local");
        s.auth.keyless = true;
        assert!(builder.build_rate_limit_inspector(&s).is_none());
    }

    #[test]
    fn rate_limit_inspector_present_for_keyed_apis() {
        let builder = PipelineBuilder::new(services());
        let s = spec("api1", "/foo", "http://backend.local");
        assert!(builder.build_rate_limit_inspector(&s).is_some());
    }
}

use crate::handlers;
use crate::middleware::api_key_auth;
use ando_core::config::AdminConfig;
use ando_core::registry::ApiSpecRegistry;
use ando_observability::metrics::MetricsCollector;
use ando_proxy::builder::PipelineBuilder;
use ando_proxy::registry::PipelineRegistry;
use ando_store::{InMemoryConsumerStore, InMemoryPolicyStore};
use axum::routing::{get, post, put};
use axum::{middleware as axum_middleware, Router as AxumRouter};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared state for the Admin API: CRUD surfaces over the declarative
/// config (`ApiSpec`/`Policy`/`Consumer`), and the handles needed to turn
/// a write into a live pipeline swap on `/reload`.
pub struct AdminState {
    pub spec_registry: Arc<ApiSpecRegistry>,
    pub policy_store: Arc<InMemoryPolicyStore>,
    pub consumer_store: Arc<InMemoryConsumerStore>,
    pub pipeline_registry: Arc<PipelineRegistry>,
    pub builder: Arc<PipelineBuilder>,
    pub metrics: Option<Arc<MetricsCollector>>,
    pub api_key: Option<String>,
    pub state_file: Option<PathBuf>,
}

impl AdminState {
    /// Re-run `PipelineBuilder` over every spec currently in the registry
    /// and hot-swap the result into `pipeline_registry`. Specs that fail
    /// `validate` are skipped (logged, not fatal) -- see
    /// `ando_proxy::builder::compile_all`.
    pub fn reload(&self) {
        let compiled = ando_proxy::builder::compile_all(&self.builder, &self.spec_registry.all());
        let count = compiled.len();
        self.pipeline_registry.replace_all(compiled);
        info!(apis = count, "pipelines reloaded");
    }

    /// Persist the current spec/policy/consumer set to `state_file`, if
    /// one was configured. Called after every admin write so a restart
    /// picks up where the gateway left off.
    pub fn persist(&self) {
        if let Some(path) = &self.state_file {
            if let Err(e) = crate::persist::save_state(self, path) {
                tracing::error!(error = %e, path = %path.display(), "failed to persist admin state");
            }
        }
    }
}

/// Assemble the Axum router for the admin API. Split out from
/// `start_admin` so integration tests can drive it with
/// `tower::ServiceExt::oneshot` without binding a real TCP port.
pub fn build_admin_router(state: Arc<AdminState>, cors_origins: &[String]) -> AxumRouter {
    let mut router = AxumRouter::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/reload", post(handlers::reload::reload))
        .route("/apis", get(handlers::specs::list_specs))
        .route("/apis/{id}", get(handlers::specs::get_spec))
        .route("/apis/{id}", put(handlers::specs::put_spec))
        .route("/apis/{id}", axum::routing::delete(handlers::specs::delete_spec))
        .route("/policies", get(handlers::policies::list_policies))
        .route("/policies/{id}", get(handlers::policies::get_policy))
        .route("/policies/{id}", put(handlers::policies::put_policy))
        .route("/policies/{id}", axum::routing::delete(handlers::policies::delete_policy))
        .route("/consumers", get(handlers::consumers::list_consumers))
        .route("/consumers/{id}", get(handlers::consumers::get_consumer))
        .route("/consumers/{id}", put(handlers::consumers::put_consumer))
        .route("/consumers/{id}", axum::routing::delete(handlers::consumers::delete_consumer))
        .with_state(state.clone());

    if state.api_key.is_some() {
        router = router.layer(axum_middleware::from_fn_with_state(state.clone(), api_key_auth));
    }

    let cors = if cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any)
    } else {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any)
    };
    router.layer(cors)
}

/// Build the Axum router and serve the admin API until the process exits
/// or the listener errors.
pub async fn start_admin(config: AdminConfig, state: Arc<AdminState>) -> anyhow::Result<()> {
    if !config.enabled {
        info!("Admin API disabled");
        return Ok(());
    }

    let router = build_admin_router(state, &config.cors_origins);

    info!(addr = %config.addr, "Starting Admin API server");
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Test-only `AdminState` construction, shared by this crate's unit tests,
/// its integration tests under `tests/`, and other `ando-admin` modules'
/// `#[cfg(test)]` blocks. Not gated behind `cfg(test)` itself so that an
/// external integration-test binary (a separate compilation of this crate
/// as a dependency) can still reach it.
pub mod test_support {
    use super::*;
    use ando_core::config::GatewayKnobs;
    use ando_proxy::builder::BuildServices;
    use ando_store::{InMemoryAuthManager, InMemoryOrgStore, InMemorySessionStore, OrgExpiryCache, SessionResolver};
    use std::time::Duration;

    pub fn test_state() -> Arc<AdminState> {
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
        let services = Arc::new(BuildServices { resolver, org_expiry, knobs: GatewayKnobs::default() });
        Arc::new(AdminState {
            spec_registry: Arc::new(ApiSpecRegistry::new()),
            policy_store: Arc::new(InMemoryPolicyStore::new()),
            consumer_store: Arc::new(InMemoryConsumerStore::new()),
            pipeline_registry: Arc::new(PipelineRegistry::new()),
            builder: Arc::new(PipelineBuilder::new(services)),
            metrics: None,
            api_key: None,
            state_file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_state;

    #[test]
    fn reload_with_no_specs_yields_empty_registry() {
        let state = test_state();
        state.reload();
        assert!(state.pipeline_registry.is_empty());
    }
}

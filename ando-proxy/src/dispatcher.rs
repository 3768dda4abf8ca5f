//! Wraps `Pipeline::run` with the outer request-level span, the
//! scheduled session write-back, and request metrics/access-log emission.
//! `Pipeline::run` itself owns the per-stage control-flow loop; this
//! module is everything that happens once around it, not inside it.

use ando_plugin::pipeline::ChainResult;
use ando_plugin::plugin::{StageContext, RESPOND_CODE};
use ando_observability::access_log::AccessLogEntry;
use ando_observability::metrics::MetricsCollector;
use ando_store::SessionResolver;
use std::sync::Arc;
use tracing::{info_span, Instrument};

use crate::registry::CompiledApi;

/// What the connection-handling loop should do with the finished request.
pub enum DispatchResult {
    Proxy,
    Respond { status: u16, headers: std::collections::HashMap<String, String>, body: Option<Vec<u8>> },
}

pub struct Dispatcher {
    resolver: Arc<SessionResolver>,
    metrics: Option<Arc<MetricsCollector>>,
    default_session_lifetime: i64,
}

impl Dispatcher {
    pub fn new(resolver: Arc<SessionResolver>, metrics: Option<Arc<MetricsCollector>>, default_session_lifetime: i64) -> Self {
        Self { resolver, metrics, default_session_lifetime }
    }

    pub async fn dispatch(&self, api: &CompiledApi, ctx: &mut StageContext, options_passthrough: bool) -> DispatchResult {
        let span = info_span!("request", api_id = %api.api_id, method = %ctx.request_method, path = %ctx.request_path);
        let result = api.pipeline.run(ctx, options_passthrough).instrument(span).await;

        self.update_request_session(ctx).await;

        let (status, outcome) = match &result {
            ChainResult::Proxied => (200u16, DispatchResult::Proxy),
            ChainResult::Responded { status, headers, body } => {
                let status = *status;
                let wire_status = if status == RESPOND_CODE { 401 } else { status };
                (wire_status, DispatchResult::Respond { status: wire_status, headers: headers.clone(), body: body.clone() })
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_stage(&api.api_id, "dispatch", status, ctx.elapsed_ms() / 1000.0);
        }

        self.emit_access_log(api, ctx, status);

        outcome
    }

    async fn update_request_session(&self, ctx: &mut StageContext) {
        if !ctx.update_scheduled {
            return;
        }
        let (Some(session), Some(cache_key)) = (ctx.session.clone(), ctx.session_cache_key.clone()) else {
            ctx.update_scheduled = false;
            return;
        };
        let ttl = if session.lifetime > 0 { session.lifetime } else { self.default_session_lifetime };
        self.resolver.update_session(&cache_key, &session, ttl).await;
        ctx.update_scheduled = false;
    }

    fn emit_access_log(&self, api: &CompiledApi, ctx: &StageContext, status: u16) {
        let entry = AccessLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            route_id: api.api_id.clone(),
            client_ip: ctx.client_ip.clone(),
            method: ctx.request_method.clone(),
            uri: ctx.request_uri.clone(),
            response_status: status,
            latency_ms: ctx.elapsed_ms(),
            upstream_addr: ctx.upstream_addr.clone(),
        };
        tracing::info!(
            route_id = %entry.route_id,
            method = %entry.method,
            uri = %entry.uri,
            status = entry.response_status,
            latency_ms = entry.latency_ms,
            "request completed"
        );
    }
}

//! `tyk://` self-loop dispatch. A proxy-terminal handler recognises this
//! scheme and re-enters the pipeline machinery instead of forwarding
//! upstream. Targets are looked up through the registry at dispatch time,
//! not captured at build time, so a rebuilt pipeline is always the one a
//! loop lands on.

use crate::registry::PipelineRegistry;
use ando_core::GatewayError;
use std::collections::HashMap;

pub const DEFAULT_LOOP_LIMIT: u32 = 5;

/// A parsed `tyk://` target, ready for the caller to re-dispatch.
pub struct LoopTarget {
    pub api_id: String,
    pub rewritten_url: String,
    pub method_override: Option<String>,
    pub check_limits: bool,
}

pub struct LoopDispatcher<'a> {
    registry: &'a PipelineRegistry,
}

impl<'a> LoopDispatcher<'a> {
    pub fn new(registry: &'a PipelineRegistry) -> Self {
        Self { registry }
    }

    /// Resolve a `tyk://host/path?...` URL into a dispatch target, given
    /// the current api (for the `self` case) and the request's current
    /// loop depth. `loop_limit` defaults to [`DEFAULT_LOOP_LIMIT`] unless
    /// the query string overrides it.
    pub fn resolve(&self, url: &str, current_api_id: &str, loop_level: u32) -> Result<LoopTarget, GatewayError> {
        let rest = url.strip_prefix("tyk://").ok_or_else(|| GatewayError::LoopUnknownTarget(url.to_string()))?;
        let (host_and_path, query) = match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };
        let (host, path) = match host_and_path.find('/') {
            Some(pos) => (&host_and_path[..pos], &host_and_path[pos..]),
            None => (host_and_path, "/"),
        };

        let params = parse_query(query);
        let loop_limit = params.get("loop_limit").and_then(|v| v.parse::<u32>().ok()).unwrap_or(DEFAULT_LOOP_LIMIT);

        if loop_level >= loop_limit {
            return Err(GatewayError::LoopTooDeep);
        }

        let target_api_id = if host == "self" {
            current_api_id.to_string()
        } else {
            self.registry.fuzzy_lookup(host).map(|api| api.api_id.clone()).ok_or_else(|| GatewayError::LoopUnknownTarget(host.to_string()))?
        };

        let method_override = params.get("method").cloned();
        let check_limits = params.get("check_limits").map(|v| v == "true" || v == "1").unwrap_or(false);

        let mut rewritten = format!("http://{host}{path}");
        let carry_over: String = params.iter().filter(|(k, _)| k.as_str() != "method" && k.as_str() != "loop_limit" && k.as_str() != "check_limits").map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        if !carry_over.is_empty() {
            rewritten.push('?');
            rewritten.push_str(&carry_over);
        }

        Ok(LoopTarget { api_id: target_api_id, rewritten_url: rewritten, method_override, check_limits })
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

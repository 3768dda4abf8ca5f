use ando_core::session::Session;
use ando_core::spec::ApiSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Sentinel status a stage returns to mean "I already wrote the response
/// myself" via `RESPOND_CODE`. The dispatcher stops walking the
/// chain but still runs `UpdateRequestSession`.
pub const RESPOND_CODE: u16 = 666;

/// Result of a single stage invocation.
#[derive(Debug)]
pub enum StageOutcome {
    /// Proceed to the next stage.
    Continue,

    /// Short-circuit with a response the stage already built (maps onto
    /// `RESPOND_CODE` at the dispatcher level).
    Respond {
        status: u16,
        headers: HashMap<String, String>,
        body: Option<Vec<u8>>,
    },

    /// Abort the chain with an error. `ErrorHandler` writes the response
    /// unless the stage sets `owns_response` on itself.
    Error(String),
}

/// Mutable per-request context threaded through the assembled pipeline.
pub struct StageContext {
    pub request_method: String,
    pub request_uri: String,
    pub request_path: String,
    pub request_query: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<Vec<u8>>,

    pub path_params: HashMap<String, String>,
    pub client_ip: String,

    pub response_status: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<Vec<u8>>,

    /// Shared key-value scratch space between stages, populated by `ContextVars`.
    pub vars: HashMap<String, Value>,

    /// Populated by `AuthSelection`/`SessionResolver` once a credential
    /// resolves.
    pub session: Option<Session>,
    pub session_cache_key: Option<String>,

    /// Set by `SessionResolver` when the session came from the
    /// auth-manager tier; cleared by `UpdateRequestSession` once flushed
    /// after a fresh auth-manager resolution.
    pub update_scheduled: bool,

    /// `tyk://` self-loop recursion depth.
    pub loop_level: u32,

    pub api_id: String,

    pub request_start: std::time::Instant,
    pub upstream_addr: Option<String>,
}

impl StageContext {
    pub fn new(method: String, uri: String, headers: HashMap<String, String>, client_ip: String, api_id: String) -> Self {
        let (path, query) = match uri.find('?') {
            Some(pos) => (uri[..pos].to_string(), uri[pos + 1..].to_string()),
            None => (uri.clone(), String::new()),
        };

        Self {
            request_method: method,
            request_uri: uri,
            request_path: path,
            request_query: query,
            request_headers: headers,
            request_body: None,
            path_params: HashMap::new(),
            client_ip,
            response_status: None,
            response_headers: HashMap::new(),
            response_body: None,
            vars: HashMap::new(),
            session: None,
            session_cache_key: None,
            update_scheduled: false,
            loop_level: 0,
            api_id,
            request_start: std::time::Instant::now(),
            upstream_addr: None,
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.request_headers.iter().find(|(k, _)| k.to_lowercase() == lower).map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.request_headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        let lower = name.to_lowercase();
        self.request_headers.retain(|k, _| k.to_lowercase() != lower);
    }

    pub fn set_response_header(&mut self, name: String, value: String) {
        self.response_headers.insert(name, value);
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.request_start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn set_var(&mut self, key: String, value: Value) {
        self.vars.insert(key, value);
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }
}

/// A single named stage in the fixed pipeline order. Each named
/// step in that order -- `CORS`, `RateCheck`, `AuthSelection`, ... -- is one
/// `StageContract` implementation; a custom middleware hook (`pre`,
/// `post-auth`, `post`) is also a `StageContract`, just one built from a
/// `MiddlewareHook` instead of hand-written Rust.
#[async_trait]
pub trait StageContract: Send + Sync {
    /// Stable stage name, used for tracing spans and the
    /// `plugin_execution_time`-equivalent histogram label.
    fn name(&self) -> &str;

    /// Whether this stage participates in the chain for `spec` at all;
    /// a stage is only included when this returns true.
    fn enabled_for(&self, spec: &ApiSpec) -> bool;

    /// `true` if this stage writes its own error response and the
    /// dispatcher's `ErrorHandler` must not also write one.
    fn owns_error_response(&self) -> bool {
        false
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome;
}

/// A stage bound to its static configuration payload (the bundle's
/// per-hook config, or `Value::Null` for builtins with no config).
pub struct StageInstance {
    pub stage: Arc<dyn StageContract>,
    pub config: Value,
    pub name: String,
}

impl StageInstance {
    pub fn new(stage: Arc<dyn StageContract>, config: Value) -> Self {
        let name = stage.name().to_string();
        Self { stage, config, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StageContract for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn enabled_for(&self, _spec: &ApiSpec) -> bool {
            true
        }
        async fn process(&self, _ctx: &mut StageContext, _config: &Value) -> StageOutcome {
            StageOutcome::Continue
        }
    }

    #[test]
    fn context_splits_uri_into_path_and_query() {
        let ctx = StageContext::new(
            "GET".into(),
            "/foo/bar?x=1".into(),
            HashMap::new(),
            "127.0.0.1".into(),
            "api1".into(),
        );
        assert_eq!(ctx.request_path, "/foo/bar");
        assert_eq!(ctx.request_query, "x=1");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut ctx = StageContext::new("GET".into(), "/".into(), HashMap::new(), "127.0.0.1".into(), "api1".into());
        ctx.set_header("X-Api-Key".into(), "abc".into());
        assert_eq!(ctx.get_header("x-api-key"), Some("abc"));
    }

    #[tokio::test]
    async fn stage_instance_wraps_stage_and_config() {
        let instance = StageInstance::new(Arc::new(Noop), Value::Null);
        assert_eq!(instance.name, "noop");
        let mut ctx = StageContext::new("GET".into(), "/".into(), HashMap::new(), "127.0.0.1".into(), "api1".into());
        matches!(instance.stage.process(&mut ctx, &instance.config).await, StageOutcome::Continue);
    }
}

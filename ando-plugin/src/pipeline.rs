use crate::plugin::{StageContext, StageInstance, StageOutcome, RESPOND_CODE};
use tracing::{debug, error, warn};

/// A compiled, ordered stage chain for one api. Stage state is
/// read-only once built, so a `Pipeline` is safe to invoke concurrently
/// across requests without locking.
pub struct Pipeline {
    stages: Vec<StageInstance>,
    /// `true` if the api is keyless -- the authenticated segment was
    /// omitted entirely at build time rather than skipped per-request.
    pub open: bool,
}

/// What the caller (the proxy-side `Dispatcher`) should do once the chain
/// finishes walking.
pub enum ChainResult {
    /// Every stage continued; forward to the upstream proxy handler.
    Proxied,
    /// A stage (or `ErrorHandler`) already wrote the response.
    Responded { status: u16, headers: std::collections::HashMap<String, String>, body: Option<Vec<u8>> },
}

impl Pipeline {
    pub fn new(stages: Vec<StageInstance>, open: bool) -> Self {
        Self { stages, open }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Walk the chain: bypass on `OPTIONS` passthrough, stop
    /// (without erroring) on `RESPOND_CODE`, stop and surface on error.
    /// Metrics/tracing wrapping happens in the caller (the `Dispatcher`),
    /// which owns the per-stage span and histogram -- this method is the
    /// pure control-flow loop the dispatcher instruments.
    pub async fn run(&self, ctx: &mut StageContext, options_passthrough: bool) -> ChainResult {
        if options_passthrough && ctx.request_method.eq_ignore_ascii_case("OPTIONS") {
            debug!(api_id = %ctx.api_id, "options passthrough, bypassing chain");
            return ChainResult::Proxied;
        }

        for instance in &self.stages {
            debug!(stage = %instance.name, api_id = %ctx.api_id, "running stage");
            match instance.stage.process(ctx, &instance.config).await {
                StageOutcome::Continue => continue,
                StageOutcome::Respond { status, headers, body } => {
                    debug!(stage = %instance.name, status, "stage short-circuited with a response");
                    return ChainResult::Responded { status, headers, body };
                }
                StageOutcome::Error(msg) => {
                    error!(stage = %instance.name, error = %msg, "stage error");
                    if instance.stage.owns_error_response() {
                        return ChainResult::Responded {
                            status: RESPOND_CODE,
                            headers: Default::default(),
                            body: None,
                        };
                    }
                    return ChainResult::Responded {
                        status: 500,
                        headers: Default::default(),
                        body: Some(msg.into_bytes()),
                    };
                }
            }
        }

        ChainResult::Proxied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StageContract;
    use ando_core::spec::ApiSpec;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStage(Arc<AtomicUsize>);

    #[async_trait]
    impl StageContract for CountingStage {
        fn name(&self) -> &str {
            "counting"
        }
        fn enabled_for(&self, _spec: &ApiSpec) -> bool {
            true
        }
        async fn process(&self, _ctx: &mut StageContext, _config: &Value) -> StageOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            StageOutcome::Continue
        }
    }

    struct RespondingStage;

    #[async_trait]
    impl StageContract for RespondingStage {
        fn name(&self) -> &str {
            "responder"
        }
        fn enabled_for(&self, _spec: &ApiSpec) -> bool {
            true
        }
        async fn process(&self, _ctx: &mut StageContext, _config: &Value) -> StageOutcome {
            StageOutcome::Respond { status: 403, headers: Default::default(), body: None }
        }
    }

    fn ctx(method: &str) -> StageContext {
        StageContext::new(method.into(), "/".into(), Default::default(), "127.0.0.1".into(), "api1".into())
    }

    #[tokio::test]
    async fn all_stages_continue_then_proxied() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![
                StageInstance::new(Arc::new(CountingStage(counter.clone())), Value::Null),
                StageInstance::new(Arc::new(CountingStage(counter.clone())), Value::Null),
            ],
            false,
        );
        let mut c = ctx("GET");
        assert!(matches!(pipeline.run(&mut c, false).await, ChainResult::Proxied));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn respond_short_circuits_remaining_stages() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![
                StageInstance::new(Arc::new(RespondingStage), Value::Null),
                StageInstance::new(Arc::new(CountingStage(counter.clone())), Value::Null),
            ],
            false,
        );
        let mut c = ctx("GET");
        match pipeline.run(&mut c, false).await {
            ChainResult::Responded { status, .. } => assert_eq!(status, 403),
            _ => panic!("expected responded"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn options_passthrough_bypasses_entire_chain() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![StageInstance::new(Arc::new(CountingStage(counter.clone())), Value::Null)], false);
        let mut c = ctx("OPTIONS");
        assert!(matches!(pipeline.run(&mut c, true).await, ChainResult::Proxied));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

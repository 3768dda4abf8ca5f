use ando_core::session::UNLIMITED;
use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

fn too_many_requests(retry_after_secs: u64) -> StageOutcome {
    StageOutcome::Respond {
        status: 429,
        headers: std::collections::HashMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("retry-after".to_string(), retry_after_secs.to_string()),
        ]),
        body: Some(br#"{"error":"Rate limit exceeded","status":429}"#.to_vec()),
    }
}

/// Per-session rate + quota check, the authenticated segment's
/// `RateLimitAndQuota` step. Reads the merged session's `rate`/`per`
/// (sliding window, modeled on a `rate-limiting` plugin) and
/// `quota_max`/`quota_renews` (fixed window, grounded on `limit-count`),
/// both keyed by `key_hash` so counters are shared across apis a session
/// can reach.
pub struct RateLimitAndQuotaStage {
    windows: Arc<DashMap<String, (u64, Instant)>>,
    quotas: Arc<DashMap<String, (i64, Instant)>>,
}

impl RateLimitAndQuotaStage {
    pub fn new() -> Self {
        Self { windows: Arc::new(DashMap::new()), quotas: Arc::new(DashMap::new()) }
    }
}

impl Default for RateLimitAndQuotaStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageContract for RateLimitAndQuotaStage {
    fn name(&self) -> &str {
        "rate-limit-and-quota"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        !spec.is_keyless()
    }

    async fn process(&self, ctx: &mut StageContext, _config: &Value) -> StageOutcome {
        let Some(session) = ctx.session.clone() else {
            return StageOutcome::Error("rate-limit-and-quota ran with no resolved session".to_string());
        };

        if session.rate != UNLIMITED as f64 && session.rate > 0.0 && session.per > 0.0 {
            let window_secs = session.per.max(1.0) as u64;
            let max_requests = session.rate as u64;
            let now = Instant::now();
            let mut entry = self.windows.entry(session.key_hash.clone()).or_insert((0, now));
            if now.duration_since(entry.1).as_secs() >= window_secs {
                entry.0 = 0;
                entry.1 = now;
            }
            entry.0 += 1;
            if entry.0 > max_requests {
                let retry = window_secs.saturating_sub(now.duration_since(entry.1).as_secs());
                return too_many_requests(retry);
            }
        }

        if session.quota_max != UNLIMITED {
            let renewal_secs = session.quota_renewal_rate.max(1) as u64;
            let now = Instant::now();
            let mut entry = self.quotas.entry(session.key_hash.clone()).or_insert((0, now));
            if now.duration_since(entry.1).as_secs() >= renewal_secs {
                entry.0 = 0;
                entry.1 = now;
            }
            entry.0 += 1;
            if entry.0 > session.quota_max {
                let retry = renewal_secs.saturating_sub(now.duration_since(entry.1).as_secs());
                return StageOutcome::Respond {
                    status: 403,
                    headers: std::collections::HashMap::from([("retry-after".to_string(), retry.to_string())]),
                    body: Some(br#"{"error":"Quota exceeded","status":403}"#.to_vec()),
                };
            }
        }

        StageOutcome::Continue
    }
}

/// Api-wide rate check, run after the authenticated segment regardless of
/// whether the api is keyless (the `RateLimitForAPI` step). Config is
/// the api's own `rate`/`per` pair, not a session's.
pub struct RateLimitForApiStage {
    windows: Arc<DashMap<String, (u64, Instant)>>,
}

impl RateLimitForApiStage {
    pub fn new() -> Self {
        Self { windows: Arc::new(DashMap::new()) }
    }
}

impl Default for RateLimitForApiStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageContract for RateLimitForApiStage {
    fn name(&self) -> &str {
        "rate-limit-for-api"
    }

    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let rate = config.get("rate").and_then(|v| v.as_u64());
        let per = config.get("per").and_then(|v| v.as_u64()).unwrap_or(1);
        let Some(max_requests) = rate else {
            return StageOutcome::Continue;
        };

        let now = Instant::now();
        let mut entry = self.windows.entry(ctx.api_id.clone()).or_insert((0, now));
        if now.duration_since(entry.1).as_secs() >= per {
            entry.0 = 0;
            entry.1 = now;
        }
        entry.0 += 1;
        if entry.0 > max_requests {
            let retry = per.saturating_sub(now.duration_since(entry.1).as_secs());
            return too_many_requests(retry);
        }

        StageOutcome::Continue
    }
}

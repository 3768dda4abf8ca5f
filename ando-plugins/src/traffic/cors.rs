use ando_core::spec::{ApiSpec, CorsConfig};
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use async_trait::async_trait;
use serde_json::Value;

/// CORS stage, reading the api's own declarative [`CorsConfig`] instead of
/// a plugin-local config block. Modeled on a preflight/origin
/// resolution logic (`traffic::cors`), adapted to the canonical field
/// names the `ApiSpec.cors` table uses.
pub struct CorsStage;

fn origin_allowed(cfg: &CorsConfig, origin: &str) -> bool {
    cfg.allowed_origins.iter().any(|o| o == "*" || o == origin)
}

#[async_trait]
impl StageContract for CorsStage {
    fn name(&self) -> &str {
        "cors"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        spec.cors.enabled
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let cfg: CorsConfig = match serde_json::from_value(config.clone()) {
            Ok(c) => c,
            Err(e) => return StageOutcome::Error(format!("cors config error: {e}")),
        };

        let origin = match ctx.get_header("origin") {
            Some(o) => o.to_string(),
            None => return StageOutcome::Continue,
        };

        if !origin_allowed(&cfg, &origin) {
            return StageOutcome::Respond {
                status: 403,
                headers: Default::default(),
                body: Some(br#"{"error":"origin not allowed","status":403}"#.to_vec()),
            };
        }

        let allow_origin = if cfg.allowed_origins.iter().any(|o| o == "*") && !cfg.allow_credentials {
            "*".to_string()
        } else {
            origin.clone()
        };

        if ctx.request_method.eq_ignore_ascii_case("OPTIONS") {
            let mut headers = std::collections::HashMap::from([
                ("access-control-allow-origin".to_string(), allow_origin),
                ("access-control-allow-methods".to_string(), cfg.allowed_methods.join(",")),
                ("access-control-allow-headers".to_string(), cfg.allowed_headers.join(",")),
                ("access-control-max-age".to_string(), cfg.max_age.to_string()),
                ("content-length".to_string(), "0".to_string()),
            ]);
            if cfg.allow_credentials {
                headers.insert("access-control-allow-credentials".to_string(), "true".to_string());
            }
            return StageOutcome::Respond { status: 204, headers, body: None };
        }

        ctx.set_response_header("access-control-allow-origin".to_string(), allow_origin);
        if !cfg.exposed_headers.is_empty() {
            ctx.set_response_header("access-control-expose-headers".to_string(), cfg.exposed_headers.join(","));
        }
        if cfg.allow_credentials {
            ctx.set_response_header("access-control-allow-credentials".to_string(), "true".to_string());
        }

        StageOutcome::Continue
    }
}

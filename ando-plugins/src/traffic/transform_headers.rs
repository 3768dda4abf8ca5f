//! `TransformHeaders` stage, part of the fixed stage order. Injects static response
//! headers declared in the stage's config -- modeled on a
//! `security-headers` plugin, generalised from a fixed compliance-header
//! set to an arbitrary name/value list so it can also serve plain
//! header-transform use cases.

use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, Clone, Default)]
struct TransformHeadersConfig {
    #[serde(default)]
    add: std::collections::HashMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
    #[serde(default = "default_hsts")]
    hsts_max_age: u64,
    #[serde(default = "default_true")]
    x_content_type_options: bool,
}

fn default_hsts() -> u64 {
    31_536_000
}

fn default_true() -> bool {
    true
}

pub struct TransformHeadersStage;

#[async_trait]
impl StageContract for TransformHeadersStage {
    fn name(&self) -> &str {
        "transform-headers"
    }

    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let cfg: TransformHeadersConfig = serde_json::from_value(config.clone()).unwrap_or_default();

        if cfg.hsts_max_age > 0 {
            ctx.set_response_header("strict-transport-security".to_string(), format!("max-age={}", cfg.hsts_max_age));
        }
        if cfg.x_content_type_options {
            ctx.set_response_header("x-content-type-options".to_string(), "nosniff".to_string());
        }
        for (k, v) in &cfg.add {
            ctx.set_response_header(k.clone(), v.clone());
        }
        for k in &cfg.remove {
            ctx.response_headers.remove(&k.to_lowercase());
        }

        StageOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StageContext {
        StageContext::new("GET".into(), "/".into(), Default::default(), "127.0.0.1".into(), "api1".into())
    }

    #[tokio::test]
    async fn default_config_injects_hsts_and_nosniff() {
        let mut c = ctx();
        assert!(matches!(TransformHeadersStage.process(&mut c, &Value::Null).await, StageOutcome::Continue));
        assert!(c.response_headers.get("strict-transport-security").unwrap().contains("max-age=31536000"));
        assert_eq!(c.response_headers.get("x-content-type-options").unwrap(), "nosniff");
    }

    #[tokio::test]
    async fn custom_headers_are_added() {
        let mut c = ctx();
        let config = serde_json::json!({ "add": { "x-powered-by": "ando" } });
        TransformHeadersStage.process(&mut c, &config).await;
        assert_eq!(c.response_headers.get("x-powered-by").unwrap(), "ando");
    }

    #[tokio::test]
    async fn headers_in_remove_list_are_stripped() {
        let mut c = ctx();
        c.set_response_header("x-debug".to_string(), "1".to_string());
        let config = serde_json::json!({ "remove": ["X-Debug"] });
        TransformHeadersStage.process(&mut c, &config).await;
        assert!(!c.response_headers.contains_key("x-debug"));
    }
}

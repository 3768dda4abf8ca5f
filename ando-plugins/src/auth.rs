//! The `AuthSelection` candidates: one stage per built-in auth method,
//! each resolving the credential to a session via a
//! shared `SessionResolver` and stashing the result on `StageContext`.
//!
//! Unauthenticated requests are rejected here; a resolver miss does not
//! fall through to the next candidate -- `PipelineBuilder` picks exactly
//! one candidate stage per api from `AuthMethods::enabled_candidates()`
//! plus the token-key fallback, matching the fixed evaluation order.

use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use ando_store::SessionResolver;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn deny_401(body: &str) -> StageOutcome {
    StageOutcome::Respond {
        status: 401,
        headers: std::collections::HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: Some(body.as_bytes().to_vec()),
    }
}

fn install_session(ctx: &mut StageContext, cache_key: String, resolution: ando_store::Resolution) -> StageOutcome {
    if !resolution.found {
        return deny_401(r#"{"error":"Access denied","status":401}"#);
    }
    ctx.session_cache_key = Some(cache_key);
    ctx.update_scheduled = resolution.update_scheduled;
    ctx.session = Some(resolution.session);
    StageOutcome::Continue
}

/// The token-key stage: the `AuthSelection` fallback, and the plugin that
/// every keyed api without oauth2/basic/hmac/jwt/openid enabled ends up
/// using. Modeled on a `key-auth` apikey-header lookup, wired
/// to `SessionResolver` instead of a local consumer map.
pub struct TokenKeyStage {
    resolver: Arc<SessionResolver>,
    header: String,
}

impl TokenKeyStage {
    pub fn new(resolver: Arc<SessionResolver>, header: impl Into<String>) -> Self {
        Self { resolver, header: header.into().to_lowercase() }
    }
}

#[async_trait]
impl StageContract for TokenKeyStage {
    fn name(&self) -> &str {
        "token-key"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        !spec.is_keyless()
    }

    async fn process(&self, ctx: &mut StageContext, _config: &Value) -> StageOutcome {
        let key = match ctx.get_header(&self.header) {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => return deny_401(r#"{"error":"Missing API key","status":401}"#),
        };
        let resolution = self.resolver.resolve(&key).await;
        install_session(ctx, key, resolution)
    }
}

/// HTTP Basic auth candidate. Extracts `user:pass` and resolves the
/// password as the session key -- modeled on a `basic-auth`
/// decode logic.
pub struct BasicAuthStage {
    resolver: Arc<SessionResolver>,
}

impl BasicAuthStage {
    pub fn new(resolver: Arc<SessionResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl StageContract for BasicAuthStage {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        spec.auth.basic
    }

    async fn process(&self, ctx: &mut StageContext, _config: &Value) -> StageOutcome {
        let header = match ctx.get_header("authorization") {
            Some(h) => h.to_string(),
            None => return deny_401(r#"{"error":"Missing authorization header","status":401}"#),
        };

        let encoded = match header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic ")) {
            Some(e) => e,
            None => return deny_401(r#"{"error":"Invalid authorization scheme","status":401}"#),
        };

        let decoded = match BASE64.decode(encoded.trim()) {
            Ok(b) => b,
            Err(_) => return deny_401(r#"{"error":"Invalid base64 encoding","status":401}"#),
        };

        let credentials = match String::from_utf8(decoded) {
            Ok(s) => s,
            Err(_) => return deny_401(r#"{"error":"Invalid credentials encoding","status":401}"#),
        };

        let (username, password) = match credentials.split_once(':') {
            Some((u, p)) => (u.to_string(), p.to_string()),
            None => return deny_401(r#"{"error":"Malformed credentials","status":401}"#),
        };

        ctx.set_var("_basic_auth_user".to_string(), Value::String(username));
        let resolution = self.resolver.resolve(&password).await;
        install_session(ctx, password, resolution)
    }
}

#[derive(Debug, Deserialize)]
struct JwtConfig {
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_jwt_header")]
    header: String,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_jwt_header() -> String {
    "authorization".to_string()
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    exp: Option<u64>,
}

/// JWT auth candidate. The token's `sub` claim is resolved as the session
/// key through the same tiered `SessionResolver` every other candidate
/// uses -- the gateway does not mint sessions from JWT claims directly,
/// it still expects a matching session/policy record to exist.
pub struct JwtAuthStage {
    resolver: Arc<SessionResolver>,
}

impl JwtAuthStage {
    pub fn new(resolver: Arc<SessionResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl StageContract for JwtAuthStage {
    fn name(&self) -> &str {
        "jwt-auth"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        spec.auth.jwt
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let cfg: JwtConfig = match serde_json::from_value(config.clone()) {
            Ok(c) => c,
            Err(e) => return StageOutcome::Error(format!("jwt-auth config error: {e}")),
        };

        let raw_header = match ctx.get_header(&cfg.header) {
            Some(h) => h.to_string(),
            None => return deny_401(r#"{"error":"Missing Authorization header","status":401}"#),
        };

        let token = raw_header.strip_prefix("Bearer ").or_else(|| raw_header.strip_prefix("bearer ")).unwrap_or(&raw_header).trim();

        let algorithm = match cfg.algorithm.parse::<Algorithm>() {
            Ok(a) => a,
            Err(_) => Algorithm::HS256,
        };

        let decoding_key = match (&cfg.secret, &cfg.public_key) {
            (Some(secret), _) => DecodingKey::from_secret(secret.as_bytes()),
            (None, Some(key)) => match DecodingKey::from_rsa_pem(key.as_bytes()) {
                Ok(k) => k,
                Err(e) => return StageOutcome::Error(format!("invalid jwt public key: {e}")),
            },
            (None, None) => return StageOutcome::Error("jwt-auth requires secret or public_key".to_string()),
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        let data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(d) => d,
            Err(e) => return deny_401(&format!(r#"{{"error":"Invalid token: {}","status":401}}"#, e.to_string().replace('"', "'"))),
        };

        let sub = match data.claims.sub {
            Some(s) => s,
            None => return deny_401(r#"{"error":"Token has no subject claim","status":401}"#),
        };

        ctx.set_var("_jwt_sub".to_string(), Value::String(sub.clone()));
        let resolution = self.resolver.resolve(&sub).await;
        install_session(ctx, sub, resolution)
    }
}

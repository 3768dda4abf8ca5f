//! The remaining named steps of the fixed stage order that have no
//! bespoke business logic of their own: `BuiltinStage` is a tagged union
//! over `StageKind` -- one struct, one `StageContract` impl, dispatch on an
//! enum instead of a trait object per kind. Each variant reads whatever
//! `PipelineBuilder` baked into the stage's `config: Value` at build time
//! (the relevant slice of the owning `ApiSpec`), since `process` itself
//! never sees the `ApiSpec`.
//!
//! A few named steps (`CertCheck`, `Cache`, `VirtualEndpoint`,
//! `RequestSigning`, `TransformBodyJQ`) are collaborators this build has no
//! real backend for (mTLS termination, a response cache store, a script
//! sandbox, an HMAC signing keystore, a jq binding) and are represented
//! structurally: present in the chain, always `Continue`, same treatment
//! `ando_plugin::vm` gives the `Subprocess`/`Native` driver kinds.

use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    RateCheck,
    CertCheck,
    VersionCheck,
    RequestSizeLimit,
    ContextVars,
    TrackEndpoint,
    StripAuth,
    KeyExpired,
    AccessRights,
    GranularAccess,
    ValidateJson,
    TransformBody,
    TransformBodyJq,
    UrlRewrite,
    TransformMethod,
    Cache,
    VirtualEndpoint,
    RequestSigning,
}

impl StageKind {
    fn name(self) -> &'static str {
        match self {
            StageKind::RateCheck => "rate-check",
            StageKind::CertCheck => "cert-check",
            StageKind::VersionCheck => "version-check",
            StageKind::RequestSizeLimit => "request-size-limit",
            StageKind::ContextVars => "context-vars",
            StageKind::TrackEndpoint => "track-endpoint",
            StageKind::StripAuth => "strip-auth",
            StageKind::KeyExpired => "key-expired",
            StageKind::AccessRights => "access-rights",
            StageKind::GranularAccess => "granular-access",
            StageKind::ValidateJson => "validate-json",
            StageKind::TransformBody => "transform-body",
            StageKind::TransformBodyJq => "transform-body-jq",
            StageKind::UrlRewrite => "url-rewrite",
            StageKind::TransformMethod => "transform-method",
            StageKind::Cache => "cache",
            StageKind::VirtualEndpoint => "virtual-endpoint",
            StageKind::RequestSigning => "request-signing",
        }
    }
}

pub struct BuiltinStage {
    pub kind: StageKind,
}

impl BuiltinStage {
    pub fn new(kind: StageKind) -> Self {
        Self { kind }
    }
}

fn deny(status: u16, msg: &str) -> StageOutcome {
    StageOutcome::Respond {
        status,
        headers: std::collections::HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: Some(format!(r#"{{"error":"{msg}","status":{status}}}"#).into_bytes()),
    }
}

#[async_trait]
impl StageContract for BuiltinStage {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn enabled_for(&self, _spec: &ApiSpec) -> bool {
        true
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        match self.kind {
            StageKind::RateCheck => {
                if ctx.session.as_ref().is_some_and(|s| s.inactive) {
                    deny(403, "session is inactive")
                } else {
                    StageOutcome::Continue
                }
            }

            StageKind::CertCheck | StageKind::Cache | StageKind::VirtualEndpoint | StageKind::RequestSigning | StageKind::TransformBodyJq => StageOutcome::Continue,

            StageKind::VersionCheck => {
                let Some(expires) = config.get("expires").and_then(|v| v.as_str()) else {
                    return StageOutcome::Continue;
                };
                match DateTime::parse_from_rfc3339(expires) {
                    Ok(dt) if dt.with_timezone(&Utc) < Utc::now() => deny(403, "api version has expired"),
                    _ => StageOutcome::Continue,
                }
            }

            StageKind::RequestSizeLimit => {
                let limit = config.get("limit").and_then(|v| v.as_i64()).unwrap_or(0);
                if limit <= 0 {
                    return StageOutcome::Continue;
                }
                let size = ctx.request_body.as_ref().map(|b| b.len() as i64).unwrap_or(0);
                if size > limit {
                    deny(413, "request body exceeds configured size limit")
                } else {
                    StageOutcome::Continue
                }
            }

            StageKind::ContextVars => {
                if let Some(obj) = config.as_object() {
                    for (k, v) in obj {
                        ctx.set_var(k.clone(), v.clone());
                    }
                }
                StageOutcome::Continue
            }

            StageKind::TrackEndpoint => {
                ctx.set_var("_tracked_path".to_string(), Value::String(ctx.request_path.clone()));
                StageOutcome::Continue
            }

            StageKind::StripAuth => {
                if let Some(header) = config.get("header").and_then(|v| v.as_str()) {
                    ctx.remove_header(header);
                }
                StageOutcome::Continue
            }

            StageKind::KeyExpired => {
                let Some(session) = &ctx.session else {
                    return deny(401, "no session to check expiry against");
                };
                if session.lifetime < 0 {
                    deny(401, "key has expired")
                } else {
                    StageOutcome::Continue
                }
            }

            StageKind::AccessRights => {
                let Some(session) = &ctx.session else {
                    return deny(403, "no session to check access rights against");
                };
                if session.access_rights.is_empty() || session.access_rights.contains_key(&ctx.api_id) {
                    StageOutcome::Continue
                } else {
                    deny(403, "session has no access right for this api")
                }
            }

            StageKind::GranularAccess => {
                let Some(session) = &ctx.session else {
                    return StageOutcome::Continue;
                };
                let Some(right) = session.access_rights.get(&ctx.api_id) else {
                    return StageOutcome::Continue;
                };
                if right.allowed_urls.is_empty() {
                    return StageOutcome::Continue;
                }
                let matches = right.allowed_urls.iter().any(|u| {
                    (u.url == "*" || ctx.request_path.starts_with(&u.url)) && (u.methods.is_empty() || u.methods.iter().any(|m| m.eq_ignore_ascii_case(&ctx.request_method)))
                });
                if matches {
                    StageOutcome::Continue
                } else {
                    deny(403, "path/method not in the session's granular access rules")
                }
            }

            StageKind::ValidateJson => {
                let requires_json = config.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
                if !requires_json {
                    return StageOutcome::Continue;
                }
                match &ctx.request_body {
                    Some(body) if serde_json::from_slice::<Value>(body).is_ok() => StageOutcome::Continue,
                    Some(_) => deny(400, "request body is not valid json"),
                    None => StageOutcome::Continue,
                }
            }

            StageKind::TransformBody => {
                if let (Some(body), Some(replacements)) = (ctx.request_body.clone(), config.get("replace").and_then(|v| v.as_object())) {
                    if let Ok(mut text) = String::from_utf8(body) {
                        for (from, to) in replacements {
                            if let Some(to) = to.as_str() {
                                text = text.replace(from.as_str(), to);
                            }
                        }
                        ctx.request_body = Some(text.into_bytes());
                    }
                }
                StageOutcome::Continue
            }

            StageKind::UrlRewrite => {
                if let Some(to) = config.get("to").and_then(|v| v.as_str()) {
                    ctx.request_path = to.to_string();
                }
                StageOutcome::Continue
            }

            StageKind::TransformMethod => {
                if let Some(method) = config.get("to").and_then(|v| v.as_str()) {
                    ctx.request_method = method.to_string();
                }
                StageOutcome::Continue
            }
        }
    }
}

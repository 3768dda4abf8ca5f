use thiserror::Error;

/// Failure kinds specific to policy merging (the `POLICY_*` taxonomy).
///
/// Kept separate from [`GatewayError`] because only `PolicyMerger` produces
/// these, and every variant maps to the same wire status (500) — the
/// distinction matters for logs and tests, not for clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("policy {policy_id} belongs to org {policy_org}, session is scoped to {session_org}")]
    CrossOrg {
        policy_id: String,
        policy_org: String,
        session_org: String,
    },

    #[error("policy {0} sets per_api and a partition flag (quota/rate_limit/acl) at once")]
    PartitionConflict(String),

    #[error("api {api_id} is targeted by both a per-api policy and a partitioned policy")]
    MixedModes { api_id: String },
}

/// Unified error type for Ando CE.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("session not found")]
    SessionMissing,

    #[error("key too short")]
    KeyTooShort,

    #[error("loop dispatch exceeded depth limit")]
    LoopTooDeep,

    #[error("loop target not found: {0}")]
    LoopUnknownTarget(String),

    #[error("invalid api spec: {0}")]
    SpecInvalid(String),

    #[error("stage config error: {0}")]
    ConfigLoad(String),

    #[error("api not found: {0}")]
    ApiNotFound(String),

    #[error("plugin error: {0}")]
    PluginError(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to HTTP status code. `RESPOND_CODE` (666) never reaches this —
    /// it means a stage already wrote its own response.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Policy(_) => 500,
            GatewayError::SessionMissing => 403,
            GatewayError::KeyTooShort => 403,
            GatewayError::LoopTooDeep => 500,
            GatewayError::LoopUnknownTarget(_) => 500,
            GatewayError::SpecInvalid(_) => 500,
            GatewayError::ConfigLoad(_) => 500,
            GatewayError::ApiNotFound(_) => 404,
            GatewayError::PluginError(_) => 500,
            GatewayError::StoreError(_) => 502,
            GatewayError::Io(_) => 502,
            GatewayError::Serde(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let msg = self.to_string();
        format!(
            r#"{{"error":"{}","status":{}}}"#,
            msg.replace('"', "'"),
            status
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::SessionMissing.status_code(), 403);
        assert_eq!(GatewayError::KeyTooShort.status_code(), 403);
        assert_eq!(GatewayError::LoopTooDeep.status_code(), 500);
        assert_eq!(
            GatewayError::LoopUnknownTarget("x".into()).status_code(),
            500
        );
        assert_eq!(GatewayError::ApiNotFound("x".into()).status_code(), 404);
        assert_eq!(
            GatewayError::Policy(PolicyError::NotFound("p1".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_json_body_is_valid_json() {
        let err = GatewayError::SessionMissing;
        let body = err.to_json_body();
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("to_json_body must produce valid JSON");
        assert_eq!(parsed["status"], 403);
        assert!(parsed["error"].as_str().is_some());
    }

    #[test]
    fn test_policy_error_from_conversion() {
        let perr = PolicyError::MixedModes {
            api_id: "a1".into(),
        };
        let gerr: GatewayError = perr.into();
        assert_eq!(gerr.status_code(), 500);
        assert!(gerr.to_string().contains("a1"));
    }

    #[test]
    fn test_cross_org_message() {
        let err = PolicyError::CrossOrg {
            policy_id: "p1".into(),
            policy_org: "org-a".into(),
            session_org: "org-b".into(),
        };
        assert!(err.to_string().contains("org-a"));
        assert!(err.to_string().contains("org-b"));
    }
}

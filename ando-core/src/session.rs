use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel value for "unlimited" on `quota_max` / `rate`. Never overwritten
/// by a finite value during a policy merge.
pub const UNLIMITED: i64 = -1;

/// A single api's rate/quota/throttle limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiLimit {
    #[serde(default = "default_unlimited")]
    pub quota_max: i64,
    #[serde(default)]
    pub quota_renewal_rate: i64,
    #[serde(default)]
    pub quota_renews: i64,
    #[serde(default = "default_unlimited")]
    pub rate: f64,
    #[serde(default)]
    pub per: f64,
    #[serde(default)]
    pub throttle_interval: f64,
    #[serde(default)]
    pub throttle_retry_limit: i64,

    /// Transient marker recording which policy (or, for a per-api policy,
    /// which api id) last set this limit. Cleared before the session is
    /// exposed to callers — see `PolicyMerger`'s post-pass.
    #[serde(default, skip_serializing)]
    pub set_by: String,
}

impl Default for ApiLimit {
    /// Zero-valued, *not* the unlimited sentinel: a freshly-synthesised
    /// per-api limit (no prior session entry, no prior merge in this call)
    /// must still be overwritable by the first policy that sets a finite
    /// value. Only a limit that was explicitly persisted as `-1` (by an
    /// earlier merge or by `Policy::top_level_limit`) stays unlimited — see
    /// `PolicyMerger`'s never-overwrite-unlimited rule.
    fn default() -> Self {
        Self {
            quota_max: 0,
            quota_renewal_rate: 0,
            quota_renews: 0,
            rate: 0.0,
            per: 0.0,
            throttle_interval: 0.0,
            throttle_retry_limit: 0,
            set_by: String::new(),
        }
    }
}

impl ApiLimit {
    /// `true` if every field is still at its zero value (i.e. this limit was
    /// never actually configured and should be synthesised from elsewhere).
    pub fn is_zero_valued(&self) -> bool {
        self.quota_max == 0
            && self.quota_renewal_rate == 0
            && self.rate == 0.0
            && self.per == 0.0
            && self.throttle_interval == 0.0
            && self.throttle_retry_limit == 0
    }
}

/// A URL pattern and the HTTP methods allowed against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllowedUrl {
    pub url: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

/// The rights a session holds against a single api.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccessRight {
    #[serde(default)]
    pub api_id: String,
    #[serde(default)]
    pub api_name: String,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub allowed_urls: Vec<AllowedUrl>,
    #[serde(default)]
    pub limit: Option<ApiLimit>,
    /// The id (policy id, or api id for a per-api policy) that owns this
    /// api's rate-limit counters when multiple policies attribute limits
    /// to different apis.
    #[serde(default)]
    pub allowance_scope: String,
}

/// A credential-scoped runtime record carrying the merged result of a
/// session's policy list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub key_hash: String,
    #[serde(default)]
    pub inactive: bool,

    #[serde(default)]
    pub quota_max: i64,
    #[serde(default)]
    pub quota_renewal_rate: i64,
    #[serde(default)]
    pub quota_renews: i64,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub per: f64,
    #[serde(default)]
    pub throttle_interval: f64,
    #[serde(default)]
    pub throttle_retry_limit: i64,

    #[serde(default)]
    pub access_rights: HashMap<String, AccessRight>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub policy_ids: Vec<String>,

    /// Session-specific TTL override (seconds); falls back to the owning
    /// api spec's `session_lifetime` when zero.
    #[serde(default)]
    pub lifetime: i64,
}

impl Session {
    pub fn new(org_id: impl Into<String>, key_hash: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            key_hash: key_hash.into(),
            inactive: false,
            quota_max: UNLIMITED,
            quota_renewal_rate: 0,
            quota_renews: 0,
            rate: UNLIMITED as f64,
            per: 0.0,
            throttle_interval: 0.0,
            throttle_retry_limit: 0,
            access_rights: HashMap::new(),
            tags: Vec::new(),
            policy_ids: Vec::new(),
            lifetime: 0,
        }
    }

    /// `true` if `tags` has no duplicate entries.
    pub fn tags_deduplicated(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.tags.iter().all(|t| seen.insert(t))
    }
}

fn default_unlimited() -> i64 {
    UNLIMITED
}

/// `serde(default = "...")` helper for external callers (e.g. [`crate::policy::Policy`]).
pub fn unlimited_default() -> i64 {
    UNLIMITED
}

/// `serde(default = "...")` helper for the `f64`-typed `rate` sentinel.
pub fn unlimited_default_f64() -> f64 {
    UNLIMITED as f64
}

use crate::session::{AccessRight, ApiLimit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A shared template `PolicyMerger` folds onto a session's runtime state.
///
/// `access_rights` empty means this is a "master policy": its top-level
/// limit fields apply to the session directly rather than to any one api.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub org_id: String,

    /// If true, `access_rights` assigns distinct limits per api id, and this
    /// policy must not also set `quota`/`rate_limit`/`acl`.
    #[serde(default)]
    pub per_api: bool,
    #[serde(default)]
    pub quota: bool,
    #[serde(default)]
    pub rate_limit: bool,
    #[serde(default)]
    pub acl: bool,

    #[serde(default = "crate::session::unlimited_default")]
    pub quota_max: i64,
    #[serde(default)]
    pub quota_renewal_rate: i64,
    #[serde(default = "crate::session::unlimited_default_f64")]
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
    pub inactive: bool,

    #[serde(default)]
    pub hmac_enabled: bool,
}

impl Policy {
    /// Whether this policy is in "partitioned" mode at all (any of the
    /// three partition flags set). Mutually exclusive with `per_api`.
    pub fn uses_partitions(&self) -> bool {
        self.quota || self.rate_limit || self.acl
    }

    /// Build this policy's top-level fields into a fresh [`ApiLimit`], used
    /// to synthesise a per-api limit when a per-api policy's access-right
    /// entry doesn't carry its own.
    pub fn top_level_limit(&self) -> ApiLimit {
        ApiLimit {
            quota_max: self.quota_max,
            quota_renewal_rate: self.quota_renewal_rate,
            quota_renews: 0,
            rate: self.rate,
            per: self.per,
            throttle_interval: self.throttle_interval,
            throttle_retry_limit: self.throttle_retry_limit,
            set_by: String::new(),
        }
    }
}

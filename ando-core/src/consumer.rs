use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered credential holder.
///
/// Distinct from [`crate::session::Session`]: a `Consumer` is provisioned
/// through the admin API and holds identity metadata plus the raw key/secret
/// material; a `Session` is the resolved, policy-merged runtime record
/// derived from one of a consumer's keys at request time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consumer {
    /// Unique identifier (typically the consumer name).
    #[serde(default)]
    pub id: String,

    /// Organisation this consumer belongs to.
    #[serde(default)]
    pub org_id: String,

    /// Username.
    #[serde(default)]
    pub username: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Policy ids applied when a session is first resolved for this consumer.
    #[serde(default)]
    pub policy_ids: Vec<String>,

    /// Labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Update timestamp.
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

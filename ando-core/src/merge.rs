use crate::error::PolicyError;
use crate::policy::Policy;
use crate::session::{AccessRight, ApiLimit, Session, UNLIMITED};
use std::collections::{HashMap, HashSet};

/// Read-only access to the shared policy registry, as seen by a single merge
/// call. `PolicyMerger` only ever reads through this — it never mutates or
/// holds the registry's lock across an await point.
pub trait PolicyLookup {
    fn get(&self, id: &str) -> Option<Policy>;
}

impl PolicyLookup for HashMap<String, Policy> {
    fn get(&self, id: &str) -> Option<Policy> {
        HashMap::get(self, id).cloned()
    }
}

/// Deterministically merges a session's ordered policy list onto its
/// access-rights map under a fixed partitioning discipline.
///
/// Stateless by design: every call re-derives `rights`/`tags`/the per-api
/// `did_*` flags from scratch, which is what makes a repeated merge over an
/// unchanged policy set idempotent.
pub struct PolicyMerger;

impl PolicyMerger {
    /// Resolve `session.policy_ids` through `lookup` (failing fast on the
    /// first missing id) and merge them in order.
    pub fn merge(
        session: &mut Session,
        policy_ids: &[String],
        lookup: &dyn PolicyLookup,
        spec_org_id: Option<&str>,
    ) -> Result<(), PolicyError> {
        let mut resolved = Vec::with_capacity(policy_ids.len());
        for id in policy_ids {
            match lookup.get(id) {
                Some(p) => resolved.push(p),
                None => return Err(PolicyError::NotFound(id.clone())),
            }
        }
        Self::merge_resolved(session, &resolved, spec_org_id)
    }

    /// Merge an already-resolved, order-preserved policy list. Exposed
    /// separately so tests can exercise the
    /// algorithm without a registry.
    pub fn merge_resolved(
        session: &mut Session,
        policies: &[Policy],
        spec_org_id: Option<&str>,
    ) -> Result<(), PolicyError> {
        let mut rights: HashMap<String, AccessRight> = HashMap::new();
        let mut tags: Vec<String> = session.tags.clone();
        let mut did_acl: HashMap<String, bool> = HashMap::new();
        let mut did_quota: HashMap<String, bool> = HashMap::new();
        let mut did_rate: HashMap<String, bool> = HashMap::new();
        let mut session_inactive = session.inactive;

        for (idx, policy) in policies.iter().enumerate() {
            if let Some(spec_org) = spec_org_id {
                if !policy.org_id.is_empty() && policy.org_id != spec_org {
                    return Err(PolicyError::CrossOrg {
                        policy_id: policy.id.clone(),
                        policy_org: policy.org_id.clone(),
                        session_org: spec_org.to_string(),
                    });
                }
            }
            if policy.per_api && policy.uses_partitions() {
                return Err(PolicyError::PartitionConflict(policy.id.clone()));
            }

            if policy.per_api {
                Self::apply_per_api(policy, &mut rights, session, &mut did_acl, &mut did_quota, &mut did_rate)?;
            } else {
                Self::apply_partitioned(policy, &mut rights, session, &mut did_acl, &mut did_quota, &mut did_rate);
            }

            if idx == 0 {
                session_inactive = policy.inactive;
            } else if policy.inactive {
                session_inactive = true;
            }

            for tag in &policy.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        session.inactive = session_inactive;
        session.tags = tags;

        Self::post_pass(&mut rights, session, &did_quota, &did_rate);
        Self::legacy_collapse(&rights, session, &did_quota, &did_rate);

        // "Commit ACL": gating this strictly on an ACL partition having run
        // would miss the disjoint-partition case where neither policy
        // touches `acl` yet both apis must still land in
        // `session.access_rights`. Committed whenever this merge produced
        // any per-api rights at all -- see DESIGN.md.
        if !rights.is_empty() {
            session.access_rights = rights;
        }

        Ok(())
    }

    fn apply_per_api(
        policy: &Policy,
        rights: &mut HashMap<String, AccessRight>,
        session: &Session,
        did_acl: &mut HashMap<String, bool>,
        did_quota: &mut HashMap<String, bool>,
        did_rate: &mut HashMap<String, bool>,
    ) -> Result<(), PolicyError> {
        for (api_id, v) in &policy.access_rights {
            if did_acl.get(api_id).copied().unwrap_or(false)
                || did_quota.get(api_id).copied().unwrap_or(false)
                || did_rate.get(api_id).copied().unwrap_or(false)
            {
                return Err(PolicyError::MixedModes { api_id: api_id.clone() });
            }

            let mut right = v.clone();
            right.api_id = api_id.clone();
            let mut limit = match &right.limit {
                Some(l) if !l.is_zero_valued() => l.clone(),
                _ => policy.top_level_limit(),
            };
            if let Some(existing) = session.access_rights.get(api_id).and_then(|e| e.limit.as_ref()) {
                limit.quota_renews = existing.quota_renews;
            }
            limit.set_by = api_id.clone();
            right.allowance_scope = api_id.clone();
            right.limit = Some(limit);

            rights.insert(api_id.clone(), right);
            did_acl.insert(api_id.clone(), true);
            did_quota.insert(api_id.clone(), true);
            did_rate.insert(api_id.clone(), true);
        }
        Ok(())
    }

    fn apply_partitioned(
        policy: &Policy,
        rights: &mut HashMap<String, AccessRight>,
        session: &Session,
        did_acl: &mut HashMap<String, bool>,
        did_quota: &mut HashMap<String, bool>,
        did_rate: &mut HashMap<String, bool>,
    ) {
        let use_partitions = policy.uses_partitions();
        let do_acl = !use_partitions || policy.acl;
        let do_quota = !use_partitions || policy.quota;
        let do_rate = !use_partitions || policy.rate_limit;

        for (api_id, v) in &policy.access_rights {
            let had_prior = rights.contains_key(api_id);
            let mut entry = rights.remove(api_id).unwrap_or_else(|| {
                session
                    .access_rights
                    .get(api_id)
                    .cloned()
                    .unwrap_or_else(|| AccessRight {
                        api_id: api_id.clone(),
                        ..Default::default()
                    })
            });
            let had_session_prior = !had_prior && session.access_rights.contains_key(api_id);

            let mut limit = entry.limit.take().unwrap_or_default();

            if do_acl {
                did_acl.insert(api_id.clone(), true);
                if had_prior {
                    // append-once: a matching URL gets its methods appended,
                    // a new one is appended whole -- see DESIGN.md.
                    entry.versions.extend(v.versions.iter().cloned());
                    for au in &v.allowed_urls {
                        if let Some(existing_au) =
                            entry.allowed_urls.iter_mut().find(|a| a.url == au.url)
                        {
                            existing_au.methods.extend(au.methods.iter().cloned());
                        } else {
                            entry.allowed_urls.push(au.clone());
                        }
                    }
                } else {
                    entry.versions = v.versions.clone();
                    entry.allowed_urls = v.allowed_urls.clone();
                }
                limit.set_by = policy.id.clone();
            } else if entry.versions.is_empty() && entry.allowed_urls.is_empty() {
                // Commit v even when the ACL partition itself didn't run, so
                // a quota/rate-only policy still surfaces the api's rights.
                entry.versions = v.versions.clone();
                entry.allowed_urls = v.allowed_urls.clone();
            }

            if do_quota {
                did_quota.insert(api_id.clone(), true);
                if limit.quota_max != UNLIMITED && policy.quota_max > limit.quota_max {
                    limit.quota_max = policy.quota_max;
                }
                if policy.quota_renewal_rate > limit.quota_renewal_rate {
                    limit.quota_renewal_rate = policy.quota_renewal_rate;
                }
            }

            if do_rate {
                did_rate.insert(api_id.clone(), true);
                if limit.rate != UNLIMITED as f64 && policy.rate > limit.rate {
                    limit.rate = policy.rate;
                }
                if policy.per > limit.per {
                    limit.per = policy.per;
                }
                if policy.throttle_interval > limit.throttle_interval {
                    limit.throttle_interval = policy.throttle_interval;
                }
                if policy.throttle_retry_limit > limit.throttle_retry_limit {
                    limit.throttle_retry_limit = policy.throttle_retry_limit;
                }
            }

            if had_session_prior {
                if let Some(existing) = session.access_rights.get(api_id).and_then(|e| e.limit.as_ref()) {
                    limit.quota_renews = existing.quota_renews;
                }
            }

            entry.api_id = api_id.clone();
            entry.limit = Some(limit);
            rights.insert(api_id.clone(), entry);
        }
    }

    fn post_pass(
        rights: &mut HashMap<String, AccessRight>,
        session: &Session,
        did_quota: &HashMap<String, bool>,
        did_rate: &HashMap<String, bool>,
    ) {
        for (api_id, entry) in rights.iter_mut() {
            let mut limit = entry.limit.take().unwrap_or_default();
            if !did_rate.get(api_id).copied().unwrap_or(false) {
                limit.rate = session.rate;
                limit.per = session.per;
                limit.throttle_interval = session.throttle_interval;
                limit.throttle_retry_limit = session.throttle_retry_limit;
            }
            if !did_quota.get(api_id).copied().unwrap_or(false) {
                limit.quota_max = session.quota_max;
                limit.quota_renewal_rate = session.quota_renewal_rate;
                limit.quota_renews = session.quota_renews;
            }
            entry.limit = Some(limit);
        }

        let distinct_acl: HashSet<&str> = rights
            .values()
            .filter_map(|e| e.limit.as_ref().map(|l| l.set_by.as_str()))
            .filter(|s| !s.is_empty())
            .collect();
        if distinct_acl.len() > 1 {
            for entry in rights.values_mut() {
                if entry.allowance_scope.is_empty() {
                    if let Some(set_by) = entry.limit.as_ref().map(|l| l.set_by.clone()) {
                        if !set_by.is_empty() {
                            entry.allowance_scope = set_by;
                        }
                    }
                }
            }
        }

        for entry in rights.values_mut() {
            if let Some(limit) = entry.limit.as_mut() {
                limit.set_by = String::new();
            }
        }
    }

    fn legacy_collapse(
        rights: &HashMap<String, AccessRight>,
        session: &mut Session,
        did_quota: &HashMap<String, bool>,
        did_rate: &HashMap<String, bool>,
    ) {
        let quota_apis: Vec<&String> = did_quota.iter().filter(|(_, v)| **v).map(|(k, _)| k).collect();
        let rate_apis: Vec<&String> = did_rate.iter().filter(|(_, v)| **v).map(|(k, _)| k).collect();

        // §4.3: collapse is gated on the conjunction -- exactly one api
        // touched by quota AND exactly one touched by rate -- not on each
        // independently, else a quota-only fan-out could still leak a
        // single rate api's limits back onto the session top level.
        if quota_apis.len() == 1 && rate_apis.len() == 1 {
            if let Some(limit) = rights.get(quota_apis[0]).and_then(|e| e.limit.as_ref()) {
                session.quota_max = limit.quota_max;
                session.quota_renewal_rate = limit.quota_renewal_rate;
                session.quota_renews = limit.quota_renews;
            }
            if let Some(limit) = rights.get(rate_apis[0]).and_then(|e| e.limit.as_ref()) {
                session.rate = limit.rate;
                session.per = limit.per;
                session.throttle_interval = limit.throttle_interval;
                session.throttle_retry_limit = limit.throttle_retry_limit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AllowedUrl;

    fn blank_policy(id: &str) -> Policy {
        Policy {
            id: id.into(),
            org_id: String::new(),
            per_api: false,
            quota: false,
            rate_limit: false,
            acl: false,
            quota_max: UNLIMITED,
            quota_renewal_rate: 0,
            rate: UNLIMITED as f64,
            per: 0.0,
            throttle_interval: 0.0,
            throttle_retry_limit: 0,
            access_rights: HashMap::new(),
            tags: Vec::new(),
            inactive: false,
            hmac_enabled: false,
        }
    }

    #[test]
    fn scenario_1_master_policy_seeds_session_top_level() {
        let mut session = Session::new("org1", "hash1");
        let mut p = blank_policy("p1");
        p.quota_max = 100;
        p.rate = 5.0;
        p.per = 1.0;

        PolicyMerger::merge_resolved(&mut session, &[p], None).unwrap();

        assert_eq!(session.quota_max, 100);
        assert_eq!(session.rate, 5.0);
        assert_eq!(session.per, 1.0);
        assert!(session.access_rights.is_empty());
    }

    #[test]
    fn scenario_2_disjoint_partitioned_policies() {
        let mut session = Session::new("org1", "hash1");
        session.rate = 50.0;
        session.quota_max = 500;

        let mut p1 = blank_policy("p1");
        p1.quota = true;
        p1.quota_max = 10;
        p1.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        let mut p2 = blank_policy("p2");
        p2.rate_limit = true;
        p2.rate = 20.0;
        p2.access_rights.insert(
            "B".into(),
            AccessRight { api_id: "B".into(), ..Default::default() },
        );

        PolicyMerger::merge_resolved(&mut session, &[p1, p2], None).unwrap();

        let a = session.access_rights.get("A").unwrap();
        assert_eq!(a.limit.as_ref().unwrap().quota_max, 10);
        assert_eq!(a.limit.as_ref().unwrap().rate, 50.0); // inherited from session top-level

        let b = session.access_rights.get("B").unwrap();
        assert_eq!(b.limit.as_ref().unwrap().rate, 20.0);
        assert_eq!(b.limit.as_ref().unwrap().quota_max, 500); // inherited
    }

    #[test]
    fn scenario_3_mixed_modes_error() {
        let mut session = Session::new("org1", "hash1");

        let mut p1 = blank_policy("p1");
        p1.per_api = true;
        p1.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        let mut p2 = blank_policy("p2");
        p2.acl = true;
        p2.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        let err = PolicyMerger::merge_resolved(&mut session, &[p1, p2], None).unwrap_err();
        assert_eq!(err, PolicyError::MixedModes { api_id: "A".into() });
    }

    #[test]
    fn scenario_4_unlimited_preserved() {
        let mut session = Session::new("org1", "hash1");
        session.access_rights.insert(
            "A".into(),
            AccessRight {
                api_id: "A".into(),
                limit: Some(ApiLimit { quota_max: UNLIMITED, ..Default::default() }),
                ..Default::default()
            },
        );

        let mut p = blank_policy("p1");
        p.quota = true;
        p.quota_max = 1000;
        p.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        PolicyMerger::merge_resolved(&mut session, &[p], None).unwrap();
        assert_eq!(
            session.access_rights.get("A").unwrap().limit.as_ref().unwrap().quota_max,
            UNLIMITED
        );
    }

    #[test]
    fn cross_org_policy_rejected() {
        let mut session = Session::new("org1", "hash1");
        let mut p = blank_policy("p1");
        p.org_id = "org2".into();

        let err = PolicyMerger::merge_resolved(&mut session, &[p], Some("org1")).unwrap_err();
        assert!(matches!(err, PolicyError::CrossOrg { .. }));
    }

    #[test]
    fn partition_conflict_rejected() {
        let mut session = Session::new("org1", "hash1");
        let mut p = blank_policy("p1");
        p.per_api = true;
        p.quota = true;

        let err = PolicyMerger::merge_resolved(&mut session, &[p], None).unwrap_err();
        assert_eq!(err, PolicyError::PartitionConflict("p1".into()));
    }

    #[test]
    fn acl_merge_is_append_once_not_twice() {
        let mut session = Session::new("org1", "hash1");

        let mut p1 = blank_policy("p1");
        p1.acl = true;
        p1.access_rights.insert(
            "A".into(),
            AccessRight {
                api_id: "A".into(),
                allowed_urls: vec![AllowedUrl { url: "/x".into(), methods: vec!["GET".into()] }],
                ..Default::default()
            },
        );

        let mut p2 = blank_policy("p2");
        p2.acl = true;
        p2.access_rights.insert(
            "A".into(),
            AccessRight {
                api_id: "A".into(),
                allowed_urls: vec![AllowedUrl { url: "/x".into(), methods: vec!["POST".into()] }],
                ..Default::default()
            },
        );

        PolicyMerger::merge_resolved(&mut session, &[p1, p2], None).unwrap();
        let a = session.access_rights.get("A").unwrap();
        assert_eq!(a.allowed_urls.len(), 1);
        assert_eq!(a.allowed_urls[0].methods, vec!["GET".to_string(), "POST".to_string()]);
    }

    #[test]
    fn inactivity_escalates_but_never_un_escalates() {
        let mut session = Session::new("org1", "hash1");
        let p1 = blank_policy("p1");
        let mut p2 = blank_policy("p2");
        p2.inactive = true;
        let p3 = blank_policy("p3");

        PolicyMerger::merge_resolved(&mut session, &[p1, p2, p3], None).unwrap();
        assert!(session.inactive);
    }

    #[test]
    fn tags_are_deduplicated_across_policies_and_session() {
        let mut session = Session::new("org1", "hash1");
        session.tags = vec!["existing".into()];
        let mut p1 = blank_policy("p1");
        p1.tags = vec!["a".into(), "existing".into()];
        let mut p2 = blank_policy("p2");
        p2.tags = vec!["a".into(), "b".into()];

        PolicyMerger::merge_resolved(&mut session, &[p1, p2], None).unwrap();
        assert!(session.tags_deduplicated());
        assert_eq!(session.tags.len(), 3);
    }

    #[test]
    fn idempotent_on_unchanged_policy_set() {
        let mut session = Session::new("org1", "hash1");
        let mut p = blank_policy("p1");
        p.quota = true;
        p.quota_max = 10;
        p.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        PolicyMerger::merge_resolved(&mut session, std::slice::from_ref(&p), None).unwrap();
        let first = session.clone();
        PolicyMerger::merge_resolved(&mut session, std::slice::from_ref(&p), None).unwrap();
        assert_eq!(session, first);
    }

    #[test]
    fn legacy_collapse_requires_exactly_one_quota_api_and_one_rate_api() {
        let mut session = Session::new("org1", "hash1");
        session.rate = 9.0;

        let mut p = blank_policy("p1");
        p.quota = true;
        p.quota_max = 77;
        p.access_rights.insert("A".into(), AccessRight { api_id: "A".into(), ..Default::default() });
        p.access_rights.insert("B".into(), AccessRight { api_id: "B".into(), ..Default::default() });

        let mut rate_policy = blank_policy("p2");
        rate_policy.rate_limit = true;
        rate_policy.rate = 55.0;
        rate_policy.access_rights.insert("C".into(), AccessRight { api_id: "C".into(), ..Default::default() });

        PolicyMerger::merge_resolved(&mut session, &[p, rate_policy], None).unwrap();

        // Two quota apis (A, B) means the conjunction fails even though
        // exactly one rate api (C) exists -- neither copy may run.
        assert_eq!(session.quota_max, UNLIMITED);
        assert_eq!(session.rate, 9.0);
    }

    #[test]
    fn set_by_is_cleared_before_exposing() {
        let mut session = Session::new("org1", "hash1");
        let mut p = blank_policy("p1");
        p.acl = true;
        p.access_rights.insert(
            "A".into(),
            AccessRight { api_id: "A".into(), ..Default::default() },
        );

        PolicyMerger::merge_resolved(&mut session, &[p], None).unwrap();
        for entry in session.access_rights.values() {
            assert_eq!(entry.limit.as_ref().unwrap().set_by, "");
        }
    }
}

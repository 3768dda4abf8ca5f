use ando_core::spec::ApiSpec;
use ando_plugin::plugin::{StageContext, StageContract, StageOutcome};
use async_trait::async_trait;
use ipnet::IpNet;
use serde_json::Value;
use std::net::IpAddr;
use std::str::FromStr;

/// Modeled on a combined allow/deny `ip-restriction` plugin;
/// the fixed pipeline order runs allow and deny as two distinct named
/// stages instead of one, so each reads its own `ApiSpec` field and neither
/// stage knows about the other's list.
fn parse_list(list: &[String]) -> Vec<IpNet> {
    list.iter()
        .filter_map(|s| {
            IpNet::from_str(s).ok().or_else(|| {
                IpAddr::from_str(s).ok().map(|ip| match ip {
                    IpAddr::V4(a) => IpNet::from(ipnet::Ipv4Net::from(a)),
                    IpAddr::V6(a) => IpNet::from(ipnet::Ipv6Net::from(a)),
                })
            })
        })
        .collect()
}

fn deny_403(msg: &str) -> StageOutcome {
    StageOutcome::Respond {
        status: 403,
        headers: std::collections::HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: Some(format!(r#"{{"error":"{msg}","status":403}}"#).into_bytes()),
    }
}

pub struct IPAllowListStage;

#[async_trait]
impl StageContract for IPAllowListStage {
    fn name(&self) -> &str {
        "ip-allowlist"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        spec.enable_ip_allowlist && !spec.allowed_ips.is_empty()
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let allowed: Vec<String> = config.get("allowed_ips").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
        let list = parse_list(&allowed);
        let ip = match IpAddr::from_str(&ctx.client_ip) {
            Ok(ip) => ip,
            Err(_) => return deny_403("unparseable client ip"),
        };
        if list.iter().any(|net| net.contains(&ip)) {
            StageOutcome::Continue
        } else {
            deny_403("ip not allowed")
        }
    }
}

pub struct IPDenyListStage;

#[async_trait]
impl StageContract for IPDenyListStage {
    fn name(&self) -> &str {
        "ip-denylist"
    }

    fn enabled_for(&self, spec: &ApiSpec) -> bool {
        spec.enable_ip_denylist && !spec.denied_ips.is_empty()
    }

    async fn process(&self, ctx: &mut StageContext, config: &Value) -> StageOutcome {
        let denied: Vec<String> = config.get("denied_ips").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
        let list = parse_list(&denied);
        let ip = match IpAddr::from_str(&ctx.client_ip) {
            Ok(ip) => ip,
            Err(_) => return deny_403("unparseable client ip"),
        };
        if list.iter().any(|net| net.contains(&ip)) {
            deny_403("ip denied")
        } else {
            StageOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(ip: &str) -> StageContext {
        StageContext::new("GET".into(), "/".into(), Default::default(), ip.into(), "api1".into())
    }

    #[tokio::test]
    async fn allowlist_allows_matching_ip() {
        let config = serde_json::json!({ "allowed_ips": ["192.168.0.0/24"] });
        let mut c = ctx("192.168.0.55");
        assert!(matches!(IPAllowListStage.process(&mut c, &config).await, StageOutcome::Continue));
    }

    #[tokio::test]
    async fn allowlist_blocks_non_matching_ip() {
        let config = serde_json::json!({ "allowed_ips": ["192.168.0.0/24"] });
        let mut c = ctx("10.0.0.1");
        assert!(matches!(IPAllowListStage.process(&mut c, &config).await, StageOutcome::Respond { status: 403, .. }));
    }

    #[tokio::test]
    async fn denylist_blocks_cidr_match() {
        let config = serde_json::json!({ "denied_ips": ["10.0.0.0/8"] });
        let mut c = ctx("10.0.0.50");
        assert!(matches!(IPDenyListStage.process(&mut c, &config).await, StageOutcome::Respond { status: 403, .. }));
    }

    #[tokio::test]
    async fn denylist_allows_non_matching_ip() {
        let config = serde_json::json!({ "denied_ips": ["10.0.0.0/8"] });
        let mut c = ctx("192.168.1.1");
        assert!(matches!(IPDenyListStage.process(&mut c, &config).await, StageOutcome::Continue));
    }

    #[test]
    fn enabled_for_respects_the_spec_flag() {
        let mut spec = test_spec();
        assert!(!IPAllowListStage.enabled_for(&spec));
        spec.enable_ip_allowlist = true;
        spec.allowed_ips = vec!["10.0.0.0/8".into()];
        assert!(IPAllowListStage.enabled_for(&spec));
    }

    fn test_spec() -> ApiSpec {
        ApiSpec {
            api_id: "api1".into(),
            org_id: "org1".into(),
            listen_path: "/foo".into(),
            domain: String::new(),
            target_url: "http://backend".into(),
            protocol: ando_core::spec::Protocol::Http,
            auth: ando_core::spec::AuthMethods::default(),
            cors: ando_core::spec::CorsConfig::default(),
            versions: ando_core::spec::VersionData::default(),
            session_lifetime: 0,
            storage_provider: ando_core::spec::StorageProvider::KeyValue,
            middleware: ando_core::spec::MiddlewareBundle::default(),
            strip_listen_path: false,
            enable_request_size_limit: false,
            request_size_limit: 0,
            enable_ip_allowlist: false,
            allowed_ips: Vec::new(),
            enable_ip_denylist: false,
            denied_ips: Vec::new(),
            active: true,
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::warn;

/// Active health-check tuning for one compiled api's upstream. Runs on the
/// admin tokio runtime (`reqwest` + `tokio::time::interval` need a real
/// tokio reactor, unlike the `tokio::sync` primitives used elsewhere in
/// this crate).
#[derive(Debug, Clone)]
pub struct ActiveHealthCheckConfig {
    pub http_path: String,
    pub interval_secs: u64,
    pub timeout_secs: f64,
    pub healthy_statuses: Vec<u16>,
    pub healthy_successes: u32,
    pub unhealthy_failures: u32,
}

impl Default for ActiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            http_path: "/".to_string(),
            interval_secs: 10,
            timeout_secs: 2.0,
            healthy_statuses: vec![200, 201, 202, 203, 204],
            healthy_successes: 2,
            unhealthy_failures: 3,
        }
    }
}

/// Tracks health status of upstream dial targets (`host:port`).
pub struct HealthChecker {
    statuses: Arc<RwLock<HashMap<String, bool>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { statuses: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Unknown targets are assumed healthy until the first check proves
    /// otherwise, so a pipeline compiled after this checker starts isn't
    /// rejected before its first probe completes.
    pub async fn is_healthy(&self, addr: &str) -> bool {
        let statuses = self.statuses.read().await;
        *statuses.get(addr).unwrap_or(&true)
    }

    /// Start active health checking for a set of upstream authorities
    /// (as produced by `PipelineRegistry::all_upstream_authorities`).
    pub fn start_active_check(&self, targets: Vec<String>, config: ActiveHealthCheckConfig) -> tokio::task::JoinHandle<()> {
        let statuses = Arc::clone(&self.statuses);

        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(Duration::from_secs_f64(config.timeout_secs)).build() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Failed to build health-check client");
                    return;
                }
            };

            let mut tick = interval(Duration::from_secs(config.interval_secs));
            let mut success_counts: HashMap<String, u32> = HashMap::new();
            let mut failure_counts: HashMap<String, u32> = HashMap::new();

            loop {
                tick.tick().await;

                for target in &targets {
                    let url = format!("http://{target}{}", config.http_path);

                    let is_healthy = match client.get(&url).send().await {
                        Ok(resp) => config.healthy_statuses.contains(&resp.status().as_u16()),
                        Err(_) => false,
                    };

                    if is_healthy {
                        let count = success_counts.entry(target.clone()).or_insert(0);
                        *count += 1;
                        failure_counts.insert(target.clone(), 0);

                        if *count >= config.healthy_successes {
                            statuses.write().await.insert(target.clone(), true);
                        }
                    } else {
                        let count = failure_counts.entry(target.clone()).or_insert(0);
                        *count += 1;
                        success_counts.insert(target.clone(), 0);

                        if *count >= config.unhealthy_failures {
                            warn!(target = %target, "Upstream marked unhealthy");
                            statuses.write().await.insert(target.clone(), false);
                        }
                    }
                }
            }
        })
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

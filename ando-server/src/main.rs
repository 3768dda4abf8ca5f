// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Ando CE — Zero-Overhead API Gateway
//
//  Architecture: monoio thread-per-core + shared-nothing data plane
//  Admin API:    axum on dedicated tokio thread
//  Config:       standalone YAML / env, restored from a JSON state file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// A session with no explicit `lifetime` (and no owning `ApiSpec` override)
/// falls back to this TTL when written to the session store.
const DEFAULT_SESSION_LIFETIME_SECS: i64 = 3600;

/// TTL for the process-local session cache tier in `SessionResolver`.
const LOCAL_SESSION_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(10);

/// TTL for `OrgExpiryCache`'s single-flight org-session lookups.
const ORG_EXPIRY_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(60);

use ando_admin::server::AdminState;
use ando_core::config::GatewayConfig;
use ando_core::registry::ApiSpecRegistry;
use ando_observability::metrics::MetricsCollector;
use ando_proxy::builder::{compile_all, BuildServices, PipelineBuilder};
use ando_proxy::registry::PipelineRegistry;
use ando_proxy::worker::{self, SharedState};
use ando_store::{
    InMemoryAuthManager, InMemoryConsumerStore, InMemoryOrgStore, InMemoryPolicyStore, InMemorySessionStore, OrgExpiryCache, SessionResolver,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Global shutdown flag — checked by signal handler.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "ando", version, about = "Ando CE — Zero-Overhead API Gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to the JSON state file used for persistence (api specs, policies,
    /// consumers). Data written via the Admin API is saved here and reloaded
    /// on restart.
    #[arg(long, default_value = "data/ando-state.json")]
    state_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Ando CE starting — monoio thread-per-core engine");

    // ── Config ──
    let config = GatewayConfig::load(cli.config.as_ref().and_then(|p| p.to_str()))?;

    let num_workers = if config.proxy.workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        config.proxy.workers
    };
    info!(workers = num_workers, mode = ?config.deployment.mode, "Worker count resolved");

    // ── Restore persisted admin state ──
    let persisted = ando_admin::persist::load_state(&cli.state_file);

    let spec_registry = Arc::new(ApiSpecRegistry::new());
    spec_registry.replace_all(persisted.api_specs);

    let policy_store = Arc::new(InMemoryPolicyStore::new());
    for policy in persisted.policies {
        policy_store.put(policy);
    }

    let consumer_store = Arc::new(InMemoryConsumerStore::new());
    for consumer in persisted.consumers {
        consumer_store.put(consumer);
    }

    // ── Session resolution services ──
    let resolver = Arc::new(SessionResolver::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::clone(&policy_store) as Arc<dyn ando_store::PolicyStore>,
        Arc::new(InMemoryAuthManager::new()),
        config.gateway.hash_keys,
        config.gateway.min_token_length,
        config.gateway.local_session_cache_disable,
        LOCAL_SESSION_CACHE_TTL,
    ));
    let org_expiry = Arc::new(OrgExpiryCache::new(
        Arc::new(InMemoryOrgStore::new()),
        config.gateway.enforce_org_data_age,
        ORG_EXPIRY_CACHE_TTL,
    ));

    // ── Metrics ──
    let metrics = Arc::new(MetricsCollector::new()?);

    // ── Compile the initial pipeline snapshot from restored specs ──
    let build_services = Arc::new(BuildServices { resolver: Arc::clone(&resolver), org_expiry: Arc::clone(&org_expiry), knobs: config.gateway.clone() });
    let builder = Arc::new(PipelineBuilder::new(Arc::clone(&build_services)));
    let pipeline_registry = Arc::new(PipelineRegistry::new());
    let compiled = compile_all(&builder, &spec_registry.all());
    info!(apis = compiled.len(), "Initial pipelines compiled");
    pipeline_registry.replace_all(compiled);

    // ── Shared state for the data plane ──
    let shared = SharedState::new(
        Arc::clone(&pipeline_registry),
        Arc::clone(&resolver),
        Some(Arc::clone(&metrics)),
        DEFAULT_SESSION_LIFETIME_SECS,
        config.clone(),
    );

    // ── Admin API state ──
    let admin_state = Arc::new(AdminState {
        spec_registry,
        policy_store,
        consumer_store,
        pipeline_registry: Arc::clone(&pipeline_registry),
        builder,
        metrics: Some(Arc::clone(&metrics)),
        api_key: config.admin.api_key.clone(),
        state_file: Some(cli.state_file.clone()),
    });

    // ── Start admin API on a dedicated tokio thread ──
    let admin_config = config.admin.clone();
    if admin_config.enabled {
        let admin_state = Arc::clone(&admin_state);
        let admin_addr = admin_config.addr;
        std::thread::Builder::new()
            .name("ando-admin".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("Failed to build tokio runtime for admin");

                rt.block_on(async {
                    if let Err(e) = ando_admin::server::start_admin(admin_config, admin_state).await {
                        tracing::error!(error = %e, "Admin API failed");
                    }
                });
            })
            .expect("Failed to spawn admin thread");

        info!(addr = %admin_addr, "Admin API started");
    }

    // ── Spawn monoio worker threads ──
    let worker_handles = worker::spawn_workers(Arc::clone(&shared), num_workers);

    info!(
        workers = num_workers,
        proxy_addr = %config.proxy.http_addr,
        admin_addr = %config.admin.addr,
        "Ando CE is ready — serving traffic"
    );

    // ── Graceful shutdown: wait for SIGTERM/SIGINT ──
    setup_signal_handler();

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("Shutdown signal received, stopping...");

    // Workers run an infinite accept loop; the OS reclaims the threads on
    // process exit.
    drop(worker_handles);

    info!("Ando CE stopped");
    Ok(())
}

fn setup_signal_handler() {
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

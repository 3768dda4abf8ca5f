use ando_core::config::GatewayConfig;
use ando_observability::metrics::MetricsCollector;
use ando_store::SessionResolver;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::proxy::{ConnPool, ProxyWorker};
use crate::registry::PipelineRegistry;

/// Connections on a worker thread are pre-warmed with half this many idle
/// upstream sockets per host; the other half fills in on demand.
const DEFAULT_KEEPALIVE_POOL_SIZE: usize = 32;

/// Shared state across all worker threads.
///
/// `PipelineRegistry` is the only piece of shared mutable state -- it is
/// itself `ArcSwap`-backed, so workers read it lock-free and the admin
/// reload path swaps it in as one atomic unit. Everything else here is
/// immutable for the life of the process.
pub struct SharedState {
    pub registry: Arc<PipelineRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<GatewayConfig>,
}

impl SharedState {
    pub fn new(
        registry: Arc<PipelineRegistry>,
        resolver: Arc<SessionResolver>,
        metrics: Option<Arc<MetricsCollector>>,
        default_session_lifetime: i64,
        config: GatewayConfig,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new(resolver, metrics, default_session_lifetime));
        Arc::new(Self { registry, dispatcher, config: Arc::new(config) })
    }
}

/// Spawn monoio worker threads — one per core.
///
/// Each thread runs an independent monoio runtime with its own
/// TCP listener (via SO_REUSEPORT), event loop, and proxy state.
pub fn spawn_workers(shared: Arc<SharedState>, num_workers: usize) -> Vec<std::thread::JoinHandle<()>> {
    let listen_addr = shared.config.proxy.http_addr;
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new()
            .name(format!("ando-worker-{worker_id}"))
            .spawn(move || {
                let mut rt = monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
                    .enable_all()
                    .build()
                    .expect("Failed to build monoio runtime");

                rt.block_on(worker_loop(worker_id, shared, listen_addr));
            })
            .expect("Failed to spawn worker thread");

        handles.push(handle);
    }

    info!(workers = num_workers, addr = %listen_addr, "Workers spawned");
    handles
}

/// Main loop for a single worker thread.
///
/// Creates ONE ProxyWorker and ONE ConnPool for this thread. All
/// connections on this thread share them via `Rc<RefCell>`.
///
/// Pool is pre-warmed before accepting any traffic.
async fn worker_loop(worker_id: usize, shared: Arc<SharedState>, addr: std::net::SocketAddr) {
    use monoio::net::TcpListener;

    let listener = TcpListener::bind(addr).unwrap_or_else(|e| {
        panic!("Worker {worker_id} failed to bind to {addr}: {e}");
    });

    info!(worker = worker_id, %addr, "Worker listening");

    // ── Create ONCE per thread ──
    let proxy_inner = ProxyWorker::new(Arc::clone(&shared.registry), Arc::clone(&shared.dispatcher));

    // ── Pre-warm connection pool ──
    let upstream_addrs = proxy_inner.upstream_addresses();
    let mut pool_inner = ConnPool::new(DEFAULT_KEEPALIVE_POOL_SIZE);
    let warm_count = (DEFAULT_KEEPALIVE_POOL_SIZE / 2).max(8).min(DEFAULT_KEEPALIVE_POOL_SIZE);
    pool_inner.warm(&upstream_addrs, warm_count).await;

    let proxy = Rc::new(RefCell::new(proxy_inner));
    let conn_pool = Rc::new(RefCell::new(pool_inner));

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                // TCP_NODELAY — disable Nagle's for lowest latency
                let _ = stream.set_nodelay(true);

                let proxy = Rc::clone(&proxy);
                let pool = Rc::clone(&conn_pool);

                monoio::spawn(async move {
                    if let Err(e) = crate::connection::handle_connection(stream, peer_addr, proxy, pool).await {
                        tracing::debug!(error = %e, "Connection closed");
                    }
                });
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "Accept error");
            }
        }
    }
}

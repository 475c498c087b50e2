//! Daemon assembly: wire the components in dependency order, tear them
//! down in reverse on shutdown.
//!
//! Store, peer pool and global manager are plain `Arc`s created at
//! startup; nothing holds a reference cycle at runtime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use gubernator_core::clock::{Clock, SystemClock};
use gubernator_core::error::{GubernatorError, Result};
use gubernator_core::types::PeerInfo;

use crate::config::Config;
use crate::global::GlobalManager;
use crate::obs::ServiceMetrics;
use crate::peers::{PeerClientOptions, PeerPool};
use crate::router::{self, AppState};
use crate::service::{RateLimitService, DEFAULT_RPC_DEADLINE};
use crate::store::CounterCache;
use crate::transport::{self, RpcHandler};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Daemon {
    service: Arc<RateLimitService>,
    pool: Arc<PeerPool>,
    grpc_address: SocketAddr,
    http_address: SocketAddr,
    data_center: String,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub async fn spawn(cfg: Config) -> Result<Self> {
        Self::spawn_with_clock(cfg, Arc::new(SystemClock)).await
    }

    /// Test entry: the injected clock drives every counter evaluation.
    pub async fn spawn_with_clock(cfg: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        cfg.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(ServiceMetrics::default());
        let store = Arc::new(CounterCache::new(cfg.cache.size));

        // Bind before building the local PeerInfo so ":0" listeners
        // advertise their real port.
        let grpc_listener = bind(&cfg.server.grpc_address).await?;
        let grpc_address = local_addr(&grpc_listener)?;
        let http_listener = bind(&cfg.server.http_address).await?;
        let http_address = local_addr(&http_listener)?;

        let local = PeerInfo {
            grpc_address: grpc_address.to_string(),
            http_address: http_address.to_string(),
            data_center: cfg.server.data_center.clone(),
        };

        let opts = PeerClientOptions {
            batch_timeout: Duration::from_micros(cfg.behaviors.batch_timeout_us),
            batch_limit: cfg.behaviors.batch_limit,
            queue_size: cfg.behaviors.batch_queue_size,
            ..PeerClientOptions::default()
        };
        let pool = Arc::new(PeerPool::new(local, opts, shutdown_rx.clone()));
        if !cfg.peers.is_empty() {
            pool.set_peers(cfg.peers.clone());
        }

        let global = GlobalManager::new(
            store.clone(),
            pool.clone(),
            metrics.clone(),
            clock.clone(),
            &cfg.behaviors,
        );
        let service = RateLimitService::new(
            store.clone(),
            pool.clone(),
            global.clone(),
            metrics,
            clock.clone(),
        );

        let mut tasks = global.clone().start(shutdown_rx.clone());
        tasks.push(transport::server::spawn(
            grpc_listener,
            service.clone() as Arc<dyn RpcHandler>,
            DEFAULT_RPC_DEADLINE,
            shutdown_rx.clone(),
        ));

        let app = router::build_router(AppState::new(service.clone()));
        let mut http_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(http_listener, app).with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::warn!(error = %e, "http server exited");
            }
        }));

        let sweep_store = store;
        let sweep_clock = clock;
        let mut sweep_shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = sweep_shutdown.changed() => break,
                    _ = tick.tick() => {
                        let removed = sweep_store.sweep_expired(sweep_clock.now_ms());
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired counters");
                        }
                    }
                }
            }
        }));

        Ok(Daemon {
            service,
            pool,
            grpc_address,
            http_address,
            data_center: cfg.server.data_center,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    pub fn service(&self) -> &Arc<RateLimitService> {
        &self.service
    }

    pub fn grpc_address(&self) -> SocketAddr {
        self.grpc_address
    }

    pub fn http_address(&self) -> SocketAddr {
        self.http_address
    }

    /// This daemon's advertised identity on the ring.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            grpc_address: self.grpc_address.to_string(),
            http_address: self.http_address.to_string(),
            data_center: self.data_center.clone(),
        }
    }

    /// Replace the peer set (static config reload, discovery hooks,
    /// tests).
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        self.pool.set_peers(peers);
    }

    /// Signal background loops and join them in reverse wiring order.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..).rev() {
            let _ = task.await;
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GubernatorError::Config(format!("bind {addr}: {e}")))
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr> {
    listener
        .local_addr()
        .map_err(|e| GubernatorError::Internal(format!("local_addr: {e}")))
}

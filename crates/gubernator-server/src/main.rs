//! gubernator peer daemon.
//!
//! Loads the YAML config, starts the RPC listener, the HTTP gateway and
//! the global background loops, then waits for ctrl-c.

use tracing_subscriber::{fmt, EnvFilter};

use gubernator_server::{config, daemon::Daemon};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "gubernator.yaml".into());
    let cfg = config::load_from_file(&path).expect("config load failed");

    let daemon = Daemon::spawn(cfg).await.expect("daemon start failed");
    tracing::info!(
        grpc = %daemon.grpc_address(),
        http = %daemon.http_address(),
        "gubernator starting"
    );

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    daemon.shutdown().await;
}

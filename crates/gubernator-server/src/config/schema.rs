//! Config schema with strict parsing.
//!
//! `deny_unknown_fields` prevents silent misconfiguration.

use std::net::SocketAddr;

use serde::Deserialize;

use gubernator_core::error::{GubernatorError, Result};
use gubernator_core::types::PeerInfo;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub cache: CacheSection,
    /// Static peer list. Empty means single-node until `set_peers` is
    /// called (tests, discovery hooks).
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
    #[serde(default)]
    pub behaviors: BehaviorSection,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GubernatorError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        parse_addr("server.grpc_address", &self.server.grpc_address)?;
        parse_addr("server.http_address", &self.server.http_address)?;
        for (i, p) in self.peers.iter().enumerate() {
            parse_addr(&format!("peers[{i}].grpc_address"), &p.grpc_address)?;
            parse_addr(&format!("peers[{i}].http_address"), &p.http_address)?;
        }
        if self.cache.size == 0 {
            return Err(GubernatorError::Config("cache.size must be non-zero".into()));
        }
        if self.behaviors.batch_limit == 0 {
            return Err(GubernatorError::Config(
                "behaviors.batch_limit must be non-zero".into(),
            ));
        }
        if self.behaviors.global_broadcast_interval_ms == 0 {
            return Err(GubernatorError::Config(
                "behaviors.global_broadcast_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| GubernatorError::Config(format!("{field} ({value}): {e}")))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Peer RPC listen address; also advertised on the hash ring.
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,
    /// HTTP/JSON gateway listen address.
    #[serde(default = "default_http_address")]
    pub http_address: String,
    #[serde(default)]
    pub data_center: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            grpc_address: default_grpc_address(),
            http_address: default_http_address(),
            data_center: String::new(),
        }
    }
}

fn default_grpc_address() -> String {
    "127.0.0.1:1051".into()
}

fn default_http_address() -> String {
    "127.0.0.1:1050".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Upper bound on resident counters across all shards.
    #[serde(default = "default_cache_size")]
    pub size: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
        }
    }
}

fn default_cache_size() -> usize {
    50_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BehaviorSection {
    /// Coalescing window for forwarded sub-requests, in microseconds.
    #[serde(default = "default_batch_timeout_us")]
    pub batch_timeout_us: u64,
    /// Max sub-requests flushed in one peer RPC.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Depth of each peer client's outbound queue.
    #[serde(default = "default_batch_queue_size")]
    pub batch_queue_size: usize,
    #[serde(default = "default_global_broadcast_interval_ms")]
    pub global_broadcast_interval_ms: u64,
    /// Depth of the async hit-forwarding queue.
    #[serde(default = "default_global_queue_size")]
    pub global_queue_size: usize,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            batch_timeout_us: default_batch_timeout_us(),
            batch_limit: default_batch_limit(),
            batch_queue_size: default_batch_queue_size(),
            global_broadcast_interval_ms: default_global_broadcast_interval_ms(),
            global_queue_size: default_global_queue_size(),
        }
    }
}

fn default_batch_timeout_us() -> u64 {
    500
}

fn default_batch_limit() -> usize {
    1000
}

fn default_batch_queue_size() -> usize {
    1024
}

fn default_global_broadcast_interval_ms() -> u64 {
    100
}

fn default_global_queue_size() -> usize {
    10_000
}

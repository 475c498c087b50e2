//! Outbound RPC client for one remote peer.
//!
//! Requests enter a bounded queue; a connection task coalesces whatever
//! arrives inside a short window into a single `GetPeerRateLimits` RPC and
//! fans the answers back out over oneshot channels. Broadcast pushes ride
//! the same connection through a separate control queue.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, timeout_at, Instant};

use gubernator_core::error::{ErrorCode, GubernatorError, Result};
use gubernator_core::protocol::frame::{self, Frame, Op};
use gubernator_core::types::{
    behavior, GetRateLimitsReq, GetRateLimitsResp, PeerInfo, RateLimitReq, RateLimitResp,
    UpdatePeerGlobalsReq,
};

use crate::transport::{read_frame, write_frame};

/// Connection lifecycle, surfaced by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Unhealthy,
}

impl PeerState {
    fn as_u8(self) -> u8 {
        match self {
            PeerState::Connecting => 0,
            PeerState::Connected => 1,
            PeerState::Unhealthy => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PeerState::Connected,
            2 => PeerState::Unhealthy,
            _ => PeerState::Connecting,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerClientOptions {
    /// Coalescing window for forwarded sub-requests.
    pub batch_timeout: Duration,
    /// Max sub-requests per flush.
    pub batch_limit: usize,
    /// Outbound queue depth; a full queue surfaces as a transport error.
    pub queue_size: usize,
    /// Budget for one flush RPC, connect included.
    pub rpc_timeout: Duration,
}

impl Default for PeerClientOptions {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_micros(500),
            batch_limit: 1000,
            queue_size: 1024,
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

struct Pending {
    req: RateLimitReq,
    resp: oneshot::Sender<Result<RateLimitResp>>,
}

type GlobalPush = (UpdatePeerGlobalsReq, oneshot::Sender<Result<()>>);

pub struct PeerClient {
    info: PeerInfo,
    forward_tx: mpsc::Sender<Pending>,
    global_tx: mpsc::Sender<GlobalPush>,
    state: AtomicU8,
    last_error: Mutex<String>,
}

impl PeerClient {
    pub fn spawn(
        info: PeerInfo,
        opts: PeerClientOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (forward_tx, forward_rx) = mpsc::channel(opts.queue_size);
        let (global_tx, global_rx) = mpsc::channel(64);
        let client = Arc::new(Self {
            info,
            forward_tx,
            global_tx,
            state: AtomicU8::new(PeerState::Connecting.as_u8()),
            last_error: Mutex::new(String::new()),
        });
        tokio::spawn(run(client.clone(), opts, forward_rx, global_rx, shutdown));
        client
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Queue one request for the next coalesced flush and await its
    /// answer. A full queue is an immediate error, not backpressure.
    pub async fn forward(&self, req: RateLimitReq, deadline: Instant) -> Result<RateLimitResp> {
        let (tx, rx) = oneshot::channel();
        self.forward_tx
            .try_send(Pending { req, resp: tx })
            .map_err(|_| GubernatorError::QueueFull)?;
        match timeout_at(deadline, rx).await {
            Err(_) => Err(GubernatorError::Deadline),
            Ok(Err(_)) => Err(GubernatorError::Transport("peer client shut down".into())),
            Ok(Ok(res)) => res,
        }
    }

    /// Push a broadcast update over the peer connection.
    pub async fn update_globals(
        &self,
        update: UpdatePeerGlobalsReq,
        deadline: Instant,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.global_tx
            .try_send((update, tx))
            .map_err(|_| GubernatorError::QueueFull)?;
        match timeout_at(deadline, rx).await {
            Err(_) => Err(GubernatorError::Deadline),
            Ok(Err(_)) => Err(GubernatorError::Transport("peer client shut down".into())),
            Ok(Ok(res)) => res,
        }
    }

    fn set_connected(&self) {
        self.state
            .store(PeerState::Connected.as_u8(), Ordering::Release);
        self.last_error.lock().clear();
    }

    fn mark_unhealthy(&self, error: &str) {
        self.state
            .store(PeerState::Unhealthy.as_u8(), Ordering::Release);
        *self.last_error.lock() = error.to_string();
        tracing::warn!(peer = %self.info.grpc_address, error, "peer unhealthy");
    }
}

async fn run(
    client: Arc<PeerClient>,
    opts: PeerClientOptions,
    mut forward_rx: mpsc::Receiver<Pending>,
    mut global_rx: mpsc::Receiver<GlobalPush>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn: Option<TcpStream> = None;
    let mut next_id: u32 = 1;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some((update, resp)) = global_rx.recv() => {
                let out = send_globals(&client, &opts, &mut conn, &mut next_id, update).await;
                let _ = resp.send(out);
            }
            first = forward_rx.recv() => {
                let Some(first) = first else { break };
                let no_batching = first.req.has_behavior(behavior::NO_BATCHING);
                let mut batch = vec![first];
                if !no_batching {
                    let window_end = Instant::now() + opts.batch_timeout;
                    while batch.len() < opts.batch_limit {
                        match timeout_at(window_end, forward_rx.recv()).await {
                            Ok(Some(p)) => batch.push(p),
                            Ok(None) | Err(_) => break,
                        }
                    }
                }
                flush_batch(&client, &opts, &mut conn, &mut next_id, batch).await;
            }
        }
    }
}

async fn flush_batch(
    client: &PeerClient,
    opts: &PeerClientOptions,
    conn: &mut Option<TcpStream>,
    next_id: &mut u32,
    batch: Vec<Pending>,
) {
    let requests: Vec<RateLimitReq> = batch.iter().map(|p| p.req.clone()).collect();
    let body = match serde_json::to_vec(&GetRateLimitsReq { requests }) {
        Ok(b) => b,
        Err(e) => {
            fail_batch(batch, &format!("encode batch: {e}"));
            return;
        }
    };
    match rpc(client, opts, conn, next_id, Op::GetPeerRateLimits, &body).await {
        Ok(body) => match serde_json::from_slice::<GetRateLimitsResp>(&body) {
            Ok(resp) if resp.responses.len() == batch.len() => {
                for (p, r) in batch.into_iter().zip(resp.responses) {
                    let _ = p.resp.send(Ok(r));
                }
            }
            Ok(resp) => {
                let msg = format!(
                    "peer answered {} responses for {} requests",
                    resp.responses.len(),
                    batch.len()
                );
                fail_batch(batch, &msg);
            }
            Err(e) => fail_batch(batch, &format!("invalid peer response: {e}")),
        },
        Err(e) => fail_batch(batch, &e.to_string()),
    }
}

fn fail_batch(batch: Vec<Pending>, message: &str) {
    for p in batch {
        let _ = p
            .resp
            .send(Err(GubernatorError::Transport(message.to_string())));
    }
}

async fn send_globals(
    client: &PeerClient,
    opts: &PeerClientOptions,
    conn: &mut Option<TcpStream>,
    next_id: &mut u32,
    update: UpdatePeerGlobalsReq,
) -> Result<()> {
    let body = serde_json::to_vec(&update)
        .map_err(|e| GubernatorError::Internal(format!("encode globals: {e}")))?;
    rpc(client, opts, conn, next_id, Op::UpdatePeerGlobals, &body).await?;
    Ok(())
}

/// One request/response exchange, reconnecting if needed. Transport
/// failures tear the connection down and flip the peer to UNHEALTHY; a
/// successful exchange restores CONNECTED.
async fn rpc(
    client: &PeerClient,
    opts: &PeerClientOptions,
    conn: &mut Option<TcpStream>,
    next_id: &mut u32,
    op: Op,
    body: &[u8],
) -> Result<Bytes> {
    let id = *next_id;
    *next_id = next_id.wrapping_add(1);
    let encoded = frame::encode_request(op, id, body)?;

    let exchange = timeout(opts.rpc_timeout, async {
        if conn.is_none() {
            client
                .state
                .store(PeerState::Connecting.as_u8(), Ordering::Release);
            let stream = TcpStream::connect(&client.info.grpc_address)
                .await
                .map_err(|e| GubernatorError::Transport(e.to_string()))?;
            let _ = stream.set_nodelay(true);
            *conn = Some(stream);
        }
        let Some(stream) = conn.as_mut() else {
            return Err(GubernatorError::Internal("connection vanished".into()));
        };
        write_frame(stream, &encoded).await?;
        read_frame(stream).await
    })
    .await;

    let payload = match exchange {
        Err(_) => {
            *conn = None;
            client.mark_unhealthy("rpc timed out");
            return Err(GubernatorError::Transport("rpc timed out".into()));
        }
        Ok(Err(e)) => {
            *conn = None;
            client.mark_unhealthy(&e.to_string());
            return Err(e);
        }
        Ok(Ok(p)) => p,
    };

    let decoded = match frame::decode(payload) {
        Ok(f) => f,
        Err(e) => {
            *conn = None;
            client.mark_unhealthy(&e.to_string());
            return Err(e);
        }
    };
    match decoded {
        Frame::Response(r) if r.op == op => match r.code {
            ErrorCode::Ok => {
                client.set_connected();
                Ok(r.body)
            }
            ErrorCode::Deadline => Err(GubernatorError::Deadline),
            ErrorCode::Internal => Err(GubernatorError::Transport(
                String::from_utf8_lossy(&r.body).into_owned(),
            )),
        },
        _ => {
            *conn = None;
            client.mark_unhealthy("protocol error: mismatched response");
            Err(GubernatorError::Transport(
                "protocol error: mismatched response".into(),
            ))
        }
    }
}

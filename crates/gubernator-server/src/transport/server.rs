//! Framed TCP listener for peer RPCs.
//!
//! One task per connection, a tracing span per connection. Requests on a
//! connection are processed in order; the peer client issues one batch at
//! a time, so per-connection pipelining buys nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use gubernator_core::error::ErrorCode;
use gubernator_core::protocol::frame::{self, Frame};

use super::{read_frame, write_frame, RpcHandler};

pub fn spawn(
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
    rpc_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let handler = handler.clone();
                        let shutdown = shutdown.clone();
                        let span = tracing::info_span!("peer_conn", peer = %addr);
                        tokio::spawn(
                            handle_conn(stream, handler, rpc_timeout, shutdown).instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    })
}

async fn handle_conn(
    mut stream: TcpStream,
    handler: Arc<dyn RpcHandler>,
    rpc_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            read = read_frame(&mut stream) => match read {
                Ok(p) => p,
                // Disconnect or garbage; either way the connection is done.
                Err(_) => break,
            },
        };

        let req = match frame::decode(payload) {
            Ok(Frame::Request(r)) => r,
            Ok(Frame::Response(_)) => {
                tracing::warn!("unexpected response frame from client");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "bad frame");
                break;
            }
        };

        let reply = match tokio::time::timeout(rpc_timeout, handler.handle(req.op, req.body)).await
        {
            Err(_) => frame::encode_response(req.op, req.id, ErrorCode::Deadline, b""),
            Ok(Ok(body)) => frame::encode_response(req.op, req.id, ErrorCode::Ok, &body),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, op = ?req.op, "rpc failed");
                frame::encode_response(req.op, req.id, e.error_code(), e.to_string().as_bytes())
            }
        };

        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "encode failed");
                break;
            }
        };
        if write_frame(&mut stream, &reply).await.is_err() {
            break;
        }
    }
}

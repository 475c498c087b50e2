//! Peer RPC transport: shared frame IO and the server-side listener.

pub mod server;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use async_trait::async_trait;
use gubernator_core::error::{GubernatorError, Result};
use gubernator_core::protocol::frame::{Op, MAX_FRAME_LEN};

/// Server side of the peer RPC surface. One implementation exists (the
/// rate-limit service); the seam keeps the transport testable on its own.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, op: Op, body: Bytes) -> Result<Vec<u8>>;
}

/// Read one length-prefixed frame payload.
pub(crate) async fn read_frame<S>(stream: &mut S) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| GubernatorError::Transport(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(GubernatorError::Transport(format!(
            "invalid frame length {len}"
        )));
    }
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| GubernatorError::Transport(e.to_string()))?;
    Ok(Bytes::from(payload))
}

/// Write one already-encoded frame (length prefix included).
pub(crate) async fn write_frame<S>(stream: &mut S, frame: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(frame)
        .await
        .map_err(|e| GubernatorError::Transport(e.to_string()))
}

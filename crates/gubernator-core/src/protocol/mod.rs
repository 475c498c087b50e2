//! Peer RPC wire protocol.

pub mod frame;

//! Top-level facade crate for gubernator.
//!
//! Re-exports the core types and the server library so users can depend
//! on a single crate.

pub mod core {
    pub use gubernator_core::*;
}

pub mod server {
    pub use gubernator_server::*;
}

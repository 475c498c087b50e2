//! Observability: in-process metrics registry.

pub mod metrics;

pub use metrics::ServiceMetrics;

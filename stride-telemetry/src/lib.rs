//! Stride Telemetry - Observability Infrastructure
//!
//! Provides the chunk load performance monitor (running per-chunk
//! aggregates plus a Prometheus view of the same events) and tracing
//! subscriber initialization.

pub mod metrics;
pub mod monitor;
pub mod tracer;

pub use metrics::LoadMetrics;
pub use monitor::{ChunkLoadRecord, ChunkSummary, MetricsExport, MetricsSummary, PerformanceMonitor};
pub use tracer::{init_tracing, TracingConfig};

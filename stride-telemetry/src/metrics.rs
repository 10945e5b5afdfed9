//! Prometheus view of chunk load events.
//!
//! Each monitor owns its registry; nothing is registered globally.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use stride_core::TelemetryError;

/// Chunk load latency buckets (seconds)
/// Covers: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const CHUNK_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Clone)]
pub struct LoadMetrics {
    registry: Registry,

    /// Chunk load attempts - labels: chunk, outcome
    pub chunk_loads_total: CounterVec,

    /// Chunk load attempt duration - labels: chunk
    pub chunk_load_duration_seconds: HistogramVec,
}

impl LoadMetrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let chunk_loads_total = CounterVec::new(
            Opts::new("stride_chunk_loads_total", "Total number of chunk load attempts"),
            &["chunk", "outcome"],
        )
        .map_err(registry_error)?;
        let chunk_load_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "stride_chunk_load_duration_seconds",
                "Chunk load attempt duration in seconds",
            )
            .buckets(CHUNK_LATENCY_BUCKETS.to_vec()),
            &["chunk"],
        )
        .map_err(registry_error)?;

        registry
            .register(Box::new(chunk_loads_total.clone()))
            .map_err(registry_error)?;
        registry
            .register(Box::new(chunk_load_duration_seconds.clone()))
            .map_err(registry_error)?;

        Ok(Self {
            registry,
            chunk_loads_total,
            chunk_load_duration_seconds,
        })
    }

    pub fn observe(&self, chunk: &str, duration_ms: f64, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.chunk_loads_total
            .with_label_values(&[chunk, outcome])
            .inc();
        self.chunk_load_duration_seconds
            .with_label_values(&[chunk])
            .observe(duration_ms / 1000.0);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(registry_error)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Serialization {
            reason: e.to_string(),
        })
    }
}

fn registry_error(e: prometheus::Error) -> TelemetryError {
    TelemetryError::Registry {
        reason: e.to_string(),
    }
}

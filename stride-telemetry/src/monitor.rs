//! Append-only chunk load log with incrementally maintained aggregates.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use stride_core::TelemetryError;
use tracing::{debug, warn};

use crate::metrics::LoadMetrics;

/// One load attempt. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkLoadRecord {
    pub chunk_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running aggregate for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub loads: u64,
    pub total_time_ms: f64,
    pub successes: u64,
}

impl MetricsSummary {
    fn apply(&mut self, record: &ChunkLoadRecord) {
        self.loads += 1;
        self.total_time_ms += record.duration_ms;
        if record.success {
            self.successes += 1;
        }
    }

    pub fn avg_time_ms(&self) -> f64 {
        if self.loads == 0 {
            0.0
        } else {
            self.total_time_ms / self.loads as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.loads == 0 {
            0.0
        } else {
            self.successes as f64 / self.loads as f64
        }
    }
}

/// Derived view returned by [`PerformanceMonitor::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSummary {
    pub chunk_name: String,
    pub loads: u64,
    pub avg_time_ms: f64,
    pub success_rate: f64,
}

impl ChunkSummary {
    fn from_aggregate(chunk_name: &str, aggregate: &MetricsSummary) -> Self {
        Self {
            chunk_name: chunk_name.to_string(),
            loads: aggregate.loads,
            avg_time_ms: aggregate.avg_time_ms(),
            success_rate: aggregate.success_rate(),
        }
    }
}

/// Document produced by [`PerformanceMonitor::export_to_json`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsExport {
    pub exported_at: DateTime<Utc>,
    pub records: Vec<ChunkLoadRecord>,
    pub summaries: Vec<ChunkSummary>,
}

#[derive(Debug, Default)]
struct MonitorState {
    records: Vec<ChunkLoadRecord>,
    aggregates: BTreeMap<String, MetricsSummary>,
}

/// Collects chunk load attempts.
///
/// A record and its aggregate contribution are applied under the same write
/// lock, so readers never see one without the other.
pub struct PerformanceMonitor {
    state: RwLock<MonitorState>,
    metrics: LoadMetrics,
}

impl PerformanceMonitor {
    pub fn new() -> Result<Self, TelemetryError> {
        Ok(Self {
            state: RwLock::new(MonitorState::default()),
            metrics: LoadMetrics::new()?,
        })
    }

    /// Record an attempt that just finished and took `duration_ms`.
    pub fn record_load(
        &self,
        chunk_name: &str,
        duration_ms: f64,
        success: bool,
        error: Option<String>,
    ) {
        if !is_valid_duration(duration_ms) {
            warn!(chunk = %chunk_name, duration_ms, "Dropping load with invalid duration");
            return;
        }
        let now = Utc::now();
        let elapsed = ChronoDuration::microseconds((duration_ms * 1000.0) as i64);
        self.record(ChunkLoadRecord {
            chunk_name: chunk_name.to_string(),
            started_at: now.checked_sub_signed(elapsed).unwrap_or(now),
            duration_ms,
            success,
            error,
        });
    }

    /// Append a fully formed record. Records with a negative or non-finite
    /// duration are logged and dropped.
    pub fn record(&self, record: ChunkLoadRecord) {
        if !is_valid_duration(record.duration_ms) {
            warn!(
                chunk = %record.chunk_name,
                duration_ms = record.duration_ms,
                "Dropping load with invalid duration"
            );
            return;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .aggregates
            .entry(record.chunk_name.clone())
            .or_default()
            .apply(&record);
        self.metrics
            .observe(&record.chunk_name, record.duration_ms, record.success);
        debug!(
            chunk = %record.chunk_name,
            duration_ms = record.duration_ms,
            success = record.success,
            "Chunk load recorded"
        );
        state.records.push(record);
    }

    pub fn summary(&self, chunk_name: &str) -> Option<ChunkSummary> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .aggregates
            .get(chunk_name)
            .map(|aggregate| ChunkSummary::from_aggregate(chunk_name, aggregate))
    }

    /// Summaries for every chunk observed so far, ordered by name.
    pub fn summaries(&self) -> Vec<ChunkSummary> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .aggregates
            .iter()
            .map(|(name, aggregate)| ChunkSummary::from_aggregate(name, aggregate))
            .collect()
    }

    /// Raw aggregate for a chunk.
    pub fn aggregate(&self, chunk_name: &str) -> Option<MetricsSummary> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.aggregates.get(chunk_name).cloned()
    }

    /// Snapshot of every record in append order.
    pub fn metrics(&self) -> Vec<ChunkLoadRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.records.clone()
    }

    pub fn export_to_json(&self) -> Result<String, TelemetryError> {
        let export = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            MetricsExport {
                exported_at: Utc::now(),
                records: state.records.clone(),
                summaries: state
                    .aggregates
                    .iter()
                    .map(|(name, aggregate)| ChunkSummary::from_aggregate(name, aggregate))
                    .collect(),
            }
        };
        serde_json::to_string_pretty(&export).map_err(|e| TelemetryError::Serialization {
            reason: e.to_string(),
        })
    }

    pub fn export_prometheus(&self) -> Result<String, TelemetryError> {
        self.metrics.encode()
    }
}

fn is_valid_duration(duration_ms: f64) -> bool {
    duration_ms.is_finite() && duration_ms >= 0.0
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PerformanceMonitor")
            .field("records", &state.records.len())
            .field("chunks", &state.aggregates.len())
            .finish()
    }
}

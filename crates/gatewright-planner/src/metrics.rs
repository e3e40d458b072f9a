use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Where `GateMetrics` publishes running totals.
pub trait MetricsBackend: Send + Sync {
    /// `total` is the counter's value after the update, not the increment.
    fn record_counter(&self, name: &str, total: u64);
    /// One observation, e.g. the gate count of a single execution.
    fn record_histogram(&self, name: &str, value: f64);
}

/// Receives one record per applied gate.
pub trait MetricsSink: Send + Sync {
    fn record_gate_usage(&self, record: &GateUsageRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Canonical,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateUsageRecord {
    pub gate_id: String,
    pub gate_type: GateKind,
    pub instruction_count: usize,
    pub instruction_characters: usize,
    pub temporary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Split `total` characters across `gates` gates, earliest gates taking the
/// remainder one character each.
pub fn split_instruction_budget(total: usize, gates: usize) -> Vec<usize> {
    if gates == 0 {
        return Vec::new();
    }
    let base = total / gates;
    let remainder = total % gates;
    (0..gates)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// Gate resolution counters. Thread-safe for concurrent executions.
pub struct GateMetrics {
    pub plans_created: AtomicU64,
    pub gates_applied: AtomicU64,
    pub temporary_gates_created: AtomicU64,
    pub duplicate_gates_skipped: AtomicU64,
    pub steps_failed: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for GateMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateMetrics")
            .field("plans_created", &self.plans_created)
            .field("gates_applied", &self.gates_applied)
            .field("temporary_gates_created", &self.temporary_gates_created)
            .field("duplicate_gates_skipped", &self.duplicate_gates_skipped)
            .field("steps_failed", &self.steps_failed)
            .finish()
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMetrics {
    pub fn new() -> Self {
        Self {
            plans_created: AtomicU64::new(0),
            gates_applied: AtomicU64::new(0),
            temporary_gates_created: AtomicU64::new(0),
            duplicate_gates_skipped: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    pub fn record_plan_created(&self) {
        let val = self.plans_created.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("gatewright.plans_created", val);
        }
    }

    pub fn record_gates_applied(&self, count: usize) {
        let count = count as u64;
        let val = self.gates_applied.fetch_add(count, Ordering::Relaxed) + count;
        if let Some(backend) = &self.backend {
            backend.record_counter("gatewright.gates_applied", val);
            backend.record_histogram("gatewright.gates_per_execution", count as f64);
        }
    }

    pub fn record_temporary_gates(&self, created: usize, duplicates: usize) {
        let created_total = self
            .temporary_gates_created
            .fetch_add(created as u64, Ordering::Relaxed)
            + created as u64;
        let duplicate_total = self
            .duplicate_gates_skipped
            .fetch_add(duplicates as u64, Ordering::Relaxed)
            + duplicates as u64;
        if let Some(backend) = &self.backend {
            backend.record_counter("gatewright.temporary_gates_created", created_total);
            backend.record_counter("gatewright.duplicate_gates_skipped", duplicate_total);
        }
    }

    pub fn record_step_failed(&self) {
        let val = self.steps_failed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("gatewright.steps_failed", val);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plans_created: self.plans_created.load(Ordering::Relaxed),
            gates_applied: self.gates_applied.load(Ordering::Relaxed),
            temporary_gates_created: self.temporary_gates_created.load(Ordering::Relaxed),
            duplicate_gates_skipped: self.duplicate_gates_skipped.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of gate metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub plans_created: u64,
    pub gates_applied: u64,
    pub temporary_gates_created: u64,
    pub duplicate_gates_skipped: u64,
    pub steps_failed: u64,
}

/// Writes counters and gate usage to the `gatewright::metrics` log target.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, total: u64) {
        tracing::debug!(target: "gatewright::metrics", counter = name, total, "Counter updated");
    }

    fn record_histogram(&self, name: &str, value: f64) {
        tracing::debug!(target: "gatewright::metrics", histogram = name, value, "Observation recorded");
    }
}

impl MetricsSink for LoggingMetricsBackend {
    fn record_gate_usage(&self, record: &GateUsageRecord) {
        tracing::info!(
            target: "gatewright::metrics",
            gate_id = %record.gate_id,
            gate_type = ?record.gate_type,
            instruction_characters = record.instruction_characters,
            session_id = ?record.session_id,
            validation = ?record.validation_result,
            "gate usage"
        );
    }
}

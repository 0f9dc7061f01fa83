//! Observability infrastructure for the disk pressure agent
//!
//! Provides:
//! - Prometheus metrics (disk usage, reclaimed bytes, evictions, tick latency)
//! - Structured JSON logging with tracing, one event per deletion/eviction

use crate::models::EvictionEvent;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for tick latency (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    disk_usage_percent: Gauge,
    node_tainted: IntGauge,
    tick_latency_seconds: Histogram,
    images_deleted: IntCounter,
    image_deletions_skipped: IntCounter,
    containers_removed: IntCounter,
    bytes_reclaimed: IntCounter,
    pods_evicted: IntCounter,
    pods_force_killed: IntCounter,
    eviction_cycles: IntCounter,
    sample_errors: IntCounter,
    pressure_unresolved: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            disk_usage_percent: register_gauge!(
                "disk_pressure_agent_disk_usage_percent",
                "Most recently sampled usage of the image/container filesystem"
            )
            .expect("Failed to register disk_usage_percent"),

            node_tainted: register_int_gauge!(
                "disk_pressure_agent_node_tainted",
                "1 while the disk-pressure taint is applied to the node"
            )
            .expect("Failed to register node_tainted"),

            tick_latency_seconds: register_histogram!(
                "disk_pressure_agent_tick_latency_seconds",
                "Time spent in one monitoring/reclamation tick",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            images_deleted: register_int_counter!(
                "disk_pressure_agent_images_deleted_total",
                "Unused images deleted by the image garbage collector"
            )
            .expect("Failed to register images_deleted"),

            image_deletions_skipped: register_int_counter!(
                "disk_pressure_agent_image_deletions_skipped_total",
                "Image deletions skipped because the image became referenced"
            )
            .expect("Failed to register image_deletions_skipped"),

            containers_removed: register_int_counter!(
                "disk_pressure_agent_containers_removed_total",
                "Dead containers removed by the container garbage collector"
            )
            .expect("Failed to register containers_removed"),

            bytes_reclaimed: register_int_counter!(
                "disk_pressure_agent_bytes_reclaimed_total",
                "Bytes freed by image and container garbage collection"
            )
            .expect("Failed to register bytes_reclaimed"),

            pods_evicted: register_int_counter!(
                "disk_pressure_agent_pods_evicted_total",
                "Pods evicted to relieve disk pressure"
            )
            .expect("Failed to register pods_evicted"),

            pods_force_killed: register_int_counter!(
                "disk_pressure_agent_pods_force_killed_total",
                "Evicted pods that had to be force-killed after the grace period"
            )
            .expect("Failed to register pods_force_killed"),

            eviction_cycles: register_int_counter!(
                "disk_pressure_agent_eviction_cycles_total",
                "Re-evictions of a recreated workload within the cycle window"
            )
            .expect("Failed to register eviction_cycles"),

            sample_errors: register_int_counter!(
                "disk_pressure_agent_sample_errors_total",
                "Disk usage samples that failed and caused a skipped tick"
            )
            .expect("Failed to register sample_errors"),

            pressure_unresolved: register_int_counter!(
                "disk_pressure_agent_pressure_unresolved_total",
                "Ticks that ended above the high threshold with nothing left to reclaim"
            )
            .expect("Failed to register pressure_unresolved"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn set_disk_usage(&self, percent: f64) {
        self.inner().disk_usage_percent.set(percent);
    }

    pub fn set_tainted(&self, tainted: bool) {
        self.inner().node_tainted.set(i64::from(tainted));
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn record_image_deleted(&self, bytes: u64) {
        self.inner().images_deleted.inc();
        self.inner().bytes_reclaimed.inc_by(bytes);
    }

    pub fn inc_image_deletions_skipped(&self) {
        self.inner().image_deletions_skipped.inc();
    }

    pub fn record_container_removed(&self, bytes: u64) {
        self.inner().containers_removed.inc();
        self.inner().bytes_reclaimed.inc_by(bytes);
    }

    pub fn inc_pods_evicted(&self) {
        self.inner().pods_evicted.inc();
    }

    pub fn inc_pods_force_killed(&self) {
        self.inner().pods_force_killed.inc();
    }

    pub fn inc_eviction_cycles(&self) {
        self.inner().eviction_cycles.inc();
    }

    pub fn inc_sample_errors(&self) {
        self.inner().sample_errors.inc();
    }

    pub fn inc_pressure_unresolved(&self) {
        self.inner().pressure_unresolved.inc();
    }
}

/// Structured logger for reclamation events
///
/// Every deletion and eviction is logged as one JSON event carrying the
/// usage before and after, so a log sink can reconstruct the timeline.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_image_deleted(
        &self,
        image_id: &str,
        size_bytes: u64,
        usage_before_percent: f64,
        usage_after_percent: f64,
    ) {
        info!(
            event = "image_deleted",
            node = %self.node_name,
            image_id = %image_id,
            size_bytes = size_bytes,
            usage_before_percent = usage_before_percent,
            usage_after_percent = usage_after_percent,
            "Deleted unused image"
        );
    }

    pub fn log_image_skipped(&self, image_id: &str, reason: &str) {
        info!(
            event = "image_deletion_skipped",
            node = %self.node_name,
            image_id = %image_id,
            reason = %reason,
            "Skipped image deletion"
        );
    }

    pub fn log_container_removed(
        &self,
        container_id: &str,
        pod_id: &str,
        size_bytes: u64,
        usage_before_percent: f64,
        usage_after_percent: f64,
    ) {
        info!(
            event = "container_removed",
            node = %self.node_name,
            container_id = %container_id,
            pod_id = %pod_id,
            size_bytes = size_bytes,
            usage_before_percent = usage_before_percent,
            usage_after_percent = usage_after_percent,
            "Removed dead container"
        );
    }

    pub fn log_pod_evicted(&self, event: &EvictionEvent) {
        warn!(
            event = "pod_evicted",
            node = %self.node_name,
            pod_id = %event.pod_id,
            pod_name = %event.pod_name,
            namespace = %event.namespace,
            reason = %event.reason,
            force_killed = event.force_killed,
            usage_before_percent = event.usage_before_percent,
            usage_after_percent = event.usage_after_percent,
            "Evicted pod to relieve disk pressure"
        );
    }

    pub fn log_pod_force_killed(&self, pod_id: &str, grace_secs: u64) {
        warn!(
            event = "pod_force_killed",
            node = %self.node_name,
            pod_id = %pod_id,
            grace_secs = grace_secs,
            "Pod did not terminate within grace period, force killed"
        );
    }

    pub fn log_taint_change(&self, added: bool, usage_percent: Option<f64>) {
        if added {
            warn!(
                event = "taint_added",
                node = %self.node_name,
                usage_percent = ?usage_percent,
                "Node tainted for disk pressure"
            );
        } else {
            info!(
                event = "taint_removed",
                node = %self.node_name,
                usage_percent = ?usage_percent,
                "Disk pressure relieved, node accepts new pods"
            );
        }
    }

    pub fn log_eviction_cycle(&self, identity: &str, cycles: u32, window_secs: u64) {
        warn!(
            event = "eviction_cycle_detected",
            node = %self.node_name,
            workload = %identity,
            cycles = cycles,
            window_secs = window_secs,
            "Workload keeps getting recreated and evicted"
        );
    }

    pub fn log_pressure_unresolved(
        &self,
        usage_percent: f64,
        high_threshold_percent: f64,
        unresolved_ticks: u32,
    ) {
        error!(
            event = "disk_pressure_unresolved",
            node = %self.node_name,
            usage_percent = usage_percent,
            high_threshold_percent = high_threshold_percent,
            unresolved_ticks = unresolved_ticks,
            "Nothing left to reclaim and usage is still above the high threshold"
        );
    }

    pub fn log_startup(&self, version: &str, disk_source: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            disk_source = %disk_source,
            "Disk pressure agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Disk pressure agent shutting down"
        );
    }
}

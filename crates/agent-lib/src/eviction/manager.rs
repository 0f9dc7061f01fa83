//! Eviction manager
//!
//! Invoked only when image reclamation left usage above the high
//! threshold. Evicts ranked pods one at a time; after each eviction it
//! re-samples usage and reclaims images the pod no longer references,
//! stopping once usage is at or below the low threshold.

use super::ranking::rank_pods;
use crate::clock::Clock;
use crate::gc::{ImageGarbageCollector, ImageReclaim};
use crate::models::{DiskUsage, EvictionEvent, Pod, Thresholds};
use crate::monitor::DiskMonitor;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, Orchestrator, RuntimeError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default grace period before a terminating pod is force-killed
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionConfig {
    pub termination_grace: Duration,
    /// Allow evicting pods that tolerate the disk-pressure taint once
    /// every other pod is gone
    pub evict_tolerating_pods: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            termination_grace: DEFAULT_TERMINATION_GRACE,
            evict_tolerating_pods: false,
        }
    }
}

/// Result of an eviction pass
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionOutcome {
    pub usage_before: DiskUsage,
    pub usage_after: DiskUsage,
    pub evicted: Vec<EvictionEvent>,
    /// Image passes run after evictions released references
    pub image_reclaims: Vec<ImageReclaim>,
    /// Pods that could be neither stopped nor killed
    pub failed: Vec<String>,
    /// Every evictable pod is gone and usage is still above the high threshold
    pub unresolved: bool,
}

impl EvictionOutcome {
    fn idle(usage: DiskUsage) -> Self {
        Self {
            usage_before: usage,
            usage_after: usage,
            evicted: Vec::new(),
            image_reclaims: Vec::new(),
            failed: Vec::new(),
            unresolved: false,
        }
    }

    pub fn evicted_ids(&self) -> Vec<String> {
        self.evicted.iter().map(|e| e.pod_id.clone()).collect()
    }
}

pub struct EvictionManager {
    node_name: String,
    monitor: Arc<dyn DiskMonitor>,
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Arc<dyn Orchestrator>,
    image_gc: Arc<ImageGarbageCollector>,
    clock: Arc<dyn Clock>,
    thresholds: Thresholds,
    config: EvictionConfig,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl EvictionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_name: impl Into<String>,
        monitor: Arc<dyn DiskMonitor>,
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Arc<dyn Orchestrator>,
        image_gc: Arc<ImageGarbageCollector>,
        clock: Arc<dyn Clock>,
        thresholds: Thresholds,
        config: EvictionConfig,
        logger: StructuredLogger,
        metrics: AgentMetrics,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            monitor,
            runtime,
            orchestrator,
            image_gc,
            clock,
            thresholds,
            config,
            logger,
            metrics,
        }
    }

    /// Every pod on the node in eviction order; tolerating pods rank last
    pub async fn eviction_order(&self) -> Result<Vec<Pod>, RuntimeError> {
        let pods = self.runtime.list_pods().await?;
        Ok(rank_pods(pods))
    }

    /// A tolerating pod is evictable only when enabled and no other pod is left
    fn is_evictable(&self, pod: &Pod, plain_remaining: usize) -> bool {
        !pod.tolerates_disk_pressure || (self.config.evict_tolerating_pods && plain_remaining == 0)
    }

    /// Evict pods until usage is at or below the low threshold.
    ///
    /// No-op unless `usage` is above the high threshold.
    pub async fn evict_if_needed(&self, usage: DiskUsage) -> Result<EvictionOutcome, RuntimeError> {
        let mut outcome = EvictionOutcome::idle(usage);
        if !self.thresholds.requires_eviction(&usage) {
            return Ok(outcome);
        }

        let candidates = self.eviction_order().await?;
        debug!(
            candidates = candidates.len(),
            usage_percent = usage.percent(),
            "Ranked pods for eviction"
        );

        let mut plain_remaining = candidates
            .iter()
            .filter(|p| !p.tolerates_disk_pressure)
            .count();
        let mut current = usage;
        for pod in candidates {
            if self.thresholds.is_relieved(&current) {
                break;
            }
            if !self.is_evictable(&pod, plain_remaining) {
                debug!(pod_id = %pod.id, "Skipping pod tolerating disk pressure");
                continue;
            }

            let before = current;
            let force_killed = match self.terminate(&pod).await {
                Ok(force_killed) => force_killed,
                Err(e) => {
                    error!(pod_id = %pod.id, error = %e, "Failed to evict pod");
                    outcome.failed.push(pod.id.clone());
                    continue;
                }
            };
            if !pod.tolerates_disk_pressure {
                plain_remaining -= 1;
            }
            let evicted_at = self.clock.now();

            let sampled = match self.monitor.sample().await {
                Ok(sampled) => sampled,
                Err(e) => {
                    warn!(error = %e, "Usage re-sample after eviction failed, using accounting");
                    before.after_freeing(pod.footprint_bytes)
                }
            };

            current = sampled;
            match self.image_gc.reclaim_to_low(sampled, evicted_at).await {
                Ok(reclaim) => {
                    current = reclaim.usage_after;
                    if !reclaim.deleted.is_empty() {
                        outcome.image_reclaims.push(reclaim);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Image reclamation after eviction failed");
                }
            }

            let event = EvictionEvent {
                pod_id: pod.id.clone(),
                pod_name: pod.name.clone(),
                namespace: pod.namespace.clone(),
                reason: EvictionEvent::REASON_DISK_PRESSURE.to_string(),
                timestamp: evicted_at,
                usage_before_percent: before.percent(),
                usage_after_percent: current.percent(),
                force_killed,
            };
            self.logger.log_pod_evicted(&event);
            self.metrics.inc_pods_evicted();
            if let Err(e) = self.orchestrator.report_eviction(&self.node_name, &event).await {
                warn!(pod_id = %pod.id, error = %e, "Failed to report eviction");
            }
            outcome.evicted.push(event);
        }

        outcome.usage_after = current;
        outcome.unresolved = self.thresholds.requires_eviction(&current);
        Ok(outcome)
    }

    /// Stop a pod within the grace period, force-killing it otherwise.
    ///
    /// Returns whether the pod had to be force-killed.
    async fn terminate(&self, pod: &Pod) -> Result<bool, RuntimeError> {
        let grace = self.config.termination_grace;
        match tokio::time::timeout(grace, self.runtime.stop_pod(&pod.id)).await {
            Ok(Ok(())) => Ok(false),
            Ok(Err(e)) => {
                warn!(pod_id = %pod.id, error = %e, "Graceful stop failed, force killing");
                self.force_kill(pod).await
            }
            Err(_) => self.force_kill(pod).await,
        }
    }

    async fn force_kill(&self, pod: &Pod) -> Result<bool, RuntimeError> {
        self.runtime.kill_pod(&pod.id).await?;
        self.logger
            .log_pod_force_killed(&pod.id, self.config.termination_grace.as_secs());
        self.metrics.inc_pods_force_killed();
        Ok(true)
    }
}

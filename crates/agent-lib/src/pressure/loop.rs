//! Disk pressure loop
//!
//! One tick: sample, remove dead containers, reclaim images, taint and
//! evict if still above the high threshold, record eviction cycles, then
//! verify usage with a second sample and lift the taint once usage is at
//! or below the low threshold. Ticks run sequentially on a fixed interval.

use crate::clock::{Clock, SystemClock};
use crate::eviction::{
    CycleDetector, CycleObservation, EvictionConfig, EvictionManager, EvictionOutcome,
    DEFAULT_CYCLE_WARNING_THRESHOLD, DEFAULT_CYCLE_WINDOW,
};
use crate::gc::{
    ContainerGarbageCollector, ContainerGcPolicy, ContainerReclaim, ImageGarbageCollector,
    ImageGcPolicy, ImageReclaim,
};
use crate::health::{Component, HealthRegistry};
use crate::models::{DiskUsage, NodeState, Thresholds};
use crate::monitor::DiskMonitor;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, Orchestrator};
use crate::status::{AgentEvent, EventKind, NodeStatus, PressureCondition, StatusBoard};
use crate::taint::{TaintController, TaintTransition};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the pressure loop
#[derive(Debug, Clone)]
pub struct PressureConfig {
    /// Time between ticks (default: 10 seconds)
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub image_gc: ImageGcPolicy,
    pub container_gc: ContainerGcPolicy,
    pub eviction: EvictionConfig,
    /// Window in which re-evictions of a workload count as cycles
    pub cycle_window: Duration,
    pub cycle_warning_threshold: u32,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            thresholds: Thresholds::default(),
            image_gc: ImageGcPolicy::default(),
            container_gc: ContainerGcPolicy::default(),
            eviction: EvictionConfig::default(),
            cycle_window: DEFAULT_CYCLE_WINDOW,
            cycle_warning_threshold: DEFAULT_CYCLE_WARNING_THRESHOLD,
        }
    }
}

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Usage could not be sampled; nothing was done
    Skipped,
    /// Usage was below the high threshold
    NoPressure,
    /// Usage started at or above high and ended at or below low
    Relieved,
    /// Usage ended between the low and high thresholds
    Partial,
    /// Usage is still above high with nothing left to reclaim
    Unresolved,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Skipped => "skipped",
            TickOutcome::NoPressure => "no_pressure",
            TickOutcome::Relieved => "relieved",
            TickOutcome::Partial => "partial",
            TickOutcome::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a single tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub outcome: TickOutcome,
    pub usage_before: Option<DiskUsage>,
    pub usage_after: Option<DiskUsage>,
    pub containers: ContainerReclaim,
    pub images: Option<ImageReclaim>,
    pub eviction: Option<EvictionOutcome>,
    /// Taint transitions in the order they happened
    pub taint_transitions: Vec<TaintTransition>,
    pub cycles: Vec<CycleObservation>,
    pub events: Vec<AgentEvent>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            outcome: TickOutcome::Skipped,
            usage_before: None,
            usage_after: None,
            containers: ContainerReclaim::default(),
            images: None,
            eviction: None,
            taint_transitions: Vec::new(),
            cycles: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Image ids deleted during the tick, including passes run after evictions
    pub fn deleted_images(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .images
            .iter()
            .flat_map(|r| r.deleted_ids())
            .collect();
        if let Some(eviction) = &self.eviction {
            ids.extend(eviction.image_reclaims.iter().flat_map(|r| r.deleted_ids()));
        }
        ids
    }

    /// Pod ids evicted during the tick, in eviction order
    pub fn evicted_pods(&self) -> Vec<String> {
        self.eviction
            .as_ref()
            .map(|e| e.evicted_ids())
            .unwrap_or_default()
    }

    fn event(
        &mut self,
        kind: EventKind,
        subject: impl Into<String>,
        message: impl Into<String>,
        usage: Option<(f64, f64)>,
    ) {
        self.events.push(AgentEvent {
            kind,
            timestamp: self.at,
            subject: subject.into(),
            message: message.into(),
            usage_before_percent: usage.map(|u| u.0),
            usage_after_percent: usage.map(|u| u.1),
        });
    }
}

/// Eviction ran out of candidates while usage stayed above high
fn nothing_left(report: &TickReport) -> bool {
    report
        .eviction
        .as_ref()
        .map(|outcome| outcome.unresolved)
        .unwrap_or(false)
}

fn push_image_events(report: &mut TickReport, reclaim: &ImageReclaim) {
    for deletion in &reclaim.deleted {
        report.event(
            EventKind::ImageDeleted,
            &deletion.image_id,
            format!("{} bytes freed", deletion.bytes_freed),
            Some((deletion.usage_before_percent, deletion.usage_after_percent)),
        );
    }
}

fn push_eviction_events(report: &mut TickReport, outcome: &EvictionOutcome) {
    for evicted in &outcome.evicted {
        let message = if evicted.force_killed {
            format!("{} (force killed)", evicted.reason)
        } else {
            evicted.reason.clone()
        };
        report.event(
            EventKind::PodEvicted,
            evicted.identity(),
            message,
            Some((evicted.usage_before_percent, evicted.usage_after_percent)),
        );
    }
}

/// Per-node disk pressure loop
pub struct PressureLoop {
    node: NodeState,
    monitor: Arc<dyn DiskMonitor>,
    clock: Arc<dyn Clock>,
    container_gc: ContainerGarbageCollector,
    image_gc: Arc<ImageGarbageCollector>,
    eviction: EvictionManager,
    taints: TaintController,
    cycles: CycleDetector,
    health: HealthRegistry,
    status: StatusBoard,
    logger: StructuredLogger,
    metrics: AgentMetrics,
    config: PressureConfig,
    ticks: u64,
}

impl PressureLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_name: impl Into<String>,
        monitor: Arc<dyn DiskMonitor>,
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Arc<dyn Orchestrator>,
        clock: Arc<dyn Clock>,
        health: HealthRegistry,
        status: StatusBoard,
        config: PressureConfig,
    ) -> Self {
        let node_name = node_name.into();
        let logger = StructuredLogger::new(node_name.clone());
        let metrics = AgentMetrics::new();
        let thresholds = config.thresholds;

        let image_gc = Arc::new(ImageGarbageCollector::new(
            runtime.clone(),
            thresholds,
            config.image_gc.clone(),
            logger.clone(),
            metrics.clone(),
        ));
        let eviction = EvictionManager::new(
            node_name.clone(),
            monitor.clone(),
            runtime.clone(),
            orchestrator.clone(),
            image_gc.clone(),
            clock.clone(),
            thresholds,
            config.eviction.clone(),
            logger.clone(),
            metrics.clone(),
        );

        Self {
            node: NodeState::new(node_name, thresholds),
            container_gc: ContainerGarbageCollector::new(
                runtime,
                config.container_gc.clone(),
                logger.clone(),
                metrics.clone(),
            ),
            image_gc,
            eviction,
            taints: TaintController::new(orchestrator, logger.clone(), metrics.clone()),
            cycles: CycleDetector::new(config.cycle_window, config.cycle_warning_threshold),
            monitor,
            clock,
            health,
            status,
            logger,
            metrics,
            config,
            ticks: 0,
        }
    }

    /// Current node state
    pub fn node(&self) -> &NodeState {
        &self.node
    }

    pub fn status_board(&self) -> &StatusBoard {
        &self.status
    }

    /// Run ticks until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            node = %self.node.name,
            interval_secs = self.config.interval.as_secs(),
            high_threshold_percent = self.config.thresholds.high_percent,
            low_threshold_percent = self.config.thresholds.low_percent,
            "Starting disk pressure loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(
                        tick = self.ticks,
                        outcome = %report.outcome,
                        evicted = report.evicted_pods().len(),
                        "Pressure tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down disk pressure loop");
                    break;
                }
            }
        }
    }

    /// Run a single tick
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = TickReport::new(now);
        self.ticks += 1;

        let sampled = match self.monitor.sample().await {
            Ok(usage) => {
                self.health.record_success(Component::DiskMonitor, now).await;
                self.health.record_sample(now).await;
                usage
            }
            Err(e) => {
                warn!(node = %self.node.name, error = %e, "Disk usage sample failed, skipping tick");
                self.metrics.inc_sample_errors();
                self.health
                    .record_failure(Component::DiskMonitor, e.to_string(), now)
                    .await;
                report.event(EventKind::SampleFailed, &self.node.name, e.to_string(), None);
                self.finish(&mut report, started).await;
                return report;
            }
        };
        self.node.observe(sampled, now);
        self.metrics.set_disk_usage(sampled.percent());
        report.usage_before = Some(sampled);

        let thresholds = self.config.thresholds;
        let breached = thresholds.is_breached(&sampled);
        let was_tainted = self.node.is_tainted();
        let mut current = sampled;

        match self.container_gc.collect(current, now).await {
            Ok(reclaim) => {
                current = current.after_freeing(reclaim.bytes_freed);
                for id in &reclaim.removed {
                    report.event(EventKind::ContainerRemoved, id, "dead container removed", None);
                }
                report.containers = reclaim;
            }
            Err(e) => warn!(error = %e, "Container garbage collection failed"),
        }

        let mut reclaimer_failed = false;
        if breached {
            match self.image_gc.reclaim_images(current, now).await {
                Ok(reclaim) => {
                    current = reclaim.usage_after;
                    push_image_events(&mut report, &reclaim);
                    report.images = Some(reclaim);
                }
                Err(e) => {
                    warn!(error = %e, "Image garbage collection failed, deferring eviction to the next tick");
                    self.health
                        .record_failure(Component::Reclaimer, e.to_string(), now)
                        .await;
                    reclaimer_failed = true;
                }
            }
        }

        // pods are only evicted once image reclamation has run to completion
        if !reclaimer_failed && thresholds.requires_eviction(&current) {
            self.apply_taint(&mut report, true).await;
            match self.eviction.evict_if_needed(current).await {
                Ok(outcome) => {
                    current = outcome.usage_after;
                    for reclaim in &outcome.image_reclaims {
                        push_image_events(&mut report, reclaim);
                    }
                    push_eviction_events(&mut report, &outcome);
                    report.eviction = Some(outcome);
                }
                Err(e) => {
                    error!(error = %e, "Eviction pass failed");
                    self.health
                        .record_failure(Component::Reclaimer, e.to_string(), now)
                        .await;
                    reclaimer_failed = true;
                }
            }
        }

        self.detect_cycles(&mut report, now);

        let verified = match self.monitor.sample().await {
            Ok(usage) => usage,
            Err(e) => {
                debug!(error = %e, "Verification sample failed, using accounted usage");
                current
            }
        };
        self.node.observe(verified, now);
        self.metrics.set_disk_usage(verified.percent());
        report.usage_after = Some(verified);

        if self.node.is_tainted() && thresholds.is_relieved(&verified) {
            self.apply_taint(&mut report, false).await;
        }

        report.outcome = if thresholds.requires_eviction(&verified) && nothing_left(&report) {
            TickOutcome::Unresolved
        } else if !breached && !was_tainted {
            TickOutcome::NoPressure
        } else if thresholds.is_relieved(&verified) {
            TickOutcome::Relieved
        } else {
            TickOutcome::Partial
        };

        if report.outcome == TickOutcome::Unresolved {
            self.node.unresolved_ticks += 1;
            self.logger.log_pressure_unresolved(
                verified.percent(),
                thresholds.high_percent,
                self.node.unresolved_ticks,
            );
            self.metrics.inc_pressure_unresolved();
            self.health
                .set_degraded(
                    Component::Reclaimer,
                    format!(
                        "disk usage {:.1}% above high threshold with nothing left to reclaim",
                        verified.percent()
                    ),
                )
                .await;
            report.event(
                EventKind::PressureUnresolved,
                &self.node.name,
                format!("unresolved for {} tick(s)", self.node.unresolved_ticks),
                Some((sampled.percent(), verified.percent())),
            );
        } else {
            self.node.unresolved_ticks = 0;
            if !reclaimer_failed {
                self.health.record_success(Component::Reclaimer, now).await;
            }
        }

        self.finish(&mut report, started).await;
        report
    }

    async fn apply_taint(&mut self, report: &mut TickReport, active: bool) {
        match self.taints.set_pressure_taint(&mut self.node, active).await {
            Ok(transition) => {
                self.health
                    .record_success(Component::TaintController, report.at)
                    .await;
                let (kind, message) = match transition {
                    TaintTransition::Added => (EventKind::TaintAdded, "node tainted for disk pressure"),
                    TaintTransition::Removed => (EventKind::TaintRemoved, "disk pressure taint removed"),
                    TaintTransition::Unchanged => return,
                };
                let usage = self.node.usage_percent().unwrap_or_default();
                report.event(kind, &self.node.name, message, Some((usage, usage)));
                report.taint_transitions.push(transition);
            }
            Err(e) => {
                error!(node = %self.node.name, active = active, error = %e, "Failed to update disk pressure taint");
                self.health
                    .record_failure(Component::TaintController, e.to_string(), report.at)
                    .await;
            }
        }
    }

    fn detect_cycles(&mut self, report: &mut TickReport, now: DateTime<Utc>) {
        self.cycles.prune(now);
        let identities: Vec<String> = report
            .eviction
            .iter()
            .flat_map(|e| e.evicted.iter().map(|ev| ev.identity()))
            .collect();

        for identity in identities {
            let observation = self.cycles.record_eviction(&identity, now);
            if observation.warn {
                self.logger.log_eviction_cycle(
                    &identity,
                    observation.cycles,
                    self.cycles.window().as_secs(),
                );
                self.metrics.inc_eviction_cycles();
                report.event(
                    EventKind::EvictionCycle,
                    &identity,
                    format!(
                        "re-evicted {} time(s) within {}s",
                        observation.cycles,
                        self.cycles.window().as_secs()
                    ),
                    None,
                );
            }
            report.cycles.push(observation);
        }
    }

    async fn finish(&mut self, report: &mut TickReport, started: Instant) {
        self.metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());

        let thresholds = self.config.thresholds;
        let condition = match self.node.usage {
            None => PressureCondition::Unknown,
            Some(usage) if thresholds.requires_eviction(&usage) || self.node.is_tainted() => {
                PressureCondition::DiskPressure
            }
            Some(_) => PressureCondition::NoPressure,
        };
        self.health.set_condition(condition).await;

        self.status
            .publish(NodeStatus {
                node_name: self.node.name.clone(),
                condition,
                tainted: self.node.is_tainted(),
                usage_percent: self.node.usage_percent(),
                used_bytes: self.node.usage.map(|u| u.used_bytes),
                capacity_bytes: self.node.usage.map(|u| u.capacity_bytes),
                high_threshold_percent: thresholds.high_percent,
                low_threshold_percent: thresholds.low_percent,
                last_tick_at: Some(report.at),
                last_outcome: Some(report.outcome.to_string()),
                unresolved_ticks: self.node.unresolved_ticks,
                ticks: self.ticks,
            })
            .await;
        self.status.push_events(report.events.iter().cloned()).await;
        self.status.set_cycles(self.cycles.snapshot(report.at));
    }
}

/// Builder for the pressure loop
pub struct PressureLoopBuilder {
    node_name: Option<String>,
    monitor: Option<Arc<dyn DiskMonitor>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    clock: Arc<dyn Clock>,
    health: Option<HealthRegistry>,
    status: Option<StatusBoard>,
    config: PressureConfig,
}

impl PressureLoopBuilder {
    pub fn new() -> Self {
        Self {
            node_name: None,
            monitor: None,
            runtime: None,
            orchestrator: None,
            clock: Arc::new(SystemClock),
            health: None,
            status: None,
            config: PressureConfig::default(),
        }
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn DiskMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(mut self, config: PressureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn build(self) -> Result<PressureLoop> {
        self.config.thresholds.validate()?;
        let node_name = self
            .node_name
            .ok_or_else(|| anyhow::anyhow!("Node name is required"))?;
        let monitor = self
            .monitor
            .ok_or_else(|| anyhow::anyhow!("Disk monitor is required"))?;
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("Orchestrator is required"))?;
        let thresholds = self.config.thresholds;
        let status = self.status.unwrap_or_else(|| {
            StatusBoard::new(NodeStatus::initial(
                node_name.clone(),
                thresholds.high_percent,
                thresholds.low_percent,
            ))
        });

        Ok(PressureLoop::new(
            node_name,
            monitor,
            runtime,
            orchestrator,
            self.clock,
            self.health.unwrap_or_default(),
            status,
            self.config,
        ))
    }
}

impl Default for PressureLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

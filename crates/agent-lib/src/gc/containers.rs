//! Dead container garbage collection
//!
//! Mirrors the kubelet container GC policy: only containers that exited
//! more than `min_age` ago are eligible; each (pod, container name) keeps
//! its newest `max_per_pod_container` instances; the node keeps at most
//! `max_containers` eligible containers overall, dropping the oldest first.

use crate::models::{DeadContainer, DiskUsage};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, RuntimeError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerGcPolicy {
    /// Minimum time since exit before a container may be removed
    pub min_age: Duration,
    /// Dead instances kept per (pod, container name); `None` keeps all
    pub max_per_pod_container: Option<usize>,
    /// Dead containers kept on the node; `None` keeps all
    pub max_containers: Option<usize>,
}

impl Default for ContainerGcPolicy {
    fn default() -> Self {
        Self {
            min_age: Duration::ZERO,
            max_per_pod_container: Some(1),
            max_containers: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerReclaim {
    pub removed: Vec<String>,
    pub bytes_freed: u64,
}

fn older_than(finished_at: DateTime<Utc>, now: DateTime<Utc>, min_age: Duration) -> bool {
    match (now - finished_at).to_std() {
        Ok(age) => age >= min_age,
        // exited "in the future": clock skew, treat as fresh
        Err(_) => min_age.is_zero(),
    }
}

/// Containers the policy allows removing, oldest first
pub fn select_removable_containers<'a>(
    containers: &'a [DeadContainer],
    policy: &ContainerGcPolicy,
    now: DateTime<Utc>,
) -> Vec<&'a DeadContainer> {
    let eligible: Vec<&DeadContainer> = containers
        .iter()
        .filter(|c| older_than(c.finished_at, now, policy.min_age))
        .collect();

    let mut groups: BTreeMap<(&str, &str), Vec<&DeadContainer>> = BTreeMap::new();
    for container in eligible {
        groups
            .entry((container.pod_id.as_str(), container.name.as_str()))
            .or_default()
            .push(container);
    }

    let mut removable: Vec<&DeadContainer> = Vec::new();
    let mut kept: Vec<&DeadContainer> = Vec::new();
    for (_, mut group) in groups {
        // newest first
        group.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then(a.id.cmp(&b.id)));
        let keep = policy.max_per_pod_container.unwrap_or(usize::MAX);
        for (idx, container) in group.into_iter().enumerate() {
            if idx < keep {
                kept.push(container);
            } else {
                removable.push(container);
            }
        }
    }

    if let Some(max) = policy.max_containers {
        if kept.len() > max {
            kept.sort_by(|a, b| a.finished_at.cmp(&b.finished_at).then(a.id.cmp(&b.id)));
            let excess = kept.len() - max;
            removable.extend(kept.into_iter().take(excess));
        }
    }

    removable.sort_by(|a, b| a.finished_at.cmp(&b.finished_at).then(a.id.cmp(&b.id)));
    removable
}

/// Removes dead containers according to [`ContainerGcPolicy`]
pub struct ContainerGarbageCollector {
    runtime: Arc<dyn ContainerRuntime>,
    policy: ContainerGcPolicy,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl ContainerGarbageCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policy: ContainerGcPolicy,
        logger: StructuredLogger,
        metrics: AgentMetrics,
    ) -> Self {
        Self {
            runtime,
            policy,
            logger,
            metrics,
        }
    }

    pub fn policy(&self) -> &ContainerGcPolicy {
        &self.policy
    }

    /// Remove every container the policy selects, accounting freed bytes against `usage`
    pub async fn collect(
        &self,
        usage: DiskUsage,
        now: DateTime<Utc>,
    ) -> Result<ContainerReclaim, RuntimeError> {
        let containers = self.runtime.list_dead_containers().await?;
        let selected = select_removable_containers(&containers, &self.policy, now);
        let mut reclaim = ContainerReclaim::default();
        let mut current = usage;

        for container in selected {
            match self.runtime.remove_container(&container.id).await {
                Ok(freed) => {
                    let after = current.after_freeing(freed);
                    self.logger.log_container_removed(
                        &container.id,
                        &container.pod_id,
                        freed,
                        current.percent(),
                        after.percent(),
                    );
                    self.metrics.record_container_removed(freed);
                    reclaim.removed.push(container.id.clone());
                    reclaim.bytes_freed += freed;
                    current = after;
                }
                Err(RuntimeError::NotFound { .. }) => {
                    debug!(container_id = %container.id, "Dead container already gone");
                }
                Err(e) => {
                    warn!(container_id = %container.id, error = %e, "Failed to remove dead container");
                }
            }
        }

        Ok(reclaim)
    }
}

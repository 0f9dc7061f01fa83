//! Component health and readiness for the disk pressure agent
//!
//! The pressure loop reports the outcome of each step against one of three
//! components. A component that fails once is degraded; after
//! `unhealthy_after` consecutive failures it is unhealthy and `/healthz`
//! answers 503. The agent is ready once the first disk sample succeeded.

use crate::status::PressureCondition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is reported unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

/// Parts of the pressure loop tracked for health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Disk usage sampling
    DiskMonitor,
    /// Image GC and eviction
    Reclaimer,
    /// Disk-pressure taint on the orchestrator
    TaintController,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::DiskMonitor,
        Component::Reclaimer,
        Component::TaintController,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::DiskMonitor => "disk_monitor",
            Component::Reclaimer => "reclaimer",
            Component::TaintController => "taint_controller",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operating, but the last check failed or pressure is unresolved
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    fn unchecked() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check: None,
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub condition: PressureCondition,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    condition: PressureCondition,
    first_sample_at: Option<DateTime<Utc>>,
    unhealthy_after: u32,
}

/// Shared view of component health, written by the loop and read by the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_unhealthy_after(DEFAULT_UNHEALTHY_AFTER)
    }

    pub fn with_unhealthy_after(unhealthy_after: u32) -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::unchecked()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                components,
                condition: PressureCondition::Unknown,
                first_sample_at: None,
                unhealthy_after: unhealthy_after.max(1),
            })),
        }
    }

    /// The component's last check succeeded
    pub async fn record_success(&self, component: Component, at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::unchecked);
        entry.status = ComponentStatus::Healthy;
        entry.message = None;
        entry.consecutive_failures = 0;
        entry.last_check = Some(at);
    }

    /// The component's last check failed; returns its new status
    pub async fn record_failure(
        &self,
        component: Component,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> ComponentStatus {
        let mut state = self.state.write().await;
        let unhealthy_after = state.unhealthy_after;
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::unchecked);
        entry.consecutive_failures += 1;
        entry.status = if entry.consecutive_failures >= unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        entry.message = Some(message.into());
        entry.last_check = Some(at);
        entry.status
    }

    /// Degrade a component without counting a failure
    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::unchecked);
        if entry.status == ComponentStatus::Healthy {
            entry.status = ComponentStatus::Degraded;
        }
        entry.message = Some(message.into());
    }

    /// A disk sample succeeded; the first one makes the agent ready
    pub async fn record_sample(&self, at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.first_sample_at.get_or_insert(at);
    }

    pub async fn set_condition(&self, condition: PressureCondition) {
        self.state.write().await.condition = condition;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let statuses: Vec<ComponentStatus> =
            state.components.values().map(|c| c.status).collect();
        let status = if statuses.contains(&ComponentStatus::Unhealthy) {
            ComponentStatus::Unhealthy
        } else if statuses.contains(&ComponentStatus::Degraded) {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };
        HealthResponse {
            status,
            condition: state.condition,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let monitor_unhealthy = state
            .components
            .get(&Component::DiskMonitor)
            .is_some_and(|c| c.status == ComponentStatus::Unhealthy);

        let reason = if state.first_sample_at.is_none() {
            Some("No disk usage sample yet".to_string())
        } else if monitor_unhealthy {
            Some("Disk monitor unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_every_component_starts_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.condition, PressureCondition::Unknown);
        assert_eq!(health.components.len(), 3);
        assert!(health.components[&Component::TaintController].last_check.is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_become_unhealthy() {
        let registry = HealthRegistry::new();

        for _ in 0..2 {
            let status = registry
                .record_failure(Component::DiskMonitor, "statvfs failed", at())
                .await;
            assert_eq!(status, ComponentStatus::Degraded);
        }
        let status = registry
            .record_failure(Component::DiskMonitor, "statvfs failed", at())
            .await;

        assert_eq!(status, ComponentStatus::Unhealthy);
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.record_success(Component::DiskMonitor, at()).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components[&Component::DiskMonitor].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_set_degraded_does_not_count_as_failure() {
        let registry = HealthRegistry::with_unhealthy_after(1);
        registry
            .set_degraded(Component::Reclaimer, "nothing left to reclaim")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.components[&Component::Reclaimer].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_ready_after_first_sample() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.record_sample(at()).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_not_ready_while_monitor_unhealthy() {
        let registry = HealthRegistry::with_unhealthy_after(1);
        registry.record_sample(at()).await;
        registry
            .record_failure(Component::DiskMonitor, "device gone", at())
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Disk monitor unhealthy"));
    }

    #[tokio::test]
    async fn test_health_serializes_component_names() {
        let registry = HealthRegistry::new();
        registry.set_condition(PressureCondition::DiskPressure).await;

        let json = serde_json::to_value(registry.health().await).unwrap();

        assert_eq!(json["condition"], "disk_pressure");
        assert_eq!(json["components"]["disk_monitor"]["status"], "healthy");
    }
}

//! Core data models for the disk pressure agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Key of the taint applied while the node is under disk pressure
pub const DISK_PRESSURE_TAINT_KEY: &str = "node.kubernetes.io/disk-pressure";

/// Default usage percentage at which reclamation starts
pub const DEFAULT_HIGH_THRESHOLD_PERCENT: f64 = 85.0;

/// Default usage percentage at which reclamation may stop
pub const DEFAULT_LOW_THRESHOLD_PERCENT: f64 = 80.0;

/// Filesystem usage of the node's image/container storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

impl DiskUsage {
    pub fn new(capacity_bytes: u64, used_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes,
        }
    }

    /// Used space as a percentage of capacity
    pub fn percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.capacity_bytes as f64 * 100.0
    }

    /// Usage after `bytes` have been released
    pub fn after_freeing(&self, bytes: u64) -> Self {
        Self {
            capacity_bytes: self.capacity_bytes,
            used_bytes: self.used_bytes.saturating_sub(bytes),
        }
    }
}

/// Invalid threshold configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("low threshold {low}% must be greater than zero")]
    LowNotPositive { low: f64 },
    #[error("low threshold {low}% must be below high threshold {high}%")]
    LowNotBelowHigh { low: f64, high: f64 },
    #[error("high threshold {high}% must not exceed 100%")]
    HighAboveHundred { high: f64 },
}

/// High/low watermark pair bounding reclamation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high_percent: f64,
    pub low_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_percent: DEFAULT_HIGH_THRESHOLD_PERCENT,
            low_percent: DEFAULT_LOW_THRESHOLD_PERCENT,
        }
    }
}

impl Thresholds {
    /// Create a validated threshold pair
    pub fn new(high_percent: f64, low_percent: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            high_percent,
            low_percent,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.low_percent <= 0.0 {
            return Err(ThresholdError::LowNotPositive {
                low: self.low_percent,
            });
        }
        if self.low_percent >= self.high_percent {
            return Err(ThresholdError::LowNotBelowHigh {
                low: self.low_percent,
                high: self.high_percent,
            });
        }
        if self.high_percent > 100.0 {
            return Err(ThresholdError::HighAboveHundred {
                high: self.high_percent,
            });
        }
        Ok(())
    }

    /// Usage at or above the high threshold requires reclamation
    pub fn is_breached(&self, usage: &DiskUsage) -> bool {
        usage.percent() >= self.high_percent
    }

    /// Usage at or below the low threshold lets reclamation stop
    pub fn is_relieved(&self, usage: &DiskUsage) -> bool {
        usage.percent() <= self.low_percent
    }

    /// Usage strictly above the high threshold after image reclamation
    pub fn requires_eviction(&self, usage: &DiskUsage) -> bool {
        usage.percent() > self.high_percent
    }
}

/// A container image stored on the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub size_bytes: u64,
    pub last_used: DateTime<Utc>,
    /// Number of running containers using this image
    #[serde(default)]
    pub ref_count: u32,
}

impl Image {
    pub fn is_unused(&self) -> bool {
        self.ref_count == 0
    }
}

/// Quality-of-service class of a pod, ordered from first-evicted to last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosClass {
    BestEffort,
    Burstable,
    Guaranteed,
    SystemCritical,
}

impl QosClass {
    /// Position in eviction order; lower ranks are evicted first
    pub fn eviction_rank(self) -> u8 {
        match self {
            QosClass::BestEffort => 0,
            QosClass::Burstable => 1,
            QosClass::Guaranteed => 2,
            QosClass::SystemCritical => 3,
        }
    }
}

impl Ord for QosClass {
    fn cmp(&self, other: &Self) -> Ordering {
        self.eviction_rank().cmp(&other.eviction_rank())
    }
}

impl PartialOrd for QosClass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QosClass::BestEffort => write!(f, "BestEffort"),
            QosClass::Burstable => write!(f, "Burstable"),
            QosClass::Guaranteed => write!(f, "Guaranteed"),
            QosClass::SystemCritical => write!(f, "SystemCritical"),
        }
    }
}

/// A pod running on the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub id: String,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub qos: QosClass,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Bytes held on the node's storage by the pod (writable layers, logs, emptyDir)
    #[serde(default)]
    pub footprint_bytes: u64,
    /// Image ids used by the pod's containers
    #[serde(default)]
    pub images: Vec<String>,
    /// Whether the pod tolerates the disk-pressure taint
    #[serde(default)]
    pub tolerates_disk_pressure: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Pod {
    /// Workload identity that survives recreation by a replica controller
    pub fn identity(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// An exited container whose writable layer is still on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadContainer {
    pub id: String,
    pub pod_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Scheduling marker attached to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn disk_pressure() -> Self {
        Self {
            key: DISK_PRESSURE_TAINT_KEY.to_string(),
            value: None,
            effect: TaintEffect::NoSchedule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintState {
    Untainted,
    Tainted,
}

/// Mutable per-node state owned by the pressure loop
#[derive(Debug, Clone, Serialize)]
pub struct NodeState {
    pub name: String,
    pub thresholds: Thresholds,
    pub taint: TaintState,
    /// Most recent successful sample
    pub usage: Option<DiskUsage>,
    pub last_sampled_at: Option<DateTime<Utc>>,
    /// Consecutive ticks that ended above the high threshold
    pub unresolved_ticks: u32,
}

impl NodeState {
    pub fn new(name: impl Into<String>, thresholds: Thresholds) -> Self {
        Self {
            name: name.into(),
            thresholds,
            taint: TaintState::Untainted,
            usage: None,
            last_sampled_at: None,
            unresolved_ticks: 0,
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.taint == TaintState::Tainted
    }

    pub fn observe(&mut self, usage: DiskUsage, at: DateTime<Utc>) {
        self.usage = Some(usage);
        self.last_sampled_at = Some(at);
    }

    pub fn usage_percent(&self) -> Option<f64> {
        self.usage.map(|u| u.percent())
    }
}

/// A pod eviction as reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionEvent {
    pub pod_id: String,
    pub pod_name: String,
    pub namespace: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub usage_before_percent: f64,
    pub usage_after_percent: f64,
    pub force_killed: bool,
}

impl EvictionEvent {
    pub const REASON_DISK_PRESSURE: &'static str = "DiskPressure";

    pub fn identity(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percent() {
        let usage = DiskUsage::new(1000, 870);
        assert!((usage.percent() - 87.0).abs() < 1e-9);
        assert_eq!(DiskUsage::new(0, 0).percent(), 0.0);
        assert_eq!(usage.after_freeing(2000).used_bytes, 0);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::new(85.0, 80.0).is_ok());
        assert_eq!(
            Thresholds::new(80.0, 85.0),
            Err(ThresholdError::LowNotBelowHigh {
                low: 85.0,
                high: 80.0
            })
        );
        assert!(Thresholds::new(101.0, 80.0).is_err());
        assert!(Thresholds::new(85.0, 0.0).is_err());
    }

    #[test]
    fn test_threshold_boundaries() {
        let t = Thresholds::default();
        assert!(t.is_breached(&DiskUsage::new(100, 85)));
        assert!(!t.requires_eviction(&DiskUsage::new(100, 85)));
        assert!(t.is_relieved(&DiskUsage::new(100, 80)));
        assert!(!t.is_relieved(&DiskUsage::new(100, 81)));
    }

    #[test]
    fn test_qos_total_order() {
        let mut classes = vec![
            QosClass::SystemCritical,
            QosClass::BestEffort,
            QosClass::Guaranteed,
            QosClass::Burstable,
        ];
        classes.sort();
        assert_eq!(
            classes,
            vec![
                QosClass::BestEffort,
                QosClass::Burstable,
                QosClass::Guaranteed,
                QosClass::SystemCritical
            ]
        );
    }

    #[test]
    fn test_pod_deserializes_with_defaults() {
        let pod: Pod = serde_json::from_str(
            r#"{"id":"p1","name":"mysql","qos":"best_effort","created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(pod.namespace, "default");
        assert_eq!(pod.identity(), "default/mysql");
        assert!(!pod.tolerates_disk_pressure);
    }
}

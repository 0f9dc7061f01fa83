//! Eviction ordering
//!
//! Pods are compared by, in order:
//! 1. toleration of the disk-pressure taint (non-tolerating pods first)
//! 2. QoS class (BestEffort < Burstable < Guaranteed < SystemCritical)
//! 3. priority (lower first)
//! 4. creation time (newer first)
//! 5. pod id

use crate::models::Pod;
use std::cmp::Ordering;

/// Total order over pods; `Less` means `a` is evicted before `b`
pub fn compare_for_eviction(a: &Pod, b: &Pod) -> Ordering {
    a.tolerates_disk_pressure
        .cmp(&b.tolerates_disk_pressure)
        .then_with(|| a.qos.cmp(&b.qos))
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort pods into eviction order
pub fn rank_pods(mut pods: Vec<Pod>) -> Vec<Pod> {
    pods.sort_by(compare_for_eviction);
    pods
}

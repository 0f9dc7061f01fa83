//! Pod eviction under disk pressure
//!
//! This module provides:
//! - Eviction ranking (QoS class, priority, age, taint toleration)
//! - The eviction manager that terminates pods one at a time
//! - Detection of evict/recreate cycles per workload

mod cycles;
mod manager;
mod ranking;

pub use cycles::{CycleDetector, CycleObservation, DEFAULT_CYCLE_WARNING_THRESHOLD, DEFAULT_CYCLE_WINDOW};
pub use manager::{EvictionConfig, EvictionManager, EvictionOutcome};
pub use ranking::{compare_for_eviction, rank_pods};

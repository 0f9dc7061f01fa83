//! Evict/recreate cycle detection
//!
//! A replica controller that recreates an evicted pod on a node whose
//! pressure it re-triggers produces an unbounded evict, untaint, recreate,
//! breach loop. The detector does not break the loop; it counts
//! re-evictions of the same workload inside a sliding window so the loop
//! is visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub const DEFAULT_CYCLE_WINDOW: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CYCLE_WARNING_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleObservation {
    pub identity: String,
    /// Re-evictions of this workload within the window
    pub cycles: u32,
    pub warn: bool,
}

#[derive(Debug)]
pub struct CycleDetector {
    window: Duration,
    warning_threshold: u32,
    evictions: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_WINDOW, DEFAULT_CYCLE_WARNING_THRESHOLD)
    }
}

impl CycleDetector {
    pub fn new(window: Duration, warning_threshold: u32) -> Self {
        Self {
            window,
            warning_threshold,
            evictions: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn within_window(&self, then: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - then)
            .to_std()
            .map(|age| age <= self.window)
            .unwrap_or(true)
    }

    /// Record an eviction of `identity` at `at`
    pub fn record_eviction(&mut self, identity: &str, at: DateTime<Utc>) -> CycleObservation {
        let window = self.window;
        let entries = self.evictions.entry(identity.to_string()).or_default();
        entries.retain(|then| {
            (at - *then)
                .to_std()
                .map(|age| age <= window)
                .unwrap_or(true)
        });
        entries.push_back(at);

        let cycles = (entries.len() - 1) as u32;
        CycleObservation {
            identity: identity.to_string(),
            cycles,
            warn: cycles >= self.warning_threshold,
        }
    }

    /// Current cycle count for `identity`
    pub fn cycles(&self, identity: &str, now: DateTime<Utc>) -> u32 {
        self.evictions
            .get(identity)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|then| self.within_window(**then, now))
                    .count()
                    .saturating_sub(1) as u32
            })
            .unwrap_or(0)
    }

    /// Cycle counts of every workload evicted within the window
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(String, u32)> {
        let mut counts: Vec<(String, u32)> = self
            .evictions
            .keys()
            .map(|identity| (identity.clone(), self.cycles(identity, now)))
            .collect();
        counts.sort();
        counts
    }

    /// Drop workloads with no eviction inside the window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.evictions.retain(|_, entries| {
            entries.retain(|then| (now - *then).to_std().map(|age| age <= window).unwrap_or(true));
            !entries.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    #[test]
    fn test_first_eviction_is_not_a_cycle() {
        let mut detector = CycleDetector::default();
        let obs = detector.record_eviction("default/mysql", at(0));
        assert_eq!(obs.cycles, 0);
        assert!(!obs.warn);
    }

    #[test]
    fn test_warns_on_second_cycle_within_window() {
        let mut detector = CycleDetector::default();
        detector.record_eviction("default/mysql", at(0));

        let first = detector.record_eviction("default/mysql", at(1));
        assert_eq!(first.cycles, 1);
        assert!(!first.warn);

        let second = detector.record_eviction("default/mysql", at(2));
        assert_eq!(second.cycles, 2);
        assert!(second.warn);

        assert_eq!(detector.cycles("default/mysql", at(2)), 2);
        assert_eq!(detector.cycles("default/postgres", at(2)), 0);
    }

    #[test]
    fn test_evictions_outside_window_do_not_count() {
        let mut detector = CycleDetector::new(Duration::from_secs(5 * 60), 2);
        detector.record_eviction("default/mysql", at(0));
        detector.record_eviction("default/mysql", at(3));

        let obs = detector.record_eviction("default/mysql", at(20));
        assert_eq!(obs.cycles, 0);

        detector.prune(at(40));
        assert!(detector.snapshot(at(40)).is_empty());
    }

    #[test]
    fn test_identities_are_tracked_separately() {
        let mut detector = CycleDetector::default();
        detector.record_eviction("default/mysql", at(0));
        detector.record_eviction("default/postgres", at(0));
        detector.record_eviction("default/mysql", at(1));

        assert_eq!(
            detector.snapshot(at(1)),
            vec![
                ("default/mysql".to_string(), 1),
                ("default/postgres".to_string(), 0)
            ]
        );
    }
}

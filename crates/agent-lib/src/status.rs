//! Read-only view of the pressure loop for the HTTP API
//!
//! The loop owns [`crate::models::NodeState`]; after each tick it publishes
//! a [`NodeStatus`] snapshot and the tick's events here. Readers never
//! touch the loop's state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of events retained
const DEFAULT_EVENT_CAPACITY: usize = 500;

/// Node condition derived from the last tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureCondition {
    Unknown,
    NoPressure,
    DiskPressure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub condition: PressureCondition,
    pub tainted: bool,
    pub usage_percent: Option<f64>,
    pub used_bytes: Option<u64>,
    pub capacity_bytes: Option<u64>,
    pub high_threshold_percent: f64,
    pub low_threshold_percent: f64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub unresolved_ticks: u32,
    pub ticks: u64,
}

impl NodeStatus {
    pub fn initial(node_name: impl Into<String>, high: f64, low: f64) -> Self {
        Self {
            node_name: node_name.into(),
            condition: PressureCondition::Unknown,
            tainted: false,
            usage_percent: None,
            used_bytes: None,
            capacity_bytes: None,
            high_threshold_percent: high,
            low_threshold_percent: low,
            last_tick_at: None,
            last_outcome: None,
            unresolved_ticks: 0,
            ticks: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ImageDeleted,
    ContainerRemoved,
    PodEvicted,
    TaintAdded,
    TaintRemoved,
    EvictionCycle,
    PressureUnresolved,
    SampleFailed,
}

impl EventKind {
    /// Parse the short names accepted by the events endpoint
    pub fn parse(value: &str) -> Option<Vec<EventKind>> {
        match value {
            "image" => Some(vec![EventKind::ImageDeleted]),
            "container" => Some(vec![EventKind::ContainerRemoved]),
            "pod" => Some(vec![EventKind::PodEvicted]),
            "taint" => Some(vec![EventKind::TaintAdded, EventKind::TaintRemoved]),
            "cycle" => Some(vec![EventKind::EvictionCycle]),
            "pressure" => Some(vec![EventKind::PressureUnresolved, EventKind::SampleFailed]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Image, container, pod or workload the event is about
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_before_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_after_percent: Option<f64>,
}

/// Shared status snapshot, recent events and cycle counts
#[derive(Debug, Clone)]
pub struct StatusBoard {
    status: Arc<RwLock<NodeStatus>>,
    events: Arc<RwLock<VecDeque<AgentEvent>>>,
    cycles: Arc<DashMap<String, u32>>,
    event_capacity: usize,
}

impl StatusBoard {
    pub fn new(initial: NodeStatus) -> Self {
        Self::with_capacity(initial, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(initial: NodeStatus, event_capacity: usize) -> Self {
        Self {
            status: Arc::new(RwLock::new(initial)),
            events: Arc::new(RwLock::new(VecDeque::new())),
            cycles: Arc::new(DashMap::new()),
            event_capacity: event_capacity.max(1),
        }
    }

    pub async fn publish(&self, status: NodeStatus) {
        *self.status.write().await = status;
    }

    pub async fn status(&self) -> NodeStatus {
        self.status.read().await.clone()
    }

    pub async fn push_events(&self, new_events: impl IntoIterator<Item = AgentEvent>) {
        let mut events = self.events.write().await;
        for event in new_events {
            if events.len() >= self.event_capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// Most recent events first, optionally filtered by kind
    pub async fn recent_events(&self, kinds: Option<&[EventKind]>, limit: usize) -> Vec<AgentEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .rev()
            .filter(|e| kinds.map(|k| k.contains(&e.kind)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Replace the cycle counts with the detector's current snapshot
    pub fn set_cycles(&self, counts: Vec<(String, u32)>) {
        self.cycles.clear();
        for (identity, count) in counts {
            self.cycles.insert(identity, count);
        }
    }

    /// Cycle counts sorted by count (highest first), then identity
    pub fn cycles(&self) -> Vec<(String, u32)> {
        let mut counts: Vec<(String, u32)> = self
            .cycles
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, subject: &str) -> AgentEvent {
        AgentEvent {
            kind,
            timestamp: Utc::now(),
            subject: subject.to_string(),
            message: String::new(),
            usage_before_percent: None,
            usage_after_percent: None,
        }
    }

    #[tokio::test]
    async fn test_events_are_bounded_and_newest_first() {
        let board = StatusBoard::with_capacity(NodeStatus::initial("n", 85.0, 80.0), 2);
        board
            .push_events(vec![
                event(EventKind::ImageDeleted, "a"),
                event(EventKind::ImageDeleted, "b"),
                event(EventKind::PodEvicted, "c"),
            ])
            .await;

        let recent = board.recent_events(None, 10).await;
        let subjects: Vec<&str> = recent.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_event_kind_filter() {
        let board = StatusBoard::new(NodeStatus::initial("n", 85.0, 80.0));
        board
            .push_events(vec![
                event(EventKind::TaintAdded, "n"),
                event(EventKind::PodEvicted, "default/mysql"),
                event(EventKind::TaintRemoved, "n"),
            ])
            .await;

        let kinds = EventKind::parse("taint").unwrap();
        let taints = board.recent_events(Some(&kinds), 10).await;
        assert_eq!(taints.len(), 2);
        assert_eq!(taints[0].kind, EventKind::TaintRemoved);
        assert!(EventKind::parse("bogus").is_none());
    }

    #[tokio::test]
    async fn test_publish_and_cycles() {
        let board = StatusBoard::new(NodeStatus::initial("n", 85.0, 80.0));
        let mut status = board.status().await;
        assert_eq!(status.condition, PressureCondition::Unknown);

        status.condition = PressureCondition::DiskPressure;
        status.tainted = true;
        board.publish(status).await;
        assert!(board.status().await.tainted);

        board.set_cycles(vec![("default/a".to_string(), 1), ("default/b".to_string(), 3)]);
        assert_eq!(board.cycles()[0], ("default/b".to_string(), 3));
    }
}

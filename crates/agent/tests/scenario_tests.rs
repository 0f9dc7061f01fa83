//! Scenario replay tests: load a node from a JSON scenario file and drive
//! the pressure loop the same way the agent binary wires it up

use agent_lib::{
    EventKind, HealthRegistry, ManualClock, NodeStatus, PressureCondition, PressureLoopBuilder,
    SimulatedNode, StatusBoard, TickOutcome,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const IMAGE_CLEANUP: &str = r#"{
    "node_name": "worker-1",
    "capacity_bytes": 6000,
    "base_used_bytes": 4020,
    "images": [
        {"id": "old-app", "size_bytes": 600, "last_used": "2024-03-01T05:00:00Z"},
        {"id": "old-lib", "size_bytes": 300, "last_used": "2024-03-01T07:00:00Z"},
        {"id": "nginx", "size_bytes": 200, "last_used": "2024-03-01T08:00:00Z", "ref_count": 1}
    ],
    "pods": [
        {
            "id": "web",
            "name": "web",
            "qos": "burstable",
            "created_at": "2024-02-29T08:00:00Z",
            "footprint_bytes": 100,
            "images": ["nginx"]
        }
    ]
}"#;

const EVICTION_CYCLE: &str = r#"{
    "node_name": "worker-1",
    "capacity_bytes": 1000,
    "base_used_bytes": 780,
    "recreate_evicted_pods": true,
    "images": [
        {"id": "mysql:8", "size_bytes": 40, "last_used": "2024-03-01T07:00:00Z", "ref_count": 1}
    ],
    "pods": [
        {
            "id": "mysql",
            "name": "mysql",
            "qos": "best_effort",
            "created_at": "2024-02-29T08:00:00Z",
            "footprint_bytes": 60,
            "images": ["mysql:8"]
        },
        {
            "id": "myapp",
            "name": "myapp",
            "qos": "guaranteed",
            "created_at": "2024-02-29T08:00:00Z",
            "footprint_bytes": 10
        }
    ]
}"#;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

struct Replay {
    _dir: TempDir,
    node: Arc<SimulatedNode>,
    clock: Arc<ManualClock>,
    status: StatusBoard,
    pressure: agent_lib::PressureLoop,
}

fn replay(scenario: &str) -> Replay {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.json");
    std::fs::write(&path, scenario).unwrap();

    let clock = Arc::new(ManualClock::new(t0()));
    let node = Arc::new(SimulatedNode::from_scenario_file(&path, clock.clone()).unwrap());
    let status = StatusBoard::new(NodeStatus::initial("worker-1", 85.0, 80.0));
    let pressure = PressureLoopBuilder::new()
        .node_name(node.node_name())
        .monitor(node.clone())
        .runtime(node.clone())
        .orchestrator(node.clone())
        .clock(clock.clone())
        .health(HealthRegistry::new())
        .status(status.clone())
        .build()
        .unwrap();

    Replay {
        _dir: dir,
        node,
        clock,
        status,
        pressure,
    }
}

#[tokio::test]
async fn test_image_cleanup_replay() {
    let mut r = replay(IMAGE_CLEANUP);

    let report = r.pressure.tick().await;

    assert_eq!(report.outcome, TickOutcome::Relieved);
    assert_eq!(r.node.deleted_images(), vec!["old-app"]);
    assert!(r.node.evictions().is_empty());
    assert!(r.node.taint_history().is_empty());

    let status = r.status.status().await;
    assert_eq!(status.condition, PressureCondition::NoPressure);
    assert!(!status.tainted);
    assert_eq!(status.used_bytes, Some(4620));
    assert_eq!(status.last_outcome.as_deref(), Some("relieved"));

    let events = r.status.recent_events(None, 10).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::ImageDeleted);
    assert_eq!(events[0].subject, "old-app");
}

#[tokio::test]
async fn test_eviction_cycle_replay() {
    let mut r = replay(EVICTION_CYCLE);

    for _ in 0..3 {
        r.pressure.tick().await;
        r.clock.advance(Duration::from_secs(10));
    }

    let evicted: Vec<String> = r.node.evictions().into_iter().map(|e| e.pod_name).collect();
    assert_eq!(evicted, vec!["mysql", "mysql", "mysql"]);
    assert_eq!(r.node.recreations(), 3);
    assert_eq!(r.node.pod_ids(), vec!["myapp", "mysql"]);

    assert_eq!(r.status.cycles(), vec![("default/mysql".to_string(), 2)]);
    let warnings = r
        .status
        .recent_events(Some(&[EventKind::EvictionCycle]), 10)
        .await;
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].subject, "default/mysql");

    let status = r.status.status().await;
    assert_eq!(status.ticks, 3);
    assert!(!status.tainted);
}

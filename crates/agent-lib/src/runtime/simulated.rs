//! In-memory node used for tests, demos and scenario replay
//!
//! Usage is accounted as `base_used_bytes` plus every image, running pod
//! footprint and dead container on the node. An optional replica
//! controller recreates evicted pods (re-pulling their images) as soon as
//! the disk-pressure taint is removed, which reproduces the
//! evict/untaint/recreate/breach cycle.

use super::{ContainerRuntime, OrchestratorError, Orchestrator, RuntimeError};
use crate::clock::{Clock, SystemClock};
use crate::models::{DeadContainer, DiskUsage, EvictionEvent, Image, Pod, Taint};
use crate::monitor::{DiskMonitor, MonitorError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Initial contents of a simulated node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub node_name: String,
    pub capacity_bytes: u64,
    /// Space used by everything the agent does not manage
    #[serde(default)]
    pub base_used_bytes: u64,
    /// Reference counts are raised to at least the number of listed pods
    /// using each image
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub dead_containers: Vec<DeadContainer>,
    /// Recreate evicted pods once the node is untainted
    #[serde(default)]
    pub recreate_evicted_pods: bool,
    /// Size of images pulled on recreation when the image is not on the node
    #[serde(default)]
    pub image_sizes: HashMap<String, u64>,
}

impl Scenario {
    pub fn new(node_name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            node_name: node_name.into(),
            capacity_bytes,
            base_used_bytes: 0,
            images: Vec::new(),
            pods: Vec::new(),
            dead_containers: Vec::new(),
            recreate_evicted_pods: false,
            image_sizes: HashMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario file {}", path.display()))
    }
}

/// Taint add/remove as observed by the simulated orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct TaintChange {
    pub added: bool,
    pub at: DateTime<Utc>,
}

struct SimState {
    node_name: String,
    capacity_bytes: u64,
    base_used_bytes: u64,
    images: BTreeMap<String, Image>,
    pods: BTreeMap<String, Pod>,
    dead_containers: BTreeMap<String, DeadContainer>,
    image_sizes: HashMap<String, u64>,
    taints: Vec<Taint>,
    taint_history: Vec<TaintChange>,
    evictions: Vec<EvictionEvent>,
    awaiting_recreation: Vec<Pod>,
    recreate_evicted_pods: bool,
    recreations: u32,
    failing_samples: u32,
    failing_image_listings: u32,
    hanging_pods: HashSet<String>,
    racing_images: HashSet<String>,
    deleted_images: Vec<String>,
}

impl SimState {
    fn used_bytes(&self) -> u64 {
        let images: u64 = self.images.values().map(|i| i.size_bytes).sum();
        let pods: u64 = self.pods.values().map(|p| p.footprint_bytes).sum();
        let dead: u64 = self.dead_containers.values().map(|c| c.size_bytes).sum();
        self.base_used_bytes + images + pods + dead
    }

    fn usage(&self) -> DiskUsage {
        DiskUsage::new(self.capacity_bytes, self.used_bytes())
    }

    /// Start a pod, pulling any image it needs
    fn admit_pod(&mut self, pod: Pod, now: DateTime<Utc>) {
        for image_id in &pod.images {
            let size = self.image_sizes.get(image_id).copied().unwrap_or(0);
            let image = self.images.entry(image_id.clone()).or_insert_with(|| {
                debug!(image_id = %image_id, size_bytes = size, "Pulling image");
                Image {
                    id: image_id.clone(),
                    size_bytes: size,
                    last_used: now,
                    ref_count: 0,
                }
            });
            image.ref_count += 1;
            image.last_used = now;
        }
        self.pods.insert(pod.id.clone(), pod);
    }

    /// Remove a running pod and release its image references
    fn release_pod(&mut self, pod_id: &str, now: DateTime<Utc>) -> Result<Pod, RuntimeError> {
        let pod = self.pods.remove(pod_id).ok_or_else(|| RuntimeError::NotFound {
            kind: "pod",
            id: pod_id.to_string(),
        })?;
        for image_id in &pod.images {
            if let Some(image) = self.images.get_mut(image_id) {
                image.ref_count = image.ref_count.saturating_sub(1);
                image.last_used = now;
            }
        }
        if self.recreate_evicted_pods {
            self.awaiting_recreation.push(pod.clone());
        }
        Ok(pod)
    }
}

/// Simulated node implementing the monitor, runtime and orchestrator seams
pub struct SimulatedNode {
    state: Mutex<SimState>,
    clock: Arc<dyn Clock>,
}

impl SimulatedNode {
    pub fn new(scenario: Scenario) -> Self {
        Self::with_clock(scenario, Arc::new(SystemClock))
    }

    pub fn with_clock(scenario: Scenario, clock: Arc<dyn Clock>) -> Self {
        let mut image_sizes = scenario.image_sizes;
        for image in &scenario.images {
            image_sizes.entry(image.id.clone()).or_insert(image.size_bytes);
        }

        let mut images: BTreeMap<String, Image> = scenario
            .images
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();
        let mut pod_refs: HashMap<&str, u32> = HashMap::new();
        for image_id in scenario.pods.iter().flat_map(|p| p.images.iter()) {
            *pod_refs.entry(image_id.as_str()).or_default() += 1;
        }
        for image in images.values_mut() {
            let used_by = pod_refs.get(image.id.as_str()).copied().unwrap_or(0);
            if image.ref_count < used_by {
                debug!(
                    image_id = %image.id,
                    declared = image.ref_count,
                    used_by,
                    "Raising image reference count to match running pods"
                );
                image.ref_count = used_by;
            }
        }

        let state = SimState {
            node_name: scenario.node_name,
            capacity_bytes: scenario.capacity_bytes,
            base_used_bytes: scenario.base_used_bytes,
            images,
            pods: scenario.pods.into_iter().map(|p| (p.id.clone(), p)).collect(),
            dead_containers: scenario
                .dead_containers
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            image_sizes,
            taints: Vec::new(),
            taint_history: Vec::new(),
            evictions: Vec::new(),
            awaiting_recreation: Vec::new(),
            recreate_evicted_pods: scenario.recreate_evicted_pods,
            recreations: 0,
            failing_samples: 0,
            failing_image_listings: 0,
            hanging_pods: HashSet::new(),
            racing_images: HashSet::new(),
            deleted_images: Vec::new(),
        };

        Self {
            state: Mutex::new(state),
            clock,
        }
    }

    /// Load a node from a JSON scenario file
    pub fn from_scenario_file(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let scenario = Scenario::from_file(path)?;
        info!(
            node = %scenario.node_name,
            images = scenario.images.len(),
            pods = scenario.pods.len(),
            "Loaded simulated node scenario"
        );
        Ok(Self::with_clock(scenario, clock))
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn node_name(&self) -> String {
        self.lock().node_name.clone()
    }

    pub fn usage(&self) -> DiskUsage {
        self.lock().usage()
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.lock().images.keys().cloned().collect()
    }

    pub fn pod_ids(&self) -> Vec<String> {
        self.lock().pods.keys().cloned().collect()
    }

    pub fn dead_container_ids(&self) -> Vec<String> {
        self.lock().dead_containers.keys().cloned().collect()
    }

    /// Image ids in deletion order
    pub fn deleted_images(&self) -> Vec<String> {
        self.lock().deleted_images.clone()
    }

    pub fn is_tainted(&self) -> bool {
        !self.lock().taints.is_empty()
    }

    pub fn taint_history(&self) -> Vec<TaintChange> {
        self.lock().taint_history.clone()
    }

    pub fn evictions(&self) -> Vec<EvictionEvent> {
        self.lock().evictions.clone()
    }

    pub fn recreations(&self) -> u32 {
        self.lock().recreations
    }

    /// Add unmanaged usage (logs, other tenants of the filesystem)
    pub fn add_base_usage(&self, bytes: u64) {
        self.lock().base_used_bytes += bytes;
    }

    pub fn pull_image(&self, image: Image) {
        let mut state = self.lock();
        state.image_sizes.insert(image.id.clone(), image.size_bytes);
        state.images.insert(image.id.clone(), image);
    }

    pub fn start_pod(&self, pod: Pod) {
        let now = self.clock.now();
        self.lock().admit_pod(pod, now);
    }

    /// Make the next `count` samples fail with an I/O error
    pub fn fail_next_samples(&self, count: u32) {
        self.lock().failing_samples = count;
    }

    /// Fail the next `count` image listings with `Unavailable`
    pub fn fail_next_image_listings(&self, count: u32) {
        self.lock().failing_image_listings = count;
    }

    /// Make graceful stop of `pod_id` block forever
    pub fn hang_on_stop(&self, pod_id: &str) {
        self.lock().hanging_pods.insert(pod_id.to_string());
    }

    /// A container grabs `image_id` right before the runtime deletes it
    pub fn reference_on_delete(&self, image_id: &str) {
        self.lock().racing_images.insert(image_id.to_string());
    }

    fn recreate_evicted(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.awaiting_recreation);
        for pod in pending {
            info!(pod = %pod.identity(), "Replica controller recreating evicted pod");
            state.recreations += 1;
            state.admit_pod(pod, now);
        }
    }
}

#[async_trait]
impl DiskMonitor for SimulatedNode {
    async fn sample(&self) -> Result<DiskUsage, MonitorError> {
        let mut state = self.lock();
        if state.failing_samples > 0 {
            state.failing_samples -= 1;
            return Err(MonitorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated statfs failure",
            )));
        }
        Ok(state.usage())
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedNode {
    async fn list_images(&self) -> Result<Vec<Image>, RuntimeError> {
        let mut state = self.lock();
        if state.failing_image_listings > 0 {
            state.failing_image_listings -= 1;
            return Err(RuntimeError::Unavailable(
                "simulated image service failure".to_string(),
            ));
        }
        Ok(state.images.values().cloned().collect())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, RuntimeError> {
        Ok(self.lock().pods.values().cloned().collect())
    }

    async fn list_dead_containers(&self) -> Result<Vec<DeadContainer>, RuntimeError> {
        Ok(self.lock().dead_containers.values().cloned().collect())
    }

    async fn remove_image(&self, image_id: &str) -> Result<u64, RuntimeError> {
        let mut state = self.lock();
        let racing = state.racing_images.remove(image_id);
        let image = state
            .images
            .get_mut(image_id)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "image",
                id: image_id.to_string(),
            })?;
        if racing {
            image.ref_count += 1;
        }
        if image.ref_count > 0 {
            return Err(RuntimeError::ImageInUse {
                image_id: image_id.to_string(),
                ref_count: image.ref_count,
            });
        }
        let size = image.size_bytes;
        state.images.remove(image_id);
        state.deleted_images.push(image_id.to_string());
        Ok(size)
    }

    async fn remove_container(&self, container_id: &str) -> Result<u64, RuntimeError> {
        self.lock()
            .dead_containers
            .remove(container_id)
            .map(|c| c.size_bytes)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "container",
                id: container_id.to_string(),
            })
    }

    async fn stop_pod(&self, pod_id: &str) -> Result<(), RuntimeError> {
        let hangs = self.lock().hanging_pods.contains(pod_id);
        if hangs {
            std::future::pending::<()>().await;
        }
        let now = self.clock.now();
        self.lock().release_pod(pod_id, now).map(|_| ())
    }

    async fn kill_pod(&self, pod_id: &str) -> Result<(), RuntimeError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.hanging_pods.remove(pod_id);
        state.release_pod(pod_id, now).map(|_| ())
    }
}

#[async_trait]
impl Orchestrator for SimulatedNode {
    async fn apply_taint(&self, _node: &str, taint: &Taint) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.taints.contains(taint) {
            state.taints.push(taint.clone());
            state.taint_history.push(TaintChange { added: true, at: now });
        }
        Ok(())
    }

    async fn remove_taint(&self, _node: &str, taint: &Taint) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            let before = state.taints.len();
            state.taints.retain(|t| t != taint);
            if state.taints.len() != before {
                state.taint_history.push(TaintChange { added: false, at: now });
            }
        }
        self.recreate_evicted();
        Ok(())
    }

    async fn report_eviction(
        &self,
        _node: &str,
        event: &EvictionEvent,
    ) -> Result<(), OrchestratorError> {
        self.lock().evictions.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QosClass;
    use chrono::TimeZone;
    use std::io::Write;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn pod(id: &str, images: &[&str], footprint: u64) -> Pod {
        Pod {
            id: id.to_string(),
            name: id.to_string(),
            namespace: "default".to_string(),
            qos: QosClass::Burstable,
            priority: 0,
            created_at: t0(),
            footprint_bytes: footprint,
            images: images.iter().map(|s| s.to_string()).collect(),
            tolerates_disk_pressure: false,
        }
    }

    fn image(id: &str, size: u64, refs: u32) -> Image {
        Image {
            id: id.to_string(),
            size_bytes: size,
            last_used: t0(),
            ref_count: refs,
        }
    }

    #[tokio::test]
    async fn test_usage_accounting() {
        let mut scenario = Scenario::new("node-a", 1000);
        scenario.base_used_bytes = 100;
        scenario.images = vec![image("nginx", 200, 1)];
        scenario.pods = vec![pod("web", &["nginx"], 50)];
        let node = SimulatedNode::new(scenario);

        let usage = node.sample().await.unwrap();
        assert_eq!(usage.used_bytes, 350);
        assert_eq!(usage.capacity_bytes, 1000);
    }

    #[tokio::test]
    async fn test_remove_referenced_image_fails_closed() {
        let mut scenario = Scenario::new("node-a", 1000);
        scenario.images = vec![image("nginx", 200, 1), image("redis", 100, 0)];
        let node = SimulatedNode::new(scenario);

        assert!(matches!(
            node.remove_image("nginx").await,
            Err(RuntimeError::ImageInUse { ref_count: 1, .. })
        ));

        node.reference_on_delete("redis");
        assert!(matches!(
            node.remove_image("redis").await,
            Err(RuntimeError::ImageInUse { .. })
        ));
        assert_eq!(node.image_ids(), vec!["nginx", "redis"]);
    }

    #[tokio::test]
    async fn test_stop_pod_releases_image_references() {
        let mut scenario = Scenario::new("node-a", 1000);
        scenario.images = vec![image("mysql", 300, 1)];
        scenario.pods = vec![pod("db", &["mysql"], 40)];
        let node = SimulatedNode::new(scenario);

        node.stop_pod("db").await.unwrap();

        let images = node.list_images().await.unwrap();
        assert_eq!(images[0].ref_count, 0);
        assert_eq!(node.remove_image("mysql").await.unwrap(), 300);
        assert_eq!(node.usage().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_replica_controller_recreates_on_untaint() {
        let mut scenario = Scenario::new("node-a", 1000);
        scenario.images = vec![image("mysql", 300, 1)];
        scenario.pods = vec![pod("db", &["mysql"], 40)];
        scenario.recreate_evicted_pods = true;
        let node = SimulatedNode::new(scenario);
        let taint = Taint::disk_pressure();

        node.apply_taint("node-a", &taint).await.unwrap();
        node.stop_pod("db").await.unwrap();
        node.remove_image("mysql").await.unwrap();
        assert_eq!(node.usage().used_bytes, 0);

        node.remove_taint("node-a", &taint).await.unwrap();

        assert_eq!(node.recreations(), 1);
        assert_eq!(node.pod_ids(), vec!["db"]);
        // image re-pulled at its original size
        assert_eq!(node.usage().used_bytes, 340);
        assert_eq!(node.taint_history().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_samples() {
        let node = SimulatedNode::new(Scenario::new("node-a", 1000));
        node.fail_next_samples(1);
        assert!(node.sample().await.is_err());
        assert!(node.sample().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_image_listings() {
        let node = SimulatedNode::new(Scenario::new("node-a", 1000));
        node.fail_next_image_listings(1);
        assert!(matches!(
            node.list_images().await,
            Err(RuntimeError::Unavailable(_))
        ));
        assert!(node.list_images().await.is_ok());
    }

    #[tokio::test]
    async fn test_image_refs_follow_running_pods() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "node_name": "node-a",
                "capacity_bytes": 1000,
                "images": [
                    {"id": "nginx", "size_bytes": 200, "last_used": "2024-01-01T00:00:00Z"},
                    {"id": "redis", "size_bytes": 100, "last_used": "2024-01-01T00:00:00Z", "ref_count": 3}
                ],
                "pods": [
                    {"id": "web", "name": "web", "qos": "burstable",
                     "created_at": "2024-01-01T00:00:00Z", "images": ["nginx"]},
                    {"id": "web-2", "name": "web-2", "qos": "burstable",
                     "created_at": "2024-01-01T00:00:00Z", "images": ["nginx", "redis"]}
                ]
            }"#,
        )
        .unwrap();
        let node = SimulatedNode::new(scenario);

        let images = node.list_images().await.unwrap();
        assert_eq!(images[0].id, "nginx");
        assert_eq!(images[0].ref_count, 2);
        // declared counts above the pod references are kept
        assert_eq!(images[1].ref_count, 3);
        assert!(matches!(
            node.remove_image("nginx").await,
            Err(RuntimeError::ImageInUse { ref_count: 2, .. })
        ));
    }

    #[test]
    fn test_scenario_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "node_name": "worker-1",
                "capacity_bytes": 10000,
                "base_used_bytes": 5000,
                "images": [{{"id": "busybox", "size_bytes": 10, "last_used": "2024-01-01T00:00:00Z"}}],
                "recreate_evicted_pods": true
            }}"#
        )
        .unwrap();

        let scenario = Scenario::from_file(file.path()).unwrap();
        assert_eq!(scenario.node_name, "worker-1");
        assert_eq!(scenario.images[0].ref_count, 0);
        assert!(scenario.recreate_evicted_pods);

        assert!(Scenario::from_file(Path::new("/nonexistent/scenario.json")).is_err());
    }
}

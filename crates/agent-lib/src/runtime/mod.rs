//! Seams to the container runtime and the cluster orchestrator
//!
//! The agent never talks to a runtime or API server directly; it goes
//! through [`ContainerRuntime`] and [`Orchestrator`]. [`SimulatedNode`]
//! implements both (plus [`crate::monitor::DiskMonitor`]) in memory.

mod simulated;

pub use simulated::{Scenario, SimulatedNode, TaintChange};

use crate::models::{DeadContainer, EvictionEvent, Image, Pod, Taint};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// The image gained a reference after it was selected for deletion
    #[error("image {image_id} is in use by {ref_count} container(s)")]
    ImageInUse { image_id: String, ref_count: u32 },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator rejected request: {0}")]
    Rejected(String),
    #[error("orchestrator unreachable: {0}")]
    Unreachable(String),
}

/// Container runtime operations used by garbage collection and eviction
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Images present on the node with reference counts and last-used times
    async fn list_images(&self) -> Result<Vec<Image>, RuntimeError>;

    /// Pods currently running on the node
    async fn list_pods(&self) -> Result<Vec<Pod>, RuntimeError>;

    /// Exited containers that still hold disk space
    async fn list_dead_containers(&self) -> Result<Vec<DeadContainer>, RuntimeError>;

    /// Delete an image, returning the bytes freed.
    ///
    /// Must fail with [`RuntimeError::ImageInUse`] if the image is referenced
    /// at deletion time.
    async fn remove_image(&self, image_id: &str) -> Result<u64, RuntimeError>;

    /// Delete an exited container, returning the bytes freed
    async fn remove_container(&self, container_id: &str) -> Result<u64, RuntimeError>;

    /// Gracefully stop a pod's containers and release its image references.
    /// May block; callers bound it with a timeout.
    async fn stop_pod(&self, pod_id: &str) -> Result<(), RuntimeError>;

    /// Forcefully kill a pod that did not stop in time
    async fn kill_pod(&self, pod_id: &str) -> Result<(), RuntimeError>;
}

/// Scheduler/orchestrator side effects of disk pressure
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn apply_taint(&self, node: &str, taint: &Taint) -> Result<(), OrchestratorError>;

    async fn remove_taint(&self, node: &str, taint: &Taint) -> Result<(), OrchestratorError>;

    async fn report_eviction(
        &self,
        node: &str,
        event: &EvictionEvent,
    ) -> Result<(), OrchestratorError>;
}

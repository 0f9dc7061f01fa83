//! Agent library for node disk pressure handling
//!
//! This crate provides the core functionality for:
//! - Disk usage sampling
//! - Dead container and unused image garbage collection
//! - QoS-ranked pod eviction and evict/recreate cycle detection
//! - The disk-pressure taint
//! - Health checks, status reporting and observability

pub mod clock;
pub mod eviction;
pub mod gc;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod pressure;
pub mod runtime;
pub mod status;
pub mod taint;

pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use monitor::{DiskMonitor, FilesystemMonitor, MonitorError};
pub use observability::{AgentMetrics, StructuredLogger};
pub use pressure::{PressureConfig, PressureLoop, PressureLoopBuilder, TickOutcome, TickReport};
pub use runtime::{ContainerRuntime, Orchestrator, OrchestratorError, RuntimeError, SimulatedNode};
pub use status::{AgentEvent, EventKind, NodeStatus, PressureCondition, StatusBoard};
pub use taint::{TaintController, TaintTransition};

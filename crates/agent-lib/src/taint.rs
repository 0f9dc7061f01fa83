//! Disk-pressure taint controller
//!
//! Two-state machine (`Untainted`, `Tainted`) kept in [`NodeState`]. Only
//! transitions reach the orchestrator; repeating the current state is a
//! no-op. If the orchestrator call fails the local state is left as it was
//! so the next tick retries the transition.

use crate::models::{NodeState, Taint, TaintState};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{Orchestrator, OrchestratorError};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintTransition {
    Added,
    Removed,
    Unchanged,
}

pub struct TaintController {
    orchestrator: Arc<dyn Orchestrator>,
    taint: Taint,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl TaintController {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        logger: StructuredLogger,
        metrics: AgentMetrics,
    ) -> Self {
        Self {
            orchestrator,
            taint: Taint::disk_pressure(),
            logger,
            metrics,
        }
    }

    pub fn taint(&self) -> &Taint {
        &self.taint
    }

    /// Drive the node towards `active`
    pub async fn set_pressure_taint(
        &self,
        node: &mut NodeState,
        active: bool,
    ) -> Result<TaintTransition, OrchestratorError> {
        match (node.taint, active) {
            (TaintState::Untainted, true) => {
                self.orchestrator.apply_taint(&node.name, &self.taint).await?;
                node.taint = TaintState::Tainted;
                self.logger.log_taint_change(true, node.usage_percent());
                self.metrics.set_tainted(true);
                Ok(TaintTransition::Added)
            }
            (TaintState::Tainted, false) => {
                self.orchestrator.remove_taint(&node.name, &self.taint).await?;
                node.taint = TaintState::Untainted;
                self.logger.log_taint_change(false, node.usage_percent());
                self.metrics.set_tainted(false);
                Ok(TaintTransition::Removed)
            }
            _ => Ok(TaintTransition::Unchanged),
        }
    }
}

//! Disk usage sampling
//!
//! A [`DiskMonitor`] reports how full the filesystem holding the node's
//! image and container storage is. Sampling is read-only; a failed sample
//! makes the pressure loop skip the tick.

mod filesystem;

pub use filesystem::FilesystemMonitor;

use crate::models::DiskUsage;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("no mounted filesystem contains {path}")]
    MountNotFound { path: PathBuf },
    #[error("filesystem reports zero capacity")]
    ZeroCapacity,
    #[error("disk usage sample failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of disk usage readings
#[async_trait]
pub trait DiskMonitor: Send + Sync {
    /// Take one usage measurement
    async fn sample(&self) -> Result<DiskUsage, MonitorError>;
}

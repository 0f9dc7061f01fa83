//! Filesystem-backed disk monitor
//!
//! Resolves the mount holding the storage path (longest mount-point
//! prefix) and derives usage from its total and available space.

use super::{DiskMonitor, MonitorError};
use crate::models::DiskUsage;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sysinfo::{DiskExt, System, SystemExt};
use tracing::debug;

/// Mount point with its total and available bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountSpace {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Samples usage of the filesystem that holds `path`
pub struct FilesystemMonitor {
    path: PathBuf,
}

impl FilesystemMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DiskMonitor for FilesystemMonitor {
    async fn sample(&self) -> Result<DiskUsage, MonitorError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || sample_path(&path))
            .await
            .map_err(|e| MonitorError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

fn sample_path(path: &Path) -> Result<DiskUsage, MonitorError> {
    let mut system = System::new();
    system.refresh_disks_list();

    let mounts: Vec<MountSpace> = system
        .disks()
        .iter()
        .map(|disk| MountSpace {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect();

    let mount = select_mount(path, &mounts).ok_or_else(|| MonitorError::MountNotFound {
        path: path.to_path_buf(),
    })?;
    debug!(path = %path.display(), mount = %mount.mount_point.display(), "Resolved storage mount");

    usage_from_space(mount.total_bytes, mount.available_bytes)
}

/// Pick the most specific mount containing `path`
pub(crate) fn select_mount<'a>(path: &Path, mounts: &'a [MountSpace]) -> Option<&'a MountSpace> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
}

pub(crate) fn usage_from_space(total: u64, available: u64) -> Result<DiskUsage, MonitorError> {
    if total == 0 {
        return Err(MonitorError::ZeroCapacity);
    }
    Ok(DiskUsage::new(total, total.saturating_sub(available)))
}

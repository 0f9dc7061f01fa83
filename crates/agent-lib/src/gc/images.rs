//! Unused image garbage collection
//!
//! When usage is at or above the high threshold, unreferenced images are
//! deleted least-recently-used first until usage drops to the low
//! threshold or no candidates remain. Usage is recomputed from the tick's
//! snapshot after each deletion rather than re-sampled, so one pass acts on
//! one measurement.

use crate::models::{DiskUsage, Image, Thresholds};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::runtime::{ContainerRuntime, RuntimeError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default minimum time an image must be unused before it may be deleted.
///
/// Zero so that images released by an eviction can be reclaimed in the
/// same tick.
pub const DEFAULT_MIN_EVICTABLE_AGE: Duration = Duration::ZERO;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGcPolicy {
    pub min_evictable_age: Duration,
}

impl Default for ImageGcPolicy {
    fn default() -> Self {
        Self {
            min_evictable_age: DEFAULT_MIN_EVICTABLE_AGE,
        }
    }
}

/// One image deleted during a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDeletion {
    pub image_id: String,
    pub bytes_freed: u64,
    pub usage_before_percent: f64,
    pub usage_after_percent: f64,
}

/// Result of an image reclamation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReclaim {
    pub usage_before: DiskUsage,
    pub usage_after: DiskUsage,
    pub bytes_freed: u64,
    pub deleted: Vec<ImageDeletion>,
    /// Candidates that turned out to be referenced at deletion time
    pub skipped_in_use: Vec<String>,
    /// Candidates left untouched because usage dropped to the low threshold
    pub candidates_remaining: usize,
}

impl ImageReclaim {
    fn untouched(usage: DiskUsage) -> Self {
        Self {
            usage_before: usage,
            usage_after: usage,
            bytes_freed: 0,
            deleted: Vec::new(),
            skipped_in_use: Vec::new(),
            candidates_remaining: 0,
        }
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.iter().map(|d| d.image_id.clone()).collect()
    }
}

fn unused_long_enough(image: &Image, now: DateTime<Utc>, min_age: Duration) -> bool {
    if !image.is_unused() {
        return false;
    }
    match (now - image.last_used).to_std() {
        Ok(idle) => idle >= min_age,
        Err(_) => min_age.is_zero(),
    }
}

/// Unused images eligible for deletion, least recently used first.
///
/// Ties on `last_used` are broken by image id.
pub fn select_image_candidates(
    images: Vec<Image>,
    policy: &ImageGcPolicy,
    now: DateTime<Utc>,
) -> Vec<Image> {
    let mut candidates: Vec<Image> = images
        .into_iter()
        .filter(|image| unused_long_enough(image, now, policy.min_evictable_age))
        .collect();
    candidates.sort_by(|a, b| a.last_used.cmp(&b.last_used).then_with(|| a.id.cmp(&b.id)));
    candidates
}

/// Deletes unused images in LRU order
pub struct ImageGarbageCollector {
    runtime: Arc<dyn ContainerRuntime>,
    thresholds: Thresholds,
    policy: ImageGcPolicy,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl ImageGarbageCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        thresholds: Thresholds,
        policy: ImageGcPolicy,
        logger: StructuredLogger,
        metrics: AgentMetrics,
    ) -> Self {
        Self {
            runtime,
            thresholds,
            policy,
            logger,
            metrics,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Reclaim images if `usage` is at or above the high threshold.
    ///
    /// No-op below the high threshold. Otherwise deletes candidates until
    /// usage is at or below the low threshold or candidates run out.
    pub async fn reclaim_images(
        &self,
        usage: DiskUsage,
        now: DateTime<Utc>,
    ) -> Result<ImageReclaim, RuntimeError> {
        if !self.thresholds.is_breached(&usage) {
            return Ok(ImageReclaim::untouched(usage));
        }
        self.reclaim_to_low(usage, now).await
    }

    /// Reclaim images down to the low threshold regardless of the high one.
    ///
    /// Used after a pod eviction releases image references.
    pub async fn reclaim_to_low(
        &self,
        usage: DiskUsage,
        now: DateTime<Utc>,
    ) -> Result<ImageReclaim, RuntimeError> {
        let mut reclaim = ImageReclaim::untouched(usage);
        if self.thresholds.is_relieved(&usage) {
            return Ok(reclaim);
        }

        let images = self.runtime.list_images().await?;
        let candidates = select_image_candidates(images, &self.policy, now);
        debug!(
            candidates = candidates.len(),
            usage_percent = usage.percent(),
            "Selected image GC candidates"
        );

        let mut current = usage;
        let total = candidates.len();
        for (idx, image) in candidates.into_iter().enumerate() {
            if self.thresholds.is_relieved(&current) {
                reclaim.candidates_remaining = total - idx;
                break;
            }

            match self.runtime.remove_image(&image.id).await {
                Ok(freed) => {
                    let after = current.after_freeing(freed);
                    self.logger
                        .log_image_deleted(&image.id, freed, current.percent(), after.percent());
                    self.metrics.record_image_deleted(freed);
                    reclaim.deleted.push(ImageDeletion {
                        image_id: image.id,
                        bytes_freed: freed,
                        usage_before_percent: current.percent(),
                        usage_after_percent: after.percent(),
                    });
                    reclaim.bytes_freed += freed;
                    current = after;
                }
                Err(RuntimeError::ImageInUse { .. }) => {
                    self.logger
                        .log_image_skipped(&image.id, "image became referenced after selection");
                    self.metrics.inc_image_deletions_skipped();
                    reclaim.skipped_in_use.push(image.id);
                }
                Err(RuntimeError::NotFound { .. }) => {
                    debug!(image_id = %image.id, "Image already removed");
                }
                Err(e) => {
                    warn!(image_id = %image.id, error = %e, "Failed to delete image");
                }
            }
        }

        reclaim.usage_after = current;
        Ok(reclaim)
    }
}

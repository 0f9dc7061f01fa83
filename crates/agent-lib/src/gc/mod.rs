//! Node-level garbage collection
//!
//! - Dead container collection (count/age policy, runs every tick)
//! - Unused image collection (LRU, only under disk pressure)

mod containers;
mod images;

pub use containers::{
    select_removable_containers, ContainerGarbageCollector, ContainerGcPolicy, ContainerReclaim,
};
pub use images::{
    select_image_candidates, ImageDeletion, ImageGarbageCollector, ImageGcPolicy, ImageReclaim,
};

//! The per-node disk pressure loop
//!
//! Ties together the disk monitor, garbage collectors, eviction manager,
//! taint controller and cycle detector. Each tick runs them in a fixed
//! order against one usage sample and reports what it did.

mod r#loop;


pub use r#loop::{PressureConfig, PressureLoop, PressureLoopBuilder, TickOutcome, TickReport};

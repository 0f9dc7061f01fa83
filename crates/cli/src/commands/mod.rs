//! CLI subcommands

pub mod cycles;
pub mod events;
pub mod status;

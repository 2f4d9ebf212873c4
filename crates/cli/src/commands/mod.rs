//! Subcommand implementations

pub mod config;
pub mod events;
pub mod scale;
pub mod status;

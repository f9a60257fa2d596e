//! CLI subcommand implementations.

pub mod import;
pub mod listeners;
pub mod status;

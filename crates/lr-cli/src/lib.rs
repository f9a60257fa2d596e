//! Station listener report CLI library.
//!
//! This crate provides the CLI interface plus the concrete device classifier
//! and geolocator the reports are enriched with.

mod cli;
pub mod commands;
mod config;
pub mod device;
pub mod geo;

pub use cli::{Cli, Commands};
pub use config::Config;

//! CLI module
//!
//! Command-line interface and configuration for the storage tool.

pub mod args;
pub mod config;

pub use args::{CliArgs, Command};
pub use config::{BackendKind, StorageConfig};

//! CLI module
//!
//! Command-line interface for consuming from and producing to a logstore.
//!
//! # Commands
//!
//! - `shards` - List shards and which worker owns them
//! - `consume` - Pull records as JSON lines, checkpointing to a state file
//! - `state` - Print a union state file
//! - `produce` - Write JSON lines as logs

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;

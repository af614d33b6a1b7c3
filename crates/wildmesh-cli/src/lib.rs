//! # wildmesh-cli
//!
//! Command-line interface for wildmesh.
//!
//! ## Commands
//!
//! - `wildmesh simulate` runs an in-process fleet over the simulated air
//! - `wildmesh config` prints the effective configuration
//! - `wildmesh doctor` validates the configuration
//! - `wildmesh init` writes a default `wildmesh.toml`
//! - `wildmesh version` shows build info

pub mod commands;

pub use commands::Cli;
pub use commands::simulate::{Fleet, SimReport};

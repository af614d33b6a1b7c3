//! # wildmesh-config
//!
//! Configuration for a wildmesh node. Reads `wildmesh.toml`, then applies
//! environment variable overrides, then validates.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::WildmeshConfig;
pub use schema::{
    ConfigWarning, IdentityConfig, LoggingConfig, MeshConfig, NodeConfig, NodeConfigPatch,
    SimulationConfig, Topology, WarningSeverity,
};

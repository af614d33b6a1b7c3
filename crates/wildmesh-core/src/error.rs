use thiserror::Error;

use crate::types::NodeId;

/// Unified error type for the wildmesh crates.
#[derive(Error, Debug)]
pub enum WildError {
    // ── Lifecycle errors ───────────────────────────────────────
    #[error("illegal lifecycle transition: {event} while {state}")]
    IllegalTransition { state: String, event: String },

    #[error("node is not running")]
    NotRunning,

    #[error("discovery launch failed: {0}")]
    DiscoveryLaunch(String),

    // ── Role / delegation errors ───────────────────────────────
    #[error("operation requires the coordinator role")]
    NotCoordinator,

    #[error("no eligible node for {0}")]
    NoEligibleNode(String),

    #[error("unknown task: {0}")]
    UnknownTask(u32),

    // ── Transport / framing errors ─────────────────────────────
    #[error("transport refused frame for node {dest}")]
    Transport { dest: NodeId },

    #[error("codec error: {0}")]
    Codec(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WildError>;

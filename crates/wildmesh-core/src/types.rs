use serde::{Deserialize, Serialize};

use crate::error::{Result, WildError};

/// Identifier of a device on the mesh. `0` is reserved for broadcast.
pub type NodeId = u32;

/// Destination id meaning "every node in range".
pub const BROADCAST: NodeId = 0;

/// Coordinator-assigned task identifier.
pub type TaskId = u32;

/// Milliseconds on a node-local monotonic clock.
pub type Timestamp = u64;

/// The part a node plays in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Node,
    Coordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Node => "node",
            Role::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = WildError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" => Ok(Role::Node),
            "coordinator" => Ok(Role::Coordinator),
            other => Err(WildError::Config(format!("unknown role '{other}'"))),
        }
    }
}

bitflags::bitflags! {
    /// Hardware a node can offer to the fleet, one bit per capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CapabilitySet: u8 {
        /// Plain messaging; every node has it.
        const BASIC = 0x01;
        /// Camera and image transmission.
        const IMAGE = 0x02;
        /// PIR / environmental sensors.
        const SENSORS = 0x04;
        /// On-device inference.
        const AI = 0x08;
        /// Uplink to an external network.
        const GATEWAY = 0x10;
        /// High-power radio.
        const HIGH_POWER = 0x20;
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        CapabilitySet::BASIC
    }
}

impl CapabilitySet {
    /// Parse lowercase capability names as written in `wildmesh.toml`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut set = CapabilitySet::BASIC;
        for name in names {
            let name = name.as_ref();
            let flag = CapabilitySet::from_name(&name.trim().to_ascii_uppercase()).ok_or_else(
                || WildError::ConfigValidation {
                    field: "identity.capabilities".into(),
                    reason: format!("unknown capability '{name}'"),
                },
            )?;
            set |= flag;
        }
        Ok(set)
    }

    /// Lowercase names of the set flags, in bit order.
    pub fn names(&self) -> Vec<String> {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect()
    }
}

/// Who a node is. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    node_id: NodeId,
    role_preference: Role,
    capabilities: CapabilitySet,
}

impl NodeIdentity {
    pub fn new(node_id: NodeId, role_preference: Role, capabilities: CapabilitySet) -> Result<Self> {
        if node_id == BROADCAST {
            return Err(WildError::ConfigValidation {
                field: "identity.node_id".into(),
                reason: "node id 0 is reserved for broadcast".into(),
            });
        }
        Ok(Self {
            node_id,
            role_preference,
            capabilities: capabilities | CapabilitySet::BASIC,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn role_preference(&self) -> Role {
        self.role_preference
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }
}

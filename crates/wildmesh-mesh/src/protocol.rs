use serde::{Deserialize, Serialize};
use wildmesh_config::NodeConfigPatch;
use wildmesh_core::{BROADCAST, CapabilitySet, NodeId, Role, TaskId, Timestamp};

use crate::lifecycle::NodeLifecycleState;
use crate::task::{TaskKind, TaskStatus};

/// Wire protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 2;

/// Message type code in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0x01,
    Discovery = 0x02,
    RoleAssignment = 0x03,
    TaskAssignment = 0x04,
    TaskResult = 0x05,
    ConfigUpdate = 0x06,
    Status = 0x07,
    Ack = 0x08,
    Error = 0x09,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => MessageType::Heartbeat,
            0x02 => MessageType::Discovery,
            0x03 => MessageType::RoleAssignment,
            0x04 => MessageType::TaskAssignment,
            0x05 => MessageType::TaskResult,
            0x06 => MessageType::ConfigUpdate,
            0x07 => MessageType::Status,
            0x08 => MessageType::Ack,
            0x09 => MessageType::Error,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat",
            MessageType::Discovery => "discovery",
            MessageType::RoleAssignment => "role_assignment",
            MessageType::TaskAssignment => "task_assignment",
            MessageType::TaskResult => "task_result",
            MessageType::ConfigUpdate => "config_update",
            MessageType::Status => "status",
            MessageType::Ack => "ack",
            MessageType::Error => "error",
        }
    }
}

/// A decoded mesh frame: routing envelope plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshMessage {
    pub version: u8,
    pub source: NodeId,
    /// Destination node, `BROADCAST` for everyone.
    pub dest: NodeId,
    /// Per-source counter used for de-duplication.
    pub message_id: u32,
    pub hop_count: u8,
    pub max_hops: u8,
    /// Sender's clock at send time.
    pub timestamp: Timestamp,
    pub payload: Payload,
}

impl MeshMessage {
    pub fn msg_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest == BROADCAST
    }

    /// Copy of this message one hop further along.
    pub fn forwarded(&self) -> MeshMessage {
        let mut next = self.clone();
        next.hop_count = self.hop_count.saturating_add(1);
        next
    }
}

/// The closed set of payloads. The variant decides the header type code.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Heartbeat(HeartbeatPayload),
    Discovery(DiscoveryPayload),
    RoleAssignment(RoleAssignmentPayload),
    TaskAssignment(TaskAssignmentPayload),
    TaskResult(TaskResultPayload),
    ConfigUpdate(NodeConfigPatch),
    Status(StatusPayload),
    Ack(AckPayload),
    Error(ErrorPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::Discovery(_) => MessageType::Discovery,
            Payload::RoleAssignment(_) => MessageType::RoleAssignment,
            Payload::TaskAssignment(_) => MessageType::TaskAssignment,
            Payload::TaskResult(_) => MessageType::TaskResult,
            Payload::ConfigUpdate(_) => MessageType::ConfigUpdate,
            Payload::Status(_) => MessageType::Status,
            Payload::Ack(_) => MessageType::Ack,
            Payload::Error(_) => MessageType::Error,
        }
    }
}

/// Periodic presence broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub role: Role,
    pub state: NodeLifecycleState,
    pub coordinator: Option<NodeId>,
    pub capabilities: CapabilitySet,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryPayload {
    /// "Who is out there?" Broadcast by a seeking node.
    Request {
        role: Role,
        capabilities: CapabilitySet,
    },
    /// Unicast answer to a request.
    Response {
        role: Role,
        state: NodeLifecycleState,
        capabilities: CapabilitySet,
        coordinator: Option<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignmentPayload {
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignmentPayload {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Absolute deadline on the coordinator's clock.
    pub deadline: Timestamp,
    pub priority: u8,
    /// 0 for the first issue, then one per re-issue.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    pub task_id: TaskId,
    /// Always terminal.
    pub status: TaskStatus,
    /// Result body on success, error text otherwise.
    pub detail: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub role: Role,
    pub state: NodeLifecycleState,
    pub active_tasks: u32,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub uptime_ms: u64,
    pub battery_percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    /// Message id being acknowledged.
    pub message_id: u32,
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not in a state that takes assignments.
    NotAccepting,
    /// Sender is not this node's coordinator.
    NotCoordinator,
    ExecutionDisabled,
    InvalidConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message_id: u32,
    pub task_id: Option<TaskId>,
    pub reason: String,
}

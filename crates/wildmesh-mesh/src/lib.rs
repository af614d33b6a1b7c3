//! # wildmesh-mesh
//!
//! Coordination protocol for battery-powered camera nodes on a lossy,
//! multi-hop radio mesh.
//!
//! One node acts as coordinator and delegates work; the others discover it,
//! watch its heartbeat, execute tasks against their [`FieldDevice`] and fall
//! back to standalone operation when it goes quiet. Everything runs inside
//! [`MeshNode::tick`]: no threads, no blocking, time comes from a [`Clock`].

pub mod clock;
pub mod codec;
pub mod coordinator;
pub mod discovery;
pub mod heartbeat;
pub mod lifecycle;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod sim;
pub mod task;
pub mod transport;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use codec::{Codec, CodecError};
pub use coordinator::{AssignmentState, TaskLedger, TaskRequest};
pub use heartbeat::{PeerRecord, PeerTable};
pub use lifecycle::{Lifecycle, LifecycleEvent, NodeLifecycleState};
pub use node::{MeshNode, NodeStats};
pub use protocol::{MeshMessage, MessageType, Payload};
pub use task::{CallState, FieldDevice, Task, TaskExecutionError, TaskKind, TaskStatus};
pub use transport::{InboundFrame, Transport};

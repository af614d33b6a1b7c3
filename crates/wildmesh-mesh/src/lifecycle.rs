//! Per-node lifecycle state machine.
//!
//! [`Lifecycle::apply`] is the only way to change the state or the
//! coordinator reference. Anything not in the transition table is
//! rejected and leaves the machine untouched.

use serde::{Deserialize, Serialize};
use tracing::info;
use wildmesh_core::{NodeId, Result, Timestamp, WildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycleState {
    #[default]
    Inactive,
    Initializing,
    SeekingCoordinator,
    Active,
    ExecutingTask,
    Standalone,
}

impl NodeLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLifecycleState::Inactive => "inactive",
            NodeLifecycleState::Initializing => "initializing",
            NodeLifecycleState::SeekingCoordinator => "seeking_coordinator",
            NodeLifecycleState::Active => "active",
            NodeLifecycleState::ExecutingTask => "executing_task",
            NodeLifecycleState::Standalone => "standalone",
        }
    }

    /// Active or ExecutingTask: the only states with a coordinator.
    pub fn is_coordinated(&self) -> bool {
        matches!(
            self,
            NodeLifecycleState::Active | NodeLifecycleState::ExecutingTask
        )
    }

    pub fn is_running(&self) -> bool {
        *self != NodeLifecycleState::Inactive
    }
}

impl std::fmt::Display for NodeLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    DiscoveryLaunched,
    DiscoveryLaunchFailed,
    CoordinatorFound(NodeId),
    /// Discovery closed without a coordinator.
    DiscoveryWindowClosed { autonomous: bool },
    /// Heartbeat from the recorded coordinator.
    CoordinatorHeartbeat,
    TaskAccepted,
    TasksSettled,
    CoordinatorLost,
    RediscoveryLaunched,
    Stop,
    PromotedToCoordinator,
    CoordinatorRevoked,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::DiscoveryLaunched => "discovery_launched",
            LifecycleEvent::DiscoveryLaunchFailed => "discovery_launch_failed",
            LifecycleEvent::CoordinatorFound(_) => "coordinator_found",
            LifecycleEvent::DiscoveryWindowClosed { .. } => "discovery_window_closed",
            LifecycleEvent::CoordinatorHeartbeat => "coordinator_heartbeat",
            LifecycleEvent::TaskAccepted => "task_accepted",
            LifecycleEvent::TasksSettled => "tasks_settled",
            LifecycleEvent::CoordinatorLost => "coordinator_lost",
            LifecycleEvent::RediscoveryLaunched => "rediscovery_launched",
            LifecycleEvent::Stop => "stop",
            LifecycleEvent::PromotedToCoordinator => "promoted_to_coordinator",
            LifecycleEvent::CoordinatorRevoked => "coordinator_revoked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: NodeLifecycleState,
    pub to: NodeLifecycleState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    node_id: NodeId,
    state: NodeLifecycleState,
    coordinator: Option<NodeId>,
    last_coordinator_contact: Option<Timestamp>,
    coordinator_changes: u64,
    had_coordinator: bool,
    /// The open search was relaunched from `Standalone`.
    rediscovering: bool,
    entered_at: Timestamp,
}

impl Lifecycle {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeLifecycleState::Inactive,
            coordinator: None,
            last_coordinator_contact: None,
            coordinator_changes: 0,
            had_coordinator: false,
            rediscovering: false,
            entered_at: 0,
        }
    }

    pub fn state(&self) -> NodeLifecycleState {
        self.state
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
    }

    /// True while this node is its own coordinator.
    pub fn is_self_coordinated(&self) -> bool {
        self.coordinator == Some(self.node_id)
    }

    pub fn last_coordinator_contact(&self) -> Option<Timestamp> {
        self.last_coordinator_contact
    }

    pub fn coordinator_changes(&self) -> u64 {
        self.coordinator_changes
    }

    /// When the current state was entered.
    pub fn entered_at(&self) -> Timestamp {
        self.entered_at
    }

    /// Whether a remote coordinator has been silent for longer than `timeout_ms`.
    pub fn coordinator_timed_out(&self, now: Timestamp, timeout_ms: u64) -> bool {
        if !self.state.is_coordinated() || self.is_self_coordinated() {
            return false;
        }
        match self.last_coordinator_contact {
            Some(contact) => now.saturating_sub(contact) > timeout_ms,
            None => false,
        }
    }

    pub fn apply(&mut self, event: LifecycleEvent, now: Timestamp) -> Result<Transition> {
        use NodeLifecycleState::*;

        let from = self.state;
        let to = match (from, event) {
            (Inactive, LifecycleEvent::Start) => {
                self.rediscovering = false;
                Initializing
            }
            (Initializing | SeekingCoordinator, LifecycleEvent::DiscoveryLaunched) => {
                SeekingCoordinator
            }
            (Initializing, LifecycleEvent::DiscoveryLaunchFailed) => Inactive,
            (SeekingCoordinator, LifecycleEvent::CoordinatorFound(id)) => {
                self.adopt_coordinator(id, now);
                Active
            }
            (SeekingCoordinator, LifecycleEvent::DiscoveryWindowClosed { autonomous }) => {
                if autonomous {
                    Standalone
                } else {
                    SeekingCoordinator
                }
            }
            (Active | ExecutingTask, LifecycleEvent::CoordinatorHeartbeat) => {
                self.last_coordinator_contact = Some(now);
                from
            }
            (Active | ExecutingTask, LifecycleEvent::TaskAccepted) => ExecutingTask,
            (ExecutingTask, LifecycleEvent::TasksSettled) => Active,
            (Active | ExecutingTask, LifecycleEvent::CoordinatorLost)
                if !self.is_self_coordinated() =>
            {
                self.coordinator = None;
                Standalone
            }
            (Standalone, LifecycleEvent::RediscoveryLaunched) => {
                self.rediscovering = true;
                SeekingCoordinator
            }
            (_, LifecycleEvent::Stop) => {
                self.coordinator = None;
                self.rediscovering = false;
                Inactive
            }
            (
                SeekingCoordinator | Standalone | Active | ExecutingTask,
                LifecycleEvent::PromotedToCoordinator,
            ) => {
                self.adopt_coordinator(self.node_id, now);
                if from == ExecutingTask {
                    ExecutingTask
                } else {
                    Active
                }
            }
            (Active | ExecutingTask, LifecycleEvent::CoordinatorRevoked)
                if self.is_self_coordinated() =>
            {
                self.coordinator = None;
                SeekingCoordinator
            }
            _ => {
                return Err(WildError::IllegalTransition {
                    state: from.as_str().into(),
                    event: event.as_str().into(),
                });
            }
        };

        self.state = to;
        if to != from {
            self.entered_at = now;
            info!(
                node_id = self.node_id,
                from = %from,
                to = %to,
                event = event.as_str(),
                "lifecycle transition"
            );
        }
        Ok(Transition { from, to })
    }

    fn adopt_coordinator(&mut self, id: NodeId, now: Timestamp) {
        if self.had_coordinator || self.rediscovering {
            self.coordinator_changes += 1;
        }
        self.had_coordinator = true;
        self.rediscovering = false;
        self.coordinator = Some(id);
        self.last_coordinator_contact = Some(now);
    }
}

use serde::Serialize;
use tracing::{debug, info, warn};
use wildmesh_config::{MeshConfig, NodeConfig, NodeConfigPatch, WildmeshConfig};
use wildmesh_core::{
    BROADCAST, CapabilitySet, NodeId, NodeIdentity, Result, Role, TaskId, Timestamp, WildError,
};

use crate::clock::Clock;
use crate::codec::Codec;
use crate::coordinator::{FailureOutcome, LedgerCounters, RetryPlan, TaskLedger, TaskRequest};
use crate::discovery::{Discovery, DiscoveryOutcome};
use crate::heartbeat::{Cadence, PeerRecord, PeerTable};
use crate::lifecycle::{Lifecycle, LifecycleEvent, NodeLifecycleState};
use crate::protocol::{
    AckPayload, DiscoveryPayload, ErrorCode, ErrorPayload, HeartbeatPayload, MeshMessage,
    PROTOCOL_VERSION, Payload, RoleAssignmentPayload, StatusPayload, TaskAssignmentPayload,
    TaskResultPayload,
};
use crate::routing::{DropReason, RouteDecision, Router, signal_quality};
use crate::task::{FieldDevice, MotionParams, Task, TaskKind, TaskOrigin, TaskQueue};
use crate::transport::{InboundFrame, Transport};

/// Upper bound on frames handled in one tick; the rest wait for the next.
const MAX_FRAMES_PER_TICK: usize = 512;

/// Priority of autonomous standalone work.
const AUTONOMOUS_PRIORITY: u8 = 3;

/// Frame traffic counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MessageCounters {
    pub sent: u64,
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub send_failures: u64,
}

/// Snapshot of a node for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub state: NodeLifecycleState,
    pub role: Role,
    pub coordinator: Option<NodeId>,
    pub uptime_ms: u64,
    pub tasks_active: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub success_rate: f64,
    pub total_task_time_ms: u64,
    pub coordinator_changes: u64,
    pub last_coordinator_contact: Option<Timestamp>,
    pub messages: MessageCounters,
    pub peers_known: usize,
    pub peers_reachable: usize,
    pub routes: usize,
    pub ledger: LedgerCounters,
}

/// A task result waiting to reach the coordinator.
#[derive(Debug, Clone)]
struct PendingReport {
    coordinator: NodeId,
    result: TaskResultPayload,
    failures: u32,
}

/// One device on the mesh: lifecycle, routing, discovery, tasks and, when
/// acting as coordinator, the delegation ledger. Driven entirely by
/// [`tick`](Self::tick).
pub struct MeshNode {
    identity: NodeIdentity,
    role: Role,
    config: NodeConfig,
    mesh: MeshConfig,
    codec: Codec,
    clock: Box<dyn Clock>,
    transport: Box<dyn Transport>,
    device: Box<dyn FieldDevice>,
    lifecycle: Lifecycle,
    router: Router,
    discovery: Discovery,
    peers: PeerTable,
    tasks: TaskQueue,
    ledger: TaskLedger,
    outbox: Vec<PendingReport>,
    heartbeat: Cadence,
    status: Cadence,
    standalone_work: Cadence,
    next_rediscovery_at: Timestamp,
    next_discovery_at: Timestamp,
    rediscovery_requested: bool,
    started_at: Option<Timestamp>,
    counters: MessageCounters,
}

impl MeshNode {
    pub fn new(
        identity: NodeIdentity,
        config: NodeConfig,
        mesh: MeshConfig,
        clock: Box<dyn Clock>,
        transport: Box<dyn Transport>,
        device: Box<dyn FieldDevice>,
    ) -> Self {
        let node_id = identity.node_id();
        info!(
            node_id,
            role = %identity.role_preference(),
            capabilities = ?identity.capabilities().names(),
            "mesh node created"
        );
        Self {
            role: identity.role_preference(),
            codec: Codec::new(mesh.max_frame_bytes),
            router: Router::new(
                node_id,
                mesh.max_hops,
                mesh.dedup_window,
                mesh.route_timeout_ms,
            ),
            lifecycle: Lifecycle::new(node_id),
            discovery: Discovery::new(),
            peers: PeerTable::new(),
            tasks: TaskQueue::new(config.task_history_limit),
            ledger: TaskLedger::new(),
            outbox: Vec::new(),
            heartbeat: Cadence::new(config.heartbeat_interval_ms),
            status: Cadence::new(config.status_interval_ms),
            standalone_work: Cadence::new(config.standalone_task_interval_ms),
            next_rediscovery_at: 0,
            next_discovery_at: 0,
            rediscovery_requested: false,
            started_at: None,
            counters: MessageCounters::default(),
            identity,
            config,
            mesh,
            clock,
            transport,
            device,
        }
    }

    /// Build a node from a loaded config.
    pub fn from_config(
        config: &WildmeshConfig,
        clock: Box<dyn Clock>,
        transport: Box<dyn Transport>,
        device: Box<dyn FieldDevice>,
    ) -> Result<Self> {
        let identity = config.identity.to_identity()?;
        Ok(Self::new(
            identity,
            config.node.clone(),
            config.mesh.clone(),
            clock,
            transport,
            device,
        ))
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NodeLifecycleState {
        self.lifecycle.state()
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.lifecycle.coordinator()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mesh_config(&self) -> &MeshConfig {
        &self.mesh
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peer(&self, node_id: NodeId) -> Option<&PeerRecord> {
        self.peers.get(node_id)
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.active()
    }

    pub fn task_history(&self) -> impl Iterator<Item = &Task> {
        self.tasks.history()
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator && self.lifecycle.is_self_coordinated()
    }

    // ── Lifecycle control ──────────────────────────────────────

    /// Bring the node up and launch discovery.
    pub fn start(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.lifecycle.apply(LifecycleEvent::Start, now)?;
        self.role = self.identity.role_preference();
        self.started_at = Some(now);
        self.heartbeat.reset(now);
        self.status.reset(now.saturating_add(self.config.status_interval_ms));
        self.standalone_work.reset(now);
        self.rediscovery_requested = false;

        if let Err(e) = self.launch_discovery(now) {
            self.lifecycle
                .apply(LifecycleEvent::DiscoveryLaunchFailed, now)?;
            self.started_at = None;
            return Err(WildError::DiscoveryLaunch(e.to_string()));
        }

        if self.role == Role::Coordinator {
            self.discovery.cancel();
            self.lifecycle
                .apply(LifecycleEvent::PromotedToCoordinator, now)?;
        }
        Ok(())
    }

    /// Stop the node. Unfinished tasks and outstanding assignments are
    /// dropped; history and counters are kept.
    pub fn stop(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.lifecycle.apply(LifecycleEvent::Stop, now)?;
        let dropped = self.tasks.clear_active(self.device.as_mut());
        let withdrawn = self.ledger.clear_outstanding();
        self.outbox.clear();
        self.discovery.cancel();
        self.started_at = None;
        info!(
            node_id = self.node_id(),
            dropped_tasks = dropped,
            withdrawn_assignments = withdrawn,
            "mesh node stopped"
        );
        Ok(())
    }

    /// Force a fresh discovery round from `Standalone` or `SeekingCoordinator`.
    pub fn seek_coordinator(&mut self) -> Result<()> {
        let now = self.clock.now();
        match self.state() {
            NodeLifecycleState::Standalone | NodeLifecycleState::SeekingCoordinator => {
                self.launch_discovery(now)
            }
            other => Err(WildError::IllegalTransition {
                state: other.as_str().into(),
                event: "seek_coordinator".into(),
            }),
        }
    }

    pub fn set_autonomous_mode(&mut self, enabled: bool) {
        if self.config.enable_autonomous_mode != enabled {
            info!(node_id = self.node_id(), enabled, "autonomous mode changed");
        }
        self.config.enable_autonomous_mode = enabled;
    }

    // ── Coordinator API ────────────────────────────────────────

    /// Delegate a task. Only valid on the acting coordinator.
    pub fn submit_task(&mut self, request: TaskRequest) -> Result<TaskId> {
        if !self.state().is_running() {
            return Err(WildError::NotRunning);
        }
        if !self.is_coordinator() {
            return Err(WildError::NotCoordinator);
        }
        let now = self.clock.now();
        let capability = request.kind.required_capability();
        let target = match request.target {
            Some(target) => target,
            None => self
                .select_target(capability, None)
                .ok_or_else(|| WildError::NoEligibleNode(request.kind.name().into()))?,
        };
        let (task_id, sent) = self.dispatch_assignment(request, target, 0, None, now);
        if !sent {
            self.ledger.withdraw(task_id);
            return Err(WildError::Transport { dest: target });
        }
        Ok(task_id)
    }

    /// Tell `target` to take `role`.
    pub fn assign_role(&mut self, target: NodeId, role: Role) -> Result<()> {
        if !self.is_coordinator() {
            return Err(WildError::NotCoordinator);
        }
        let now = self.clock.now();
        if target == self.node_id() {
            self.apply_role(role, now);
            return Ok(());
        }
        info!(target, role = %role, "assigning role");
        self.send(target, Payload::RoleAssignment(RoleAssignmentPayload { role }), now)
            .map(|_| ())
    }

    /// Push a partial config to `target` (or `BROADCAST`).
    pub fn push_config(&mut self, target: NodeId, patch: NodeConfigPatch) -> Result<()> {
        if !self.is_coordinator() {
            return Err(WildError::NotCoordinator);
        }
        let now = self.clock.now();
        info!(target, ?patch, "pushing config update");
        self.send(target, Payload::ConfigUpdate(patch), now)
            .map(|_| ())
    }

    // ── Tick ───────────────────────────────────────────────────

    /// One cooperative step: drain the radio, run timers and tasks, send
    /// periodic traffic. Does nothing while inactive.
    pub fn tick(&mut self) {
        if !self.state().is_running() {
            return;
        }
        let now = self.clock.now();

        for _ in 0..MAX_FRAMES_PER_TICK {
            match self.transport.try_receive() {
                Some(frame) => self.handle_frame(frame, now),
                None => break,
            }
        }

        for peer in self.peers.sweep(now, self.config.peer_stale_after()) {
            info!(node_id = self.node_id(), peer, "peer unreachable");
        }

        self.drive_lifecycle(now);
        self.run_tasks(now);
        self.settle(now);

        if self.is_coordinator() {
            self.ledger_duties(now);
        }

        self.periodic_traffic(now);
        self.router.prune(now);
    }

    fn drive_lifecycle(&mut self, now: Timestamp) {
        match self.state() {
            NodeLifecycleState::SeekingCoordinator => {
                if !self.discovery.is_active() {
                    if now >= self.next_discovery_at {
                        self.relaunch(now);
                    }
                    return;
                }
                match self.discovery.poll(now) {
                    Some(DiscoveryOutcome::Found(id)) => {
                        if self.transition(LifecycleEvent::CoordinatorFound(id), now) {
                            self.status.reset(now.saturating_add(self.config.status_interval_ms));
                        }
                    }
                    Some(DiscoveryOutcome::NotFound) => {
                        let autonomous = self.config.enable_autonomous_mode;
                        self.transition(LifecycleEvent::DiscoveryWindowClosed { autonomous }, now);
                        if self.state() == NodeLifecycleState::Standalone {
                            info!(node_id = self.node_id(), "no coordinator found, going standalone");
                            self.next_rediscovery_at =
                                now.saturating_add(self.config.rediscovery_interval());
                        } else {
                            debug!(node_id = self.node_id(), "no coordinator found, seeking again");
                            self.relaunch(now);
                        }
                    }
                    None => {}
                }
            }
            NodeLifecycleState::Active | NodeLifecycleState::ExecutingTask => {
                if self
                    .lifecycle
                    .coordinator_timed_out(now, self.config.coordinator_timeout_ms)
                {
                    warn!(
                        node_id = self.node_id(),
                        coordinator = ?self.coordinator(),
                        timeout_ms = self.config.coordinator_timeout_ms,
                        "coordinator silent, going standalone"
                    );
                    if self.transition(LifecycleEvent::CoordinatorLost, now) {
                        if !self.outbox.is_empty() {
                            debug!(reports = self.outbox.len(), "keeping unsent results locally");
                        }
                        self.outbox.clear();
                        self.next_rediscovery_at =
                            now.saturating_add(self.config.rediscovery_interval());
                    }
                }
            }
            NodeLifecycleState::Standalone => {
                if self.config.enable_autonomous_mode
                    && self.config.enable_task_execution
                    && self.standalone_work.due(now)
                {
                    self.queue_autonomous_task(now);
                }
                if self.rediscovery_requested
                    || !self.config.enable_autonomous_mode
                    || now >= self.next_rediscovery_at
                {
                    self.rediscovery_requested = false;
                    if self.launch_discovery(now).is_err() {
                        self.next_rediscovery_at =
                            now.saturating_add(self.config.rediscovery_interval());
                    }
                }
            }
            NodeLifecycleState::Inactive | NodeLifecycleState::Initializing => {}
        }
    }

    fn queue_autonomous_task(&mut self, now: Timestamp) {
        let task_id = self.tasks.next_local_id();
        let task = Task::new(
            task_id,
            TaskKind::MotionCheck(MotionParams::default()),
            now.saturating_add(self.config.task_timeout_ms),
            AUTONOMOUS_PRIORITY,
            TaskOrigin::Local,
            now,
        );
        debug!(node_id = self.node_id(), task_id, "queued autonomous motion check");
        self.tasks.enqueue(task);
    }

    fn run_tasks(&mut self, now: Timestamp) {
        self.tasks.expire(now, self.device.as_mut());
        self.tasks.run(now, self.device.as_mut());

        for task in self.tasks.drain_terminal() {
            self.report(task, now);
        }
        self.flush_outbox(now);
    }

    fn report(&mut self, task: Task, now: Timestamp) {
        let TaskOrigin::Coordinator(origin) = task.origin else {
            return;
        };
        let result = TaskResultPayload {
            task_id: task.task_id,
            status: task.status,
            detail: task.detail.clone().unwrap_or_default(),
            duration_ms: task.duration_ms(),
        };
        if origin == self.node_id() {
            self.handle_result(result, now);
            return;
        }
        if self.coordinator() == Some(origin) {
            self.outbox.push(PendingReport {
                coordinator: origin,
                result,
                failures: 0,
            });
        } else {
            debug!(
                node_id = self.node_id(),
                task_id = task.task_id,
                "no coordinator, result kept locally"
            );
        }
    }

    fn flush_outbox(&mut self, now: Timestamp) {
        if self.outbox.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.outbox);
        for mut report in pending {
            if self.coordinator() != Some(report.coordinator) {
                continue;
            }
            let payload = Payload::TaskResult(report.result.clone());
            if self.send(report.coordinator, payload, now).is_ok() {
                continue;
            }
            report.failures += 1;
            if report.failures > self.config.max_retries {
                warn!(
                    task_id = report.result.task_id,
                    "giving up on sending task result"
                );
            } else {
                self.outbox.push(report);
            }
        }
    }

    fn settle(&mut self, now: Timestamp) {
        let busy = self.tasks.active_len() > 0;
        match self.state() {
            NodeLifecycleState::ExecutingTask if !busy => {
                self.transition(LifecycleEvent::TasksSettled, now);
            }
            NodeLifecycleState::Active if busy => {
                self.transition(LifecycleEvent::TaskAccepted, now);
            }
            _ => {}
        }
    }

    fn ledger_duties(&mut self, now: Timestamp) {
        for task_id in self
            .ledger
            .overdue(now, self.config.heartbeat_interval_ms)
        {
            warn!(task_id, "no result before deadline");
            self.handle_failure(task_id, "no result before deadline".into(), now);
        }
        self.ledger.prune_settled(self.config.task_history_limit);
    }

    fn periodic_traffic(&mut self, now: Timestamp) {
        if self.heartbeat.due(now) {
            let payload = Payload::Heartbeat(HeartbeatPayload {
                role: self.role,
                state: self.state(),
                coordinator: self.coordinator(),
                capabilities: self.identity.capabilities(),
                uptime_ms: self.uptime(now),
            });
            if self.send(BROADCAST, payload, now).is_err() {
                // Retry on the next tick instead of a full period later.
                self.heartbeat.reset(now);
            }
        }

        let remote_coordinator = self
            .coordinator()
            .filter(|&c| c != self.node_id());
        if let Some(coordinator) = remote_coordinator
            && self.status.due(now)
        {
            let counters = self.tasks.counters();
            let payload = Payload::Status(StatusPayload {
                role: self.role,
                state: self.state(),
                active_tasks: self.tasks.active_len() as u32,
                tasks_completed: counters.completed,
                tasks_failed: counters.failed,
                uptime_ms: self.uptime(now),
                battery_percent: self.device.battery_percent(),
            });
            if self.send(coordinator, payload, now).is_err() {
                self.status.reset(now);
            }
        }
    }

    // ── Discovery ──────────────────────────────────────────────

    /// Broadcast a discovery request and open a window. Applies the matching
    /// lifecycle event for the current state.
    fn launch_discovery(&mut self, now: Timestamp) -> Result<()> {
        let request = Payload::Discovery(DiscoveryPayload::Request {
            role: self.role,
            capabilities: self.identity.capabilities(),
        });
        self.send(BROADCAST, request, now)?;
        let window = self.config.discovery_window();
        self.discovery.begin(now, window);
        self.next_discovery_at = now.saturating_add(window);

        let event = match self.state() {
            NodeLifecycleState::Standalone => LifecycleEvent::RediscoveryLaunched,
            _ => LifecycleEvent::DiscoveryLaunched,
        };
        self.lifecycle.apply(event, now)?;
        Ok(())
    }

    /// Retry discovery while seeking; a failed send waits out one window.
    fn relaunch(&mut self, now: Timestamp) {
        if let Err(e) = self.launch_discovery(now) {
            warn!(node_id = self.node_id(), error = %e, "discovery relaunch failed");
            self.discovery.cancel();
            self.next_discovery_at = now.saturating_add(self.config.discovery_window());
        }
    }

    fn select_target(&self, capability: CapabilitySet, exclude: Option<NodeId>) -> Option<NodeId> {
        self.peers
            .iter()
            .filter(|p| {
                p.reachable
                    && p.role == Role::Node
                    && p.capabilities.contains(capability)
                    && Some(p.node_id) != exclude
            })
            .min_by_key(|p| {
                (
                    self.ledger.outstanding_for(p.node_id),
                    std::cmp::Reverse(p.last_seen),
                )
            })
            .map(|p| p.node_id)
    }

    // ── Inbound ────────────────────────────────────────────────

    fn handle_frame(&mut self, frame: InboundFrame, now: Timestamp) {
        let msg = match self.codec.decode(&frame.data) {
            Ok(msg) => msg,
            Err(e) => {
                self.counters.malformed += 1;
                warn!(node_id = self.node_id(), error = %e, len = frame.data.len(), "discarding frame");
                return;
            }
        };

        let decision = self.router.route(&msg);
        match decision {
            RouteDecision::Drop(DropReason::Duplicate | DropReason::OwnEcho) => {
                self.counters.duplicates += 1;
                return;
            }
            RouteDecision::Drop(DropReason::HopLimit) => {
                self.counters.dropped += 1;
                debug!(
                    node_id = self.node_id(),
                    source = msg.source,
                    dest = msg.dest,
                    "hop limit reached, dropping"
                );
                return;
            }
            _ => {}
        }

        self.router
            .observe(msg.source, msg.hop_count, frame.rssi, now);
        self.peers
            .observe(msg.source, msg.hop_count, signal_quality(frame.rssi), now);

        if matches!(
            decision,
            RouteDecision::Forward | RouteDecision::DeliverAndForward
        ) {
            self.forward(&msg);
        }
        if matches!(
            decision,
            RouteDecision::Deliver | RouteDecision::DeliverAndForward
        ) {
            self.counters.received += 1;
            self.dispatch(msg, now);
        }
    }

    fn forward(&mut self, msg: &MeshMessage) {
        let next = msg.forwarded();
        match self.codec.encode(&next) {
            Ok(frame) => {
                if self.transport.send(frame) {
                    self.counters.forwarded += 1;
                } else {
                    self.counters.send_failures += 1;
                    warn!(node_id = self.node_id(), source = msg.source, "forward refused by radio");
                }
            }
            Err(e) => {
                self.counters.dropped += 1;
                warn!(node_id = self.node_id(), error = %e, "cannot re-encode for forwarding");
            }
        }
    }

    fn dispatch(&mut self, msg: MeshMessage, now: Timestamp) {
        let source = msg.source;
        match msg.payload {
            Payload::Heartbeat(hb) => {
                self.peers.apply_heartbeat(source, &hb);
                if hb.role == Role::Coordinator {
                    self.on_coordinator_heartbeat(source, now);
                }
            }
            Payload::Discovery(DiscoveryPayload::Request { role, capabilities }) => {
                self.peers.apply_presence(source, role, capabilities, None);
                let response = Payload::Discovery(DiscoveryPayload::Response {
                    role: self.role,
                    state: self.state(),
                    capabilities: self.identity.capabilities(),
                    coordinator: self.coordinator(),
                });
                let _ = self.send(source, response, now);
            }
            Payload::Discovery(DiscoveryPayload::Response {
                role,
                state,
                capabilities,
                ..
            }) => {
                self.peers
                    .apply_presence(source, role, capabilities, Some(state));
                if self.state() == NodeLifecycleState::SeekingCoordinator {
                    self.discovery.record_response(source, role);
                }
            }
            Payload::RoleAssignment(assignment) => {
                self.on_role_assignment(source, msg.message_id, assignment.role, now);
            }
            Payload::TaskAssignment(assignment) => {
                self.on_task_assignment(source, msg.message_id, msg.timestamp, assignment, now);
            }
            Payload::TaskResult(result) => {
                if self.is_coordinator() {
                    self.handle_result(result, now);
                }
            }
            Payload::ConfigUpdate(patch) => {
                self.on_config_update(source, msg.message_id, patch, now);
            }
            Payload::Status(status) => {
                if self.is_coordinator() {
                    debug!(peer = source, state = %status.state, "status report");
                    self.peers.record_status(source, status);
                }
            }
            Payload::Ack(ack) => {
                if let Some(task_id) = ack.task_id
                    && self.is_coordinator()
                {
                    self.ledger.acknowledge(task_id);
                }
            }
            Payload::Error(err) => {
                warn!(peer = source, code = ?err.code, reason = %err.reason, "peer refused");
                if let Some(task_id) = err.task_id
                    && self.is_coordinator()
                {
                    self.handle_failure(task_id, err.reason, now);
                }
            }
        }
    }

    fn on_coordinator_heartbeat(&mut self, source: NodeId, now: Timestamp) {
        if self.role == Role::Coordinator && source != self.node_id() {
            warn!(
                node_id = self.node_id(),
                other = source,
                "another coordinator is active"
            );
        }
        match self.state() {
            NodeLifecycleState::SeekingCoordinator => {
                self.discovery.record_response(source, Role::Coordinator);
            }
            NodeLifecycleState::Active | NodeLifecycleState::ExecutingTask
                if self.coordinator() == Some(source) =>
            {
                self.transition(LifecycleEvent::CoordinatorHeartbeat, now);
            }
            NodeLifecycleState::Standalone => {
                debug!(node_id = self.node_id(), coordinator = source, "coordinator heard, seeking");
                self.rediscovery_requested = true;
            }
            _ => {}
        }
    }

    fn on_role_assignment(&mut self, source: NodeId, message_id: u32, role: Role, now: Timestamp) {
        let from_coordinator = if self.is_coordinator() {
            self.peers
                .get(source)
                .is_some_and(|p| p.role == Role::Coordinator)
        } else {
            self.coordinator() == Some(source)
        };
        if !from_coordinator {
            self.refuse(
                source,
                message_id,
                None,
                ErrorCode::NotCoordinator,
                "role assignment from a node that is not my coordinator".into(),
                now,
            );
            return;
        }
        self.apply_role(role, now);
        let _ = self.send(
            source,
            Payload::Ack(AckPayload {
                message_id,
                task_id: None,
            }),
            now,
        );
    }

    fn apply_role(&mut self, role: Role, now: Timestamp) {
        if role == self.role {
            return;
        }
        info!(node_id = self.node_id(), from = %self.role, to = %role, "role changed");
        self.role = role;
        match role {
            Role::Coordinator => {
                self.discovery.cancel();
                self.transition(LifecycleEvent::PromotedToCoordinator, now);
            }
            Role::Node => {
                if self.lifecycle.is_self_coordinated()
                    && self.transition(LifecycleEvent::CoordinatorRevoked, now)
                {
                    self.ledger.clear_outstanding();
                    self.relaunch(now);
                }
            }
        }
    }

    fn on_task_assignment(
        &mut self,
        source: NodeId,
        message_id: u32,
        sent_at: Timestamp,
        assignment: TaskAssignmentPayload,
        now: Timestamp,
    ) {
        let task_id = assignment.task_id;
        let refusal = if !self.config.enable_task_execution {
            Some((ErrorCode::ExecutionDisabled, "task execution disabled".to_string()))
        } else if self.coordinator() != Some(source) {
            Some((ErrorCode::NotCoordinator, format!("{source} is not my coordinator")))
        } else if !self.state().is_coordinated() {
            Some((ErrorCode::NotAccepting, format!("not accepting while {}", self.state())))
        } else {
            None
        };
        if let Some((code, reason)) = refusal {
            warn!(node_id = self.node_id(), task_id, from = source, %reason, "refusing task");
            self.refuse(source, message_id, Some(task_id), code, reason, now);
            return;
        }

        // Rebase the deadline onto our clock.
        let span = assignment.deadline.saturating_sub(sent_at);
        let task = Task::new(
            task_id,
            assignment.kind,
            now.saturating_add(span),
            assignment.priority,
            TaskOrigin::Coordinator(source),
            now,
        );
        self.tasks.enqueue(task);
        self.transition(LifecycleEvent::TaskAccepted, now);
        let _ = self.send(
            source,
            Payload::Ack(AckPayload {
                message_id,
                task_id: Some(task_id),
            }),
            now,
        );
    }

    fn on_config_update(
        &mut self,
        source: NodeId,
        message_id: u32,
        patch: NodeConfigPatch,
        now: Timestamp,
    ) {
        if source == self.node_id() || self.coordinator() != Some(source) {
            debug!(node_id = self.node_id(), from = source, "ignoring config update");
            return;
        }
        let candidate = self.config.patched(&patch);
        if let Err(reason) = candidate.validate() {
            warn!(node_id = self.node_id(), %reason, "rejecting config update");
            self.refuse(source, message_id, None, ErrorCode::InvalidConfig, reason, now);
            return;
        }
        info!(node_id = self.node_id(), ?patch, "config updated by coordinator");
        self.heartbeat.set_period(candidate.heartbeat_interval_ms);
        self.status.set_period(candidate.status_interval_ms);
        self.standalone_work
            .set_period(candidate.standalone_task_interval_ms);
        self.config = candidate;
        let _ = self.send(
            source,
            Payload::Ack(AckPayload {
                message_id,
                task_id: None,
            }),
            now,
        );
    }

    fn refuse(
        &mut self,
        dest: NodeId,
        message_id: u32,
        task_id: Option<TaskId>,
        code: ErrorCode,
        reason: String,
        now: Timestamp,
    ) {
        let payload = Payload::Error(ErrorPayload {
            code,
            message_id,
            task_id,
            reason,
        });
        let _ = self.send(dest, payload, now);
    }

    // ── Coordinator internals ──────────────────────────────────

    fn handle_result(&mut self, result: TaskResultPayload, now: Timestamp) {
        let task_id = result.task_id;
        match self.ledger.record_result(
            task_id,
            result.status,
            result.detail,
            self.config.max_retries,
        ) {
            FailureOutcome::Retry(plan) => self.retry(plan, now),
            FailureOutcome::Abandoned | FailureOutcome::Ignored => {}
        }
    }

    fn handle_failure(&mut self, task_id: TaskId, reason: String, now: Timestamp) {
        if let FailureOutcome::Retry(plan) = self.ledger.fail(task_id, reason, self.config.max_retries)
        {
            self.retry(plan, now);
        }
    }

    fn retry(&mut self, plan: RetryPlan, now: Timestamp) {
        let capability = plan.request.kind.required_capability();
        let target = if plan.previous_target == self.node_id()
            || self.peers.is_reachable(plan.previous_target)
        {
            Some(plan.previous_target)
        } else {
            self.select_target(capability, Some(plan.previous_target))
        };
        match target {
            Some(target) => {
                info!(
                    failed = plan.failed_id,
                    root = plan.root_id,
                    target,
                    attempt = plan.attempt,
                    "re-issuing task"
                );
                self.dispatch_assignment(
                    plan.request,
                    target,
                    plan.attempt,
                    Some(plan.root_id),
                    now,
                );
            }
            None => self.ledger.abandon(plan.failed_id),
        }
    }

    /// Record an assignment and send it, or queue it locally when the
    /// target is this node. Returns the task id and whether it went out.
    fn dispatch_assignment(
        &mut self,
        request: TaskRequest,
        target: NodeId,
        attempt: u32,
        root: Option<TaskId>,
        now: Timestamp,
    ) -> (TaskId, bool) {
        let deadline = now.saturating_add(request.timeout_ms.unwrap_or(self.config.task_timeout_ms));
        let kind = request.kind.clone();
        let priority = request.priority;
        let task_id = self.ledger.issue(request, target, now, deadline, attempt, root);

        if target == self.node_id() {
            self.tasks.enqueue(Task::new(
                task_id,
                kind,
                deadline,
                priority,
                TaskOrigin::Coordinator(target),
                now,
            ));
            self.ledger.acknowledge(task_id);
            return (task_id, true);
        }

        let payload = Payload::TaskAssignment(TaskAssignmentPayload {
            task_id,
            kind,
            deadline,
            priority,
            attempt,
        });
        match self.send(target, payload, now) {
            Ok(_) => (task_id, true),
            Err(e) => {
                // Silence past the deadline re-issues it.
                warn!(task_id, target, error = %e, "assignment not sent");
                (task_id, false)
            }
        }
    }

    // ── Outbound ───────────────────────────────────────────────

    fn send(&mut self, dest: NodeId, payload: Payload, now: Timestamp) -> Result<u32> {
        let message_id = self.router.next_message_id();
        let msg = MeshMessage {
            version: PROTOCOL_VERSION,
            source: self.node_id(),
            dest,
            message_id,
            hop_count: 0,
            max_hops: self.router.hop_budget(dest),
            timestamp: now,
            payload,
        };
        let frame = match self.codec.encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.send_failures += 1;
                warn!(node_id = self.node_id(), dest, error = %e, "cannot encode message");
                return Err(e.into());
            }
        };
        if self.transport.send(frame) {
            self.counters.sent += 1;
            debug!(
                node_id = self.node_id(),
                dest,
                message_id,
                kind = msg.msg_type().as_str(),
                "sent"
            );
            Ok(message_id)
        } else {
            self.counters.send_failures += 1;
            warn!(
                node_id = self.node_id(),
                dest,
                kind = msg.msg_type().as_str(),
                "radio refused frame"
            );
            Err(WildError::Transport { dest })
        }
    }

    /// Apply a lifecycle event, logging a rejected one.
    fn transition(&mut self, event: LifecycleEvent, now: Timestamp) -> bool {
        match self.lifecycle.apply(event, now) {
            Ok(_) => true,
            Err(e) => {
                warn!(node_id = self.node_id(), error = %e, "lifecycle event rejected");
                false
            }
        }
    }

    // ── Stats ──────────────────────────────────────────────────

    fn uptime(&self, now: Timestamp) -> u64 {
        self.started_at
            .map(|start| now.saturating_sub(start))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> NodeStats {
        let now = self.clock.now();
        let tasks = self.tasks.counters();
        let finished = tasks.completed + tasks.failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            tasks.completed as f64 / finished as f64
        };
        NodeStats {
            node_id: self.node_id(),
            state: self.state(),
            role: self.role,
            coordinator: self.coordinator(),
            uptime_ms: self.uptime(now),
            tasks_active: self.tasks.active_len(),
            tasks_completed: tasks.completed,
            tasks_failed: tasks.failed,
            tasks_timed_out: tasks.timed_out,
            success_rate,
            total_task_time_ms: tasks.total_task_time_ms,
            coordinator_changes: self.lifecycle.coordinator_changes(),
            last_coordinator_contact: self.lifecycle.last_coordinator_contact(),
            messages: self.counters,
            peers_known: self.peers.len(),
            peers_reachable: self.peers.reachable_count(),
            routes: self.router.route_count(),
            ledger: self.ledger.counters(),
        }
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode")
            .field("node_id", &self.node_id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("coordinator", &self.coordinator())
            .finish_non_exhaustive()
    }
}

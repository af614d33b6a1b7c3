use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;
use wildmesh_core::{CapabilitySet, NodeId, Role, Timestamp};

use crate::lifecycle::NodeLifecycleState;
use crate::protocol::{HeartbeatPayload, StatusPayload};

/// Known peer information tracked by the local node.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub role: Role,
    pub capabilities: CapabilitySet,
    /// Last lifecycle state the peer announced.
    pub state: Option<NodeLifecycleState>,
    /// Coordinator the peer last claimed to follow.
    pub known_coordinator: Option<NodeId>,
    pub first_seen: Timestamp,
    /// Never moves backwards.
    pub last_seen: Timestamp,
    pub signal_quality: f32,
    pub reachable_hops: u8,
    pub reachable: bool,
    pub status: Option<StatusPayload>,
}

/// Peers keyed by node id. Records are never removed,
/// only marked unreachable.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<NodeId, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a message from `node_id` was heard at `now`.
    pub fn observe(
        &mut self,
        node_id: NodeId,
        hops: u8,
        signal_quality: f32,
        now: Timestamp,
    ) -> &mut PeerRecord {
        let peer = self.peers.entry(node_id).or_insert_with(|| {
            info!(peer = node_id, hops, "registered mesh peer");
            PeerRecord {
                node_id,
                role: Role::Node,
                capabilities: CapabilitySet::BASIC,
                state: None,
                known_coordinator: None,
                first_seen: now,
                last_seen: now,
                signal_quality,
                reachable_hops: hops,
                reachable: true,
                status: None,
            }
        });
        if now >= peer.last_seen {
            peer.last_seen = now;
            peer.signal_quality = signal_quality;
            peer.reachable_hops = hops;
        }
        if !peer.reachable {
            info!(peer = node_id, "peer reachable again");
        }
        peer.reachable = true;
        peer
    }

    pub fn apply_heartbeat(&mut self, node_id: NodeId, hb: &HeartbeatPayload) {
        if let Some(peer) = self.get_mut(node_id) {
            peer.role = hb.role;
            peer.state = Some(hb.state);
            peer.known_coordinator = hb.coordinator;
            peer.capabilities = hb.capabilities;
        }
    }

    /// Update what a peer told us about itself outside a heartbeat.
    pub fn apply_presence(
        &mut self,
        node_id: NodeId,
        role: Role,
        capabilities: CapabilitySet,
        state: Option<NodeLifecycleState>,
    ) {
        if let Some(peer) = self.get_mut(node_id) {
            peer.role = role;
            peer.capabilities = capabilities;
            if state.is_some() {
                peer.state = state;
            }
        }
    }

    pub fn record_status(&mut self, node_id: NodeId, status: StatusPayload) {
        if let Some(peer) = self.get_mut(node_id) {
            peer.role = status.role;
            peer.state = Some(status.state);
            peer.status = Some(status);
        }
    }

    /// Mark peers silent for longer than `stale_after` as unreachable.
    /// Returns the ids that just became unreachable.
    pub fn sweep(&mut self, now: Timestamp, stale_after: u64) -> Vec<NodeId> {
        let mut lost = Vec::new();
        for peer in self.peers.values_mut() {
            if peer.reachable && now.saturating_sub(peer.last_seen) > stale_after {
                peer.reachable = false;
                lost.push(peer.node_id);
            }
        }
        lost
    }

    pub fn get(&self, node_id: NodeId) -> Option<&PeerRecord> {
        self.peers.get(&node_id)
    }

    fn get_mut(&mut self, node_id: NodeId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&node_id)
    }

    pub fn is_reachable(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some_and(|p| p.reachable)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn reachable_count(&self) -> usize {
        self.iter().filter(|p| p.reachable).count()
    }
}

/// Fixed-period timer driven by timestamp comparison.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    period_ms: u64,
    next_at: Timestamp,
}

impl Cadence {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            next_at: 0,
        }
    }

    /// Fire on the first check at or after `now`.
    pub fn reset(&mut self, now: Timestamp) {
        self.next_at = now;
    }

    /// True when the period has elapsed; schedules the next firing.
    pub fn due(&mut self, now: Timestamp) -> bool {
        if now < self.next_at {
            return false;
        }
        self.next_at = now.saturating_add(self.period_ms);
        true
    }

    /// Change the period, keeping the phase of the last firing.
    pub fn set_period(&mut self, period_ms: u64) {
        let last = self.next_at.saturating_sub(self.period_ms);
        self.period_ms = period_ms;
        self.next_at = last.saturating_add(period_ms);
    }

    pub fn period(&self) -> u64 {
        self.period_ms
    }

    pub fn next_at(&self) -> Timestamp {
        self.next_at
    }
}

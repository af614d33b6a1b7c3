use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;
use wildmesh_core::{BROADCAST, NodeId, Timestamp};

use crate::protocol::MeshMessage;

/// What to do with a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Addressed to us; consume it.
    Deliver,
    /// Broadcast with hop budget left: consume it and re-flood.
    DeliverAndForward,
    /// Someone else's unicast; pass it on.
    Forward,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Already seen this (source, message id).
    Duplicate,
    /// Our own transmission coming back.
    OwnEcho,
    /// Not for us and out of hops.
    HopLimit,
}

/// Bounded memory of recently seen `(source, message_id)` pairs.
#[derive(Debug)]
pub struct DedupWindow {
    order: VecDeque<(NodeId, u32)>,
    seen: HashSet<(NodeId, u32)>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a pair. Returns `false` if it was already in the window.
    pub fn insert(&mut self, source: NodeId, message_id: u32) -> bool {
        let key = (source, message_id);
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, source: NodeId, message_id: u32) -> bool {
        self.seen.contains(&(source, message_id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Best known way to reach a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    /// Forwarders between us and the node on the last accepted observation.
    pub hops: u8,
    /// 0.0 (barely heard) ..= 1.0 (strong).
    pub signal_quality: f32,
    pub updated_at: Timestamp,
}

/// Map RSSI in dBm onto 0..=1. Frames without RSSI count as middling.
pub fn signal_quality(rssi: Option<i16>) -> f32 {
    match rssi {
        Some(dbm) => ((f32::from(dbm) + 120.0) / 90.0).clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// Forwarding decisions, de-duplication and the route table for one node.
#[derive(Debug)]
pub struct Router {
    node_id: NodeId,
    max_hops: u8,
    route_timeout_ms: u64,
    dedup: DedupWindow,
    routes: HashMap<NodeId, Route>,
    next_message_id: u32,
}

impl Router {
    pub fn new(node_id: NodeId, max_hops: u8, dedup_window: usize, route_timeout_ms: u64) -> Self {
        Self {
            node_id,
            max_hops,
            route_timeout_ms,
            dedup: DedupWindow::new(dedup_window),
            routes: HashMap::new(),
            next_message_id: 1,
        }
    }

    /// Allocate the id for our next transmission and remember it so the
    /// echo is discarded.
    pub fn next_message_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        self.dedup.insert(self.node_id, id);
        id
    }

    pub fn route(&mut self, msg: &MeshMessage) -> RouteDecision {
        if msg.source == self.node_id {
            return RouteDecision::Drop(DropReason::OwnEcho);
        }
        if !self.dedup.insert(msg.source, msg.message_id) {
            return RouteDecision::Drop(DropReason::Duplicate);
        }

        let hops_left = msg.hop_count < msg.max_hops;
        let decision = if msg.dest == self.node_id {
            RouteDecision::Deliver
        } else if msg.dest == BROADCAST {
            if hops_left {
                RouteDecision::DeliverAndForward
            } else {
                RouteDecision::Deliver
            }
        } else if hops_left {
            RouteDecision::Forward
        } else {
            RouteDecision::Drop(DropReason::HopLimit)
        };

        debug!(
            node_id = self.node_id,
            source = msg.source,
            dest = msg.dest,
            message_id = msg.message_id,
            hop = msg.hop_count,
            ?decision,
            "routed frame"
        );
        decision
    }

    /// Learn from a message heard from `source` after `hops` forwards.
    pub fn observe(&mut self, source: NodeId, hops: u8, rssi: Option<i16>, now: Timestamp) {
        if source == self.node_id || source == BROADCAST {
            return;
        }
        let candidate = Route {
            hops,
            signal_quality: signal_quality(rssi),
            updated_at: now,
        };
        let max_hops = self.max_hops;
        let timeout = self.route_timeout_ms;
        self.routes
            .entry(source)
            .and_modify(|current| {
                let stale = now.saturating_sub(current.updated_at) > timeout;
                if stale || score(&candidate, max_hops) >= score(current, max_hops) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    pub fn route_to(&self, dest: NodeId) -> Option<&Route> {
        self.routes.get(&dest)
    }

    /// Hop budget for a new message to `dest`.
    pub fn hop_budget(&self, dest: NodeId) -> u8 {
        if dest == BROADCAST {
            return self.max_hops;
        }
        match self.routes.get(&dest) {
            Some(route) => route.hops.saturating_add(2).min(self.max_hops),
            None => self.max_hops,
        }
    }

    /// Drop routes not refreshed within the route timeout.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.routes.len();
        let timeout = self.route_timeout_ms;
        self.routes
            .retain(|_, r| now.saturating_sub(r.updated_at) <= timeout);
        before - self.routes.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }
}

fn score(route: &Route, max_hops: u8) -> f32 {
    route.signal_quality * f32::from(max_hops.saturating_sub(route.hops))
}

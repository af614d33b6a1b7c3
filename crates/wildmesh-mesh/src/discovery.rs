//! Coordinator discovery.
//!
//! A seeking node broadcasts a request and listens for a bounded window.
//! The first answer from a coordinator wins; there is no arbitration and
//! discovery never promotes anyone.

use tracing::{debug, info};
use wildmesh_core::{NodeId, Role, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(NodeId),
    NotFound,
}

/// One open discovery window.
#[derive(Debug, Clone)]
pub struct DiscoverySession {
    pub started_at: Timestamp,
    pub window_ms: u64,
    /// Everyone who answered, in arrival order.
    pub responders: Vec<(NodeId, Role)>,
    pub coordinator: Option<NodeId>,
}

impl DiscoverySession {
    pub fn closes_at(&self) -> Timestamp {
        self.started_at.saturating_add(self.window_ms)
    }
}

#[derive(Debug, Default)]
pub struct Discovery {
    session: Option<DiscoverySession>,
    attempts: u64,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new window, discarding any previous one.
    pub fn begin(&mut self, now: Timestamp, window_ms: u64) {
        self.attempts += 1;
        debug!(attempt = self.attempts, window_ms, "discovery window opened");
        self.session = Some(DiscoverySession {
            started_at: now,
            window_ms,
            responders: Vec::new(),
            coordinator: None,
        });
    }

    /// Record an answer. Returns the coordinator if this answer is the
    /// first one naming a coordinator.
    pub fn record_response(&mut self, from: NodeId, role: Role) -> Option<NodeId> {
        let session = self.session.as_mut()?;
        if !session.responders.iter().any(|(id, _)| *id == from) {
            session.responders.push((from, role));
        }
        if role == Role::Coordinator && session.coordinator.is_none() {
            info!(coordinator = from, "coordinator answered discovery");
            session.coordinator = Some(from);
            return Some(from);
        }
        None
    }

    /// Close the window if it has a result: a coordinator, or the deadline passed.
    pub fn poll(&mut self, now: Timestamp) -> Option<DiscoveryOutcome> {
        let session = self.session.as_ref()?;
        let outcome = match session.coordinator {
            Some(id) => DiscoveryOutcome::Found(id),
            None if now >= session.closes_at() => DiscoveryOutcome::NotFound,
            None => return None,
        };
        self.session = None;
        Some(outcome)
    }

    pub fn cancel(&mut self) {
        self.session = None;
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DiscoverySession> {
        self.session.as_ref()
    }

    /// Windows opened since creation.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

//! Coordinator-side bookkeeping of delegated tasks.
//!
//! Every assignment sent out gets a ledger entry. Failures, refusals and
//! silence past the deadline re-issue the work under a fresh task id until
//! the retry budget is spent, after which it is abandoned.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};
use wildmesh_core::{NodeId, TaskId, Timestamp};

use crate::task::{TaskKind, TaskStatus};

/// A unit of work to delegate.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub kind: TaskKind,
    /// Explicit target; otherwise the best eligible peer is picked.
    pub target: Option<NodeId>,
    /// 0 = lowest, 10 = highest.
    pub priority: u8,
    /// Deadline span; defaults to the node's task timeout.
    pub timeout_ms: Option<u64>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            target: None,
            priority: 5,
            timeout_ms: None,
        }
    }

    /// Send to a specific node.
    pub fn to(mut self, node: NodeId) -> Self {
        self.target = Some(node);
        self
    }

    /// Set the priority (0 = lowest, 10 = highest).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    /// Sent, no word yet.
    InFlight,
    /// Target confirmed receipt.
    Acknowledged,
    Completed,
    /// Replaced by a re-issue under a new id.
    Superseded,
    /// Out of retries.
    Abandoned,
}

impl AssignmentState {
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            AssignmentState::InFlight | AssignmentState::Acknowledged
        )
    }
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub task_id: TaskId,
    /// Id of the first issue of this work; shared by all its retries.
    pub root_id: TaskId,
    pub request: TaskRequest,
    pub target: NodeId,
    pub attempt: u32,
    pub issued_at: Timestamp,
    pub deadline: Timestamp,
    pub state: AssignmentState,
    pub detail: Option<String>,
}

/// Instructions for re-issuing failed work.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub failed_id: TaskId,
    pub root_id: TaskId,
    pub request: TaskRequest,
    pub previous_target: NodeId,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub enum FailureOutcome {
    Retry(RetryPlan),
    Abandoned,
    /// Unknown id or already settled.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LedgerCounters {
    pub assigned: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub completed: u64,
}

#[derive(Debug)]
pub struct TaskLedger {
    entries: BTreeMap<TaskId, LedgerEntry>,
    next_task_id: TaskId,
    counters: LedgerCounters,
}

impl Default for TaskLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLedger {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_task_id: 1,
            counters: LedgerCounters::default(),
        }
    }

    /// Record a new assignment and return its task id. `root` is the id of
    /// the original issue when this is a retry.
    pub fn issue(
        &mut self,
        request: TaskRequest,
        target: NodeId,
        now: Timestamp,
        deadline: Timestamp,
        attempt: u32,
        root: Option<TaskId>,
    ) -> TaskId {
        let task_id = self.next_task_id;
        // Stay clear of the local-task id space.
        self.next_task_id = (self.next_task_id + 1) & !crate::task::LOCAL_TASK_BIT;
        if self.next_task_id == 0 {
            self.next_task_id = 1;
        }

        info!(
            task_id,
            target,
            attempt,
            kind = request.kind.name(),
            "task assigned"
        );
        self.entries.insert(
            task_id,
            LedgerEntry {
                task_id,
                root_id: root.unwrap_or(task_id),
                request,
                target,
                attempt,
                issued_at: now,
                deadline,
                state: AssignmentState::InFlight,
                detail: None,
            },
        );
        self.counters.assigned += 1;
        if attempt > 0 {
            self.counters.retried += 1;
        }
        task_id
    }

    /// Forget an entry whose assignment never left this node.
    pub fn withdraw(&mut self, task_id: TaskId) -> Option<LedgerEntry> {
        let entry = self.entries.remove(&task_id)?;
        self.counters.assigned = self.counters.assigned.saturating_sub(1);
        Some(entry)
    }

    pub fn acknowledge(&mut self, task_id: TaskId) -> bool {
        match self.get_mut(task_id) {
            Some(entry) if entry.state == AssignmentState::InFlight => {
                entry.state = AssignmentState::Acknowledged;
                true
            }
            _ => false,
        }
    }

    /// Apply a result from the target.
    pub fn record_result(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        detail: String,
        max_retries: u32,
    ) -> FailureOutcome {
        match status {
            TaskStatus::Completed => {
                if let Some(entry) = self.get_mut(task_id)
                    && entry.state.is_outstanding()
                {
                    entry.state = AssignmentState::Completed;
                    entry.detail = Some(detail);
                    self.counters.completed += 1;
                    info!(task_id, "task completed by target");
                }
                FailureOutcome::Ignored
            }
            TaskStatus::Failed | TaskStatus::TimedOut => self.fail(task_id, detail, max_retries),
            TaskStatus::Pending | TaskStatus::Running => FailureOutcome::Ignored,
        }
    }

    /// Mark an outstanding entry failed and decide whether to retry.
    pub fn fail(&mut self, task_id: TaskId, reason: String, max_retries: u32) -> FailureOutcome {
        let Some(entry) = self.get_mut(task_id) else {
            return FailureOutcome::Ignored;
        };
        if !entry.state.is_outstanding() {
            return FailureOutcome::Ignored;
        }
        entry.detail = Some(reason);
        if entry.attempt < max_retries {
            entry.state = AssignmentState::Superseded;
            let plan = RetryPlan {
                failed_id: entry.task_id,
                root_id: entry.root_id,
                request: entry.request.clone(),
                previous_target: entry.target,
                attempt: entry.attempt + 1,
            };
            FailureOutcome::Retry(plan)
        } else {
            entry.state = AssignmentState::Abandoned;
            warn!(task_id, root_id = entry.root_id, "task abandoned after retries");
            self.counters.abandoned += 1;
            FailureOutcome::Abandoned
        }
    }

    /// Give up on superseded work that could not be re-issued.
    pub fn abandon(&mut self, task_id: TaskId) {
        if let Some(entry) = self.get_mut(task_id)
            && entry.state != AssignmentState::Abandoned
        {
            entry.state = AssignmentState::Abandoned;
            warn!(task_id, "task abandoned: no node to retry on");
            self.counters.abandoned += 1;
        }
    }

    /// Outstanding entries silent past `deadline + grace_ms`.
    pub fn overdue(&self, now: Timestamp, grace_ms: u64) -> Vec<TaskId> {
        self.entries
            .values()
            .filter(|e| e.state.is_outstanding() && now > e.deadline.saturating_add(grace_ms))
            .map(|e| e.task_id)
            .collect()
    }

    pub fn outstanding_for(&self, node: NodeId) -> usize {
        self.entries
            .values()
            .filter(|e| e.target == node && e.state.is_outstanding())
            .count()
    }

    pub fn outstanding(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state.is_outstanding())
            .count()
    }

    /// Drop all outstanding entries; settled ones are kept for inspection.
    pub fn clear_outstanding(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.state.is_outstanding());
        before - self.entries.len()
    }

    /// Keep at most `keep` settled entries, dropping the oldest.
    pub fn prune_settled(&mut self, keep: usize) {
        let mut settled: Vec<(Timestamp, TaskId)> = self
            .entries
            .values()
            .filter(|e| !e.state.is_outstanding())
            .map(|e| (e.issued_at, e.task_id))
            .collect();
        if settled.len() <= keep {
            return;
        }
        settled.sort_unstable();
        let excess = settled.len() - keep;
        for (_, task_id) in settled.iter().take(excess) {
            self.entries.remove(task_id);
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<&LedgerEntry> {
        self.entries.get(&task_id)
    }

    fn get_mut(&mut self, task_id: TaskId) -> Option<&mut LedgerEntry> {
        self.entries.get_mut(&task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counters(&self) -> LedgerCounters {
        self.counters
    }
}

//! Node-side task execution.
//!
//! Tasks are queued by id, started in priority order and polled against
//! a [`FieldDevice`] every tick until they finish or pass their deadline.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use wildmesh_core::{CapabilitySet, NodeId, TaskId, Timestamp};

/// Bit set on ids of tasks created locally rather than by a coordinator.
pub const LOCAL_TASK_BIT: TaskId = 0x8000_0000;

// ── Task kinds ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Storage folder on the node.
    pub folder: String,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            folder: "/images".into(),
            quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionParams {
    pub sensitivity: u8,
    /// How long to sample the sensor.
    pub window_ms: u64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            sensitivity: 50,
            window_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransmitParams {
    /// What to send, e.g. an image id.
    pub item: String,
    pub max_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub model: String,
    /// Image or sample to analyze.
    pub target: String,
}

/// The closed set of delegable work, each with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum TaskKind {
    ImageCapture(CaptureParams),
    MotionCheck(MotionParams),
    DataTransmission(TransmitParams),
    StatusReport,
    AiAnalysis(AnalysisParams),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::ImageCapture(_) => "image_capture",
            TaskKind::MotionCheck(_) => "motion_check",
            TaskKind::DataTransmission(_) => "data_transmission",
            TaskKind::StatusReport => "status_report",
            TaskKind::AiAnalysis(_) => "ai_analysis",
        }
    }

    /// Capability a node needs to run this kind.
    pub fn required_capability(&self) -> CapabilitySet {
        match self {
            TaskKind::ImageCapture(_) => CapabilitySet::IMAGE,
            TaskKind::MotionCheck(_) => CapabilitySet::SENSORS,
            TaskKind::DataTransmission(_) | TaskKind::StatusReport => CapabilitySet::BASIC,
            TaskKind::AiAnalysis(_) => CapabilitySet::AI,
        }
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut
        )
    }

    /// Statuses only move forward: Pending → Running → terminal,
    /// or Pending → terminal.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => next != TaskStatus::Pending,
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Assigned by this coordinator.
    Coordinator(NodeId),
    /// Autonomous work created by the node itself.
    Local,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Absolute, on the local clock.
    pub deadline: Timestamp,
    pub priority: u8,
    pub status: TaskStatus,
    pub origin: TaskOrigin,
    pub received_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Result body or error text once terminal.
    pub detail: Option<String>,
}

impl Task {
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        deadline: Timestamp,
        priority: u8,
        origin: TaskOrigin,
        now: Timestamp,
    ) -> Self {
        Self {
            task_id,
            kind,
            deadline,
            priority: priority.min(10),
            status: TaskStatus::Pending,
            origin,
            received_at: now,
            started_at: None,
            finished_at: None,
            detail: None,
        }
    }

    /// Move to `next` if that is a forward step. Returns whether it moved.
    pub fn advance(&mut self, next: TaskStatus, now: Timestamp) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        true
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == TaskOrigin::Local
    }
}

// ── Field device ───────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskExecutionError {
    #[error("device error: {0}")]
    Device(String),

    #[error("{0} is not supported on this node")]
    Unsupported(&'static str),

    #[error("cancelled")]
    Cancelled,
}

/// Result of polling a device call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState<T> {
    Pending,
    Ready(Result<T, TaskExecutionError>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub image_id: String,
    pub bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReport {
    pub motion: bool,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitReceipt {
    pub bytes_sent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub battery_percent: u8,
    pub free_storage_kb: u32,
    pub temperature_c: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub label: String,
    pub confidence: f32,
}

/// Camera, sensors and radio payload work, as seen by the task runner.
///
/// Every call is non-blocking and may be polled repeatedly with the same
/// task id until it returns `Ready`.
pub trait FieldDevice: Send {
    fn capture_image(&mut self, task_id: TaskId, params: &CaptureParams)
    -> CallState<CaptureReceipt>;

    fn check_motion(&mut self, task_id: TaskId, params: &MotionParams) -> CallState<MotionReport>;

    fn transmit_data(
        &mut self,
        task_id: TaskId,
        params: &TransmitParams,
    ) -> CallState<TransmitReceipt>;

    fn report_status(&mut self, task_id: TaskId) -> CallState<DeviceStatus>;

    fn analyze(&mut self, task_id: TaskId, params: &AnalysisParams) -> CallState<AnalysisReport>;

    /// Abandon an outstanding call.
    fn cancel(&mut self, _task_id: TaskId) {}

    fn battery_percent(&self) -> Option<u8> {
        None
    }
}

fn render<T: Serialize>(state: CallState<T>) -> CallState<String> {
    match state {
        CallState::Pending => CallState::Pending,
        CallState::Ready(Ok(value)) => CallState::Ready(
            serde_json::to_string(&value).map_err(|e| TaskExecutionError::Device(e.to_string())),
        ),
        CallState::Ready(Err(e)) => CallState::Ready(Err(e)),
    }
}

/// Poll the device call for `task`, rendering a finished result as JSON.
pub fn poll_device(device: &mut dyn FieldDevice, task: &Task) -> CallState<String> {
    let id = task.task_id;
    match &task.kind {
        TaskKind::ImageCapture(p) => render(device.capture_image(id, p)),
        TaskKind::MotionCheck(p) => render(device.check_motion(id, p)),
        TaskKind::DataTransmission(p) => render(device.transmit_data(id, p)),
        TaskKind::StatusReport => render(device.report_status(id)),
        TaskKind::AiAnalysis(p) => render(device.analyze(id, p)),
    }
}

// ── Queue ──────────────────────────────────────────────────────

/// Totals over every task that reached a terminal status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TaskCounters {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_task_time_ms: u64,
}

#[derive(Debug)]
pub struct TaskQueue {
    active: BTreeMap<TaskId, Task>,
    history: VecDeque<Task>,
    history_limit: usize,
    next_local: TaskId,
    counters: TaskCounters,
}

impl TaskQueue {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit,
            next_local: 1,
            counters: TaskCounters::default(),
        }
    }

    /// Id for a locally created task.
    pub fn next_local_id(&mut self) -> TaskId {
        let id = self.next_local | LOCAL_TASK_BIT;
        self.next_local = (self.next_local + 1) & !LOCAL_TASK_BIT;
        if self.next_local == 0 {
            self.next_local = 1;
        }
        id
    }

    /// Queue a task. A task id that is already active is ignored.
    pub fn enqueue(&mut self, task: Task) -> bool {
        if self.contains(task.task_id) {
            debug!(task_id = task.task_id, "task already queued");
            return false;
        }
        info!(
            task_id = task.task_id,
            kind = task.kind.name(),
            priority = task.priority,
            deadline = task.deadline,
            "task queued"
        );
        self.active.insert(task.task_id, task);
        true
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.active.contains_key(&task_id)
    }

    /// Time out every unfinished task past its deadline and cancel its
    /// device call. Returns the ids timed out.
    pub fn expire(&mut self, now: Timestamp, device: &mut dyn FieldDevice) -> Vec<TaskId> {
        let mut expired = Vec::new();
        for task in self.active.values_mut() {
            if task.status.is_terminal() || now <= task.deadline {
                continue;
            }
            let was_running = task.status == TaskStatus::Running;
            if task.advance(TaskStatus::TimedOut, now) {
                task.detail = Some(format!("deadline {} passed", task.deadline));
                if was_running {
                    device.cancel(task.task_id);
                }
                warn!(task_id = task.task_id, kind = task.kind.name(), "task timed out");
                expired.push(task.task_id);
            }
        }
        expired
    }

    /// Start pending tasks and poll running ones, highest priority first.
    /// Returns the ids that finished during this call.
    pub fn run(&mut self, now: Timestamp, device: &mut dyn FieldDevice) -> Vec<TaskId> {
        let mut order: Vec<&mut Task> = self
            .active
            .values_mut()
            .filter(|t| !t.status.is_terminal())
            .collect();
        order.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.received_at, t.task_id));

        let mut finished = Vec::new();
        for task in order {
            if task.status == TaskStatus::Pending {
                task.advance(TaskStatus::Running, now);
                debug!(task_id = task.task_id, kind = task.kind.name(), "task started");
            }
            match poll_device(device, task) {
                CallState::Pending => {}
                CallState::Ready(Ok(body)) => {
                    task.advance(TaskStatus::Completed, now);
                    task.detail = Some(body);
                    info!(task_id = task.task_id, kind = task.kind.name(), "task completed");
                    finished.push(task.task_id);
                }
                CallState::Ready(Err(e)) => {
                    task.advance(TaskStatus::Failed, now);
                    task.detail = Some(e.to_string());
                    warn!(task_id = task.task_id, error = %e, "task failed");
                    finished.push(task.task_id);
                }
            }
        }
        finished
    }

    /// Move terminal tasks into history and return copies of them.
    pub fn drain_terminal(&mut self) -> Vec<Task> {
        let ids: Vec<TaskId> = self
            .active
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.task_id)
            .collect();

        let mut done = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(task) = self.active.remove(&id) else {
                continue;
            };
            match task.status {
                TaskStatus::Completed => self.counters.completed += 1,
                TaskStatus::TimedOut => {
                    self.counters.failed += 1;
                    self.counters.timed_out += 1;
                }
                _ => self.counters.failed += 1,
            }
            self.counters.total_task_time_ms += task.duration_ms();
            done.push(task.clone());
            self.remember(task);
        }
        done
    }

    fn remember(&mut self, task: Task) {
        if self.history_limit == 0 {
            return;
        }
        self.history.push_back(task);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Drop every unfinished task, cancelling outstanding device calls.
    pub fn clear_active(&mut self, device: &mut dyn FieldDevice) -> usize {
        let n = self.active.len();
        for task in self.active.values() {
            if task.status == TaskStatus::Running {
                device.cancel(task.task_id);
            }
        }
        self.active.clear();
        n
    }

    pub fn active(&self) -> impl Iterator<Item = &Task> {
        self.active.values()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Finished tasks, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Task> {
        self.history.iter()
    }

    pub fn counters(&self) -> TaskCounters {
        self.counters
    }
}

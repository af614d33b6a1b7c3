//! In-process stand-ins for the radio and the field hardware, used by the
//! tests and by `wildmesh simulate`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wildmesh_core::{NodeId, TaskId};

use crate::task::{
    AnalysisParams, AnalysisReport, CallState, CaptureParams, CaptureReceipt, DeviceStatus,
    FieldDevice, MotionParams, MotionReport, TaskExecutionError, TransmitParams, TransmitReceipt,
};
use crate::transport::{InboundFrame, Transport};

const DEFAULT_RSSI: i16 = -70;

/// One frame put on the air.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: NodeId,
    pub len: usize,
    /// How many radios received it.
    pub delivered: usize,
}

#[derive(Debug, Default)]
struct RadioState {
    inbox: VecDeque<InboundFrame>,
    online: bool,
}

#[derive(Debug)]
struct AirState {
    radios: HashMap<NodeId, RadioState>,
    /// Directed links with their RSSI. `None` means everyone hears everyone.
    links: Option<HashMap<(NodeId, NodeId), i16>>,
    loss: f64,
    rng: StdRng,
    log: Vec<Transmission>,
}

/// A shared radio medium. Clones refer to the same air.
#[derive(Debug, Clone)]
pub struct SimulatedAir {
    inner: Arc<Mutex<AirState>>,
}

impl SimulatedAir {
    /// Lossless full mesh.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AirState {
                radios: HashMap::new(),
                links: None,
                loss: 0.0,
                rng: StdRng::seed_from_u64(seed),
                log: Vec::new(),
            })),
        }
    }

    /// Probability that any single delivery is lost.
    pub fn with_loss(self, loss: f64) -> Self {
        self.inner.lock().loss = loss.clamp(0.0, 1.0);
        self
    }

    /// Nodes hear only the neighbours listed via [`link`](Self::link).
    pub fn with_explicit_links(self) -> Self {
        self.inner.lock().links.get_or_insert_with(HashMap::new);
        self
    }

    /// Chain `ids` so each hears only its neighbours.
    pub fn line(seed: u64, ids: &[NodeId]) -> Self {
        let air = Self::new(seed).with_explicit_links();
        for pair in ids.windows(2) {
            air.link(pair[0], pair[1], DEFAULT_RSSI);
        }
        air
    }

    /// Two-way link between `a` and `b`. Switches the air to explicit links.
    pub fn link(&self, a: NodeId, b: NodeId, rssi: i16) {
        let mut state = self.inner.lock();
        let links = state.links.get_or_insert_with(HashMap::new);
        links.insert((a, b), rssi);
        links.insert((b, a), rssi);
    }

    pub fn unlink(&self, a: NodeId, b: NodeId) {
        let mut state = self.inner.lock();
        if let Some(links) = state.links.as_mut() {
            links.remove(&(a, b));
            links.remove(&(b, a));
        }
    }

    /// Attach a radio for `node_id`.
    pub fn radio(&self, node_id: NodeId) -> SimRadio {
        self.inner.lock().radios.insert(
            node_id,
            RadioState {
                inbox: VecDeque::new(),
                online: true,
            },
        );
        SimRadio {
            node_id,
            air: Arc::clone(&self.inner),
        }
    }

    /// An offline radio neither sends nor receives. Its inbox is flushed.
    pub fn set_online(&self, node_id: NodeId, online: bool) {
        if let Some(radio) = self.inner.lock().radios.get_mut(&node_id) {
            radio.online = online;
            if !online {
                radio.inbox.clear();
            }
        }
    }

    /// Frames waiting for `node_id`.
    pub fn pending(&self, node_id: NodeId) -> usize {
        self.inner
            .lock()
            .radios
            .get(&node_id)
            .map(|r| r.inbox.len())
            .unwrap_or(0)
    }

    /// Inject raw bytes into a radio's inbox, as if heard over the air.
    pub fn inject(&self, node_id: NodeId, frame: InboundFrame) {
        if let Some(radio) = self.inner.lock().radios.get_mut(&node_id) {
            radio.inbox.push_back(frame);
        }
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        self.inner.lock().log.clone()
    }

    pub fn transmission_count(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn clear_log(&self) {
        self.inner.lock().log.clear();
    }
}

impl AirState {
    fn broadcast(&mut self, from: NodeId, frame: Bytes) -> bool {
        match self.radios.get(&from) {
            Some(radio) if radio.online => {}
            _ => return false,
        }

        let mut listeners: Vec<(NodeId, i16)> = match &self.links {
            None => self
                .radios
                .keys()
                .filter(|&&id| id != from)
                .map(|&id| (id, DEFAULT_RSSI))
                .collect(),
            Some(links) => links
                .iter()
                .filter(|((a, _), _)| *a == from)
                .map(|((_, b), rssi)| (*b, *rssi))
                .collect(),
        };
        // Stable delivery order keeps seeded runs reproducible.
        listeners.sort_unstable_by_key(|(id, _)| *id);

        let mut delivered = 0;
        for (id, rssi) in listeners {
            if self.loss > 0.0 && self.rng.random_bool(self.loss) {
                continue;
            }
            if let Some(radio) = self.radios.get_mut(&id)
                && radio.online
            {
                radio
                    .inbox
                    .push_back(InboundFrame::new(frame.clone()).with_rssi(rssi));
                delivered += 1;
            }
        }
        self.log.push(Transmission {
            from,
            len: frame.len(),
            delivered,
        });
        true
    }
}

/// One node's view of the [`SimulatedAir`].
#[derive(Debug, Clone)]
pub struct SimRadio {
    node_id: NodeId,
    air: Arc<Mutex<AirState>>,
}

impl SimRadio {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

impl Transport for SimRadio {
    fn send(&mut self, frame: Bytes) -> bool {
        self.air.lock().broadcast(self.node_id, frame)
    }

    fn try_receive(&mut self) -> Option<InboundFrame> {
        let mut state = self.air.lock();
        let radio = state.radios.get_mut(&self.node_id)?;
        if !radio.online {
            return None;
        }
        radio.inbox.pop_front()
    }
}

// ── Scripted device ────────────────────────────────────────────

/// How a [`ScriptedDevice`] answers one kind of call.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Succeed on the `polls`-th poll (1 = immediately).
    Succeed { polls: u32 },
    Fail { polls: u32, reason: String },
    /// Never return.
    Hang,
}

/// What the device was asked to do.
#[derive(Debug, Default, Clone)]
pub struct DeviceLog {
    /// (task id, call name) per first poll.
    pub started: Vec<(TaskId, &'static str)>,
    pub cancelled: Vec<TaskId>,
}

/// A [`FieldDevice`] whose answers are set up in advance.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    default: Script,
    per_call: HashMap<&'static str, Script>,
    polls: HashMap<TaskId, u32>,
    battery: Option<u8>,
    log: Arc<Mutex<DeviceLog>>,
}

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new(Script::Succeed { polls: 1 })
    }
}

impl ScriptedDevice {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_call: HashMap::new(),
            polls: HashMap::new(),
            battery: Some(100),
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    /// Override the script for one call: `capture_image`, `check_motion`,
    /// `transmit_data`, `report_status` or `analyze`.
    pub fn with_script(mut self, call: &'static str, script: Script) -> Self {
        self.per_call.insert(call, script);
        self
    }

    pub fn with_battery(mut self, percent: Option<u8>) -> Self {
        self.battery = percent;
        self
    }

    /// Shared handle to the call log; stays valid after the device is boxed.
    pub fn log(&self) -> Arc<Mutex<DeviceLog>> {
        Arc::clone(&self.log)
    }

    fn step<T>(&mut self, task_id: TaskId, call: &'static str, ok: impl FnOnce() -> T) -> CallState<T> {
        let count = self.polls.entry(task_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.log.lock().started.push((task_id, call));
        }
        let count = *count;

        let script = self.per_call.get(call).unwrap_or(&self.default);
        let state = match script {
            Script::Hang => CallState::Pending,
            Script::Succeed { polls } if count >= *polls => CallState::Ready(Ok(ok())),
            Script::Fail { polls, reason } if count >= *polls => {
                CallState::Ready(Err(TaskExecutionError::Device(reason.clone())))
            }
            _ => CallState::Pending,
        };
        if matches!(state, CallState::Ready(_)) {
            self.polls.remove(&task_id);
        }
        state
    }
}

impl FieldDevice for ScriptedDevice {
    fn capture_image(&mut self, task_id: TaskId, params: &CaptureParams) -> CallState<CaptureReceipt> {
        let folder = params.folder.clone();
        self.step(task_id, "capture_image", move || CaptureReceipt {
            image_id: format!("{}/IMG_{:08}.jpg", folder.trim_end_matches('/'), task_id),
            bytes: 48_000,
        })
    }

    fn check_motion(&mut self, task_id: TaskId, params: &MotionParams) -> CallState<MotionReport> {
        let sensitivity = params.sensitivity;
        self.step(task_id, "check_motion", move || MotionReport {
            motion: sensitivity >= 50,
            confidence: f32::from(sensitivity.min(100)) / 100.0,
        })
    }

    fn transmit_data(
        &mut self,
        task_id: TaskId,
        params: &TransmitParams,
    ) -> CallState<TransmitReceipt> {
        let max = params.max_bytes;
        self.step(task_id, "transmit_data", move || TransmitReceipt { bytes_sent: max })
    }

    fn report_status(&mut self, task_id: TaskId) -> CallState<DeviceStatus> {
        let battery = self.battery.unwrap_or(0);
        self.step(task_id, "report_status", move || DeviceStatus {
            battery_percent: battery,
            free_storage_kb: 1_024_000,
            temperature_c: 18.5,
        })
    }

    fn analyze(&mut self, task_id: TaskId, params: &AnalysisParams) -> CallState<AnalysisReport> {
        let target = params.target.clone();
        self.step(task_id, "analyze", move || AnalysisReport {
            label: format!("deer ({target})"),
            confidence: 0.87,
        })
    }

    fn cancel(&mut self, task_id: TaskId) {
        self.polls.remove(&task_id);
        self.log.lock().cancelled.push(task_id);
    }

    fn battery_percent(&self) -> Option<u8> {
        self.battery
    }
}

use serde::{Deserialize, Serialize};
use wildmesh_core::{CapabilitySet, NodeId, NodeIdentity, Role};

/// Smallest frame the codec can carry: the fixed header plus a minimal payload.
pub const MIN_FRAME_BYTES: usize = 96;

/// Root configuration, read from `wildmesh.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WildmeshConfig {
    pub identity: IdentityConfig,
    pub node: NodeConfig,
    pub mesh: MeshConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

// ── Identity ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Radio-level node id. 0 is reserved for broadcast.
    pub node_id: NodeId,
    /// Role this node asks for at start.
    pub role: Role,
    /// Capability names: basic, image, sensors, ai, gateway, high_power.
    pub capabilities: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            role: Role::Node,
            capabilities: vec!["basic".into(), "image".into(), "sensors".into()],
        }
    }
}

impl IdentityConfig {
    /// Build the immutable identity for this node.
    pub fn to_identity(&self) -> wildmesh_core::Result<NodeIdentity> {
        let caps = CapabilitySet::from_names(&self.capabilities)?;
        NodeIdentity::new(self.node_id, self.role, caps)
    }
}

// ── Node timing & behaviour ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Heartbeat broadcast period.
    pub heartbeat_interval_ms: u64,
    /// Coordinator silence after which a node falls back to standalone.
    pub coordinator_timeout_ms: u64,
    /// Default deadline span for tasks submitted without one.
    pub task_timeout_ms: u64,
    /// Coordinator-side re-issues of a failed or silent task.
    pub max_retries: u32,
    /// Run local monitoring work when no coordinator is reachable.
    pub enable_autonomous_mode: bool,
    /// Accept and run delegated tasks.
    pub enable_task_execution: bool,
    /// How long discovery collects answers. Defaults to coordinator_timeout / 10.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_window_ms: Option<u64>,
    /// Period of status reports to the coordinator.
    pub status_interval_ms: u64,
    /// Period of autonomous tasks while standalone.
    pub standalone_task_interval_ms: u64,
    /// Finished tasks kept for inspection.
    pub task_history_limit: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            coordinator_timeout_ms: 600_000,
            task_timeout_ms: 300_000,
            max_retries: 3,
            enable_autonomous_mode: true,
            enable_task_execution: true,
            discovery_window_ms: None,
            status_interval_ms: 300_000,
            standalone_task_interval_ms: 300_000,
            task_history_limit: 32,
        }
    }
}

impl NodeConfig {
    pub fn discovery_window(&self) -> u64 {
        self.discovery_window_ms
            .unwrap_or(self.coordinator_timeout_ms / 10)
            .max(1)
    }

    /// Interval between rediscovery attempts while standalone.
    pub fn rediscovery_interval(&self) -> u64 {
        self.coordinator_timeout_ms / 2
    }

    /// Silence after which a peer is marked unreachable.
    pub fn peer_stale_after(&self) -> u64 {
        self.coordinator_timeout_ms / 2
    }

    /// Return a copy with the patch applied.
    pub fn patched(&self, patch: &NodeConfigPatch) -> NodeConfig {
        let mut next = self.clone();
        if let Some(v) = patch.heartbeat_interval_ms {
            next.heartbeat_interval_ms = v;
        }
        if let Some(v) = patch.coordinator_timeout_ms {
            next.coordinator_timeout_ms = v;
        }
        if let Some(v) = patch.task_timeout_ms {
            next.task_timeout_ms = v;
        }
        if let Some(v) = patch.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = patch.enable_autonomous_mode {
            next.enable_autonomous_mode = v;
        }
        if let Some(v) = patch.enable_task_execution {
            next.enable_task_execution = v;
        }
        if let Some(v) = patch.status_interval_ms {
            next.status_interval_ms = v;
        }
        if let Some(v) = patch.standalone_task_interval_ms {
            next.standalone_task_interval_ms = v;
        }
        next
    }

    fn check(&self, warnings: &mut Vec<ConfigWarning>) {
        if self.heartbeat_interval_ms == 0 {
            warnings.push(ConfigWarning::error(
                "node.heartbeat_interval_ms",
                "heartbeat interval is 0",
                Some("Set to e.g. 60000"),
            ));
        }
        if self.coordinator_timeout_ms <= self.heartbeat_interval_ms {
            warnings.push(ConfigWarning::error(
                "node.coordinator_timeout_ms",
                format!(
                    "timeout {}ms is not longer than the heartbeat interval {}ms",
                    self.coordinator_timeout_ms, self.heartbeat_interval_ms
                ),
                Some("The coordinator would time out between two heartbeats"),
            ));
        } else if self.coordinator_timeout_ms < self.heartbeat_interval_ms.saturating_mul(3) {
            warnings.push(ConfigWarning::warning(
                "node.coordinator_timeout_ms",
                "timeout covers fewer than 3 heartbeats",
                Some("A couple of lost heartbeats will force standalone mode"),
            ));
        }
        if self.task_timeout_ms == 0 {
            warnings.push(ConfigWarning::error(
                "node.task_timeout_ms",
                "task timeout is 0: every task would time out immediately",
                Some("Set to e.g. 300000"),
            ));
        }
        if self.max_retries > 10 {
            warnings.push(ConfigWarning::warning(
                "node.max_retries",
                format!("{} retries on a low-bandwidth link", self.max_retries),
                Some("Each retry is a fresh radio transmission; 3 is typical"),
            ));
        }
        match self.discovery_window_ms {
            Some(0) => warnings.push(ConfigWarning::error(
                "node.discovery_window_ms",
                "discovery window is 0",
                Some("Remove the key to use coordinator_timeout / 10"),
            )),
            Some(w) if w >= self.coordinator_timeout_ms => warnings.push(ConfigWarning::warning(
                "node.discovery_window_ms",
                "discovery window is as long as the coordinator timeout",
                None,
            )),
            _ => {}
        }
        if self.status_interval_ms == 0 {
            warnings.push(ConfigWarning::error(
                "node.status_interval_ms",
                "status interval is 0",
                Some("Set to e.g. 300000"),
            ));
        }
        if self.standalone_task_interval_ms == 0 {
            warnings.push(ConfigWarning::error(
                "node.standalone_task_interval_ms",
                "standalone task interval is 0",
                Some("Set to e.g. 300000"),
            ));
        }
        if self.task_history_limit == 0 {
            warnings.push(ConfigWarning::warning(
                "node.task_history_limit",
                "finished tasks are discarded immediately",
                None,
            ));
        }
        if !self.enable_task_execution {
            warnings.push(ConfigWarning::info(
                "node.enable_task_execution",
                "task execution disabled: assignments will be refused",
                None,
            ));
        }
        if !self.enable_autonomous_mode {
            warnings.push(ConfigWarning::info(
                "node.enable_autonomous_mode",
                "autonomous mode disabled: the node keeps seeking a coordinator instead",
                None,
            ));
        }
    }

    /// Validate just this section. Returns the error messages, if any.
    pub fn validate(&self) -> Result<(), String> {
        let mut warnings = Vec::new();
        self.check(&mut warnings);
        collect_errors(&warnings)
    }
}

/// Partial node config carried by a `ConfigUpdate` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_autonomous_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_task_execution: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone_task_interval_ms: Option<u64>,
}

impl NodeConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == NodeConfigPatch::default()
    }
}

// ── Mesh ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Forwarding budget for broadcasts and unknown routes.
    pub max_hops: u8,
    /// Number of recent (source, message id) pairs remembered for de-duplication.
    pub dedup_window: usize,
    /// Age after which a learned route is replaceable and eventually pruned.
    pub route_timeout_ms: u64,
    /// Largest encoded frame the radio accepts.
    pub max_frame_bytes: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_hops: 8,
            dedup_window: 256,
            route_timeout_ms: 300_000,
            max_frame_bytes: 1024,
        }
    }
}

impl MeshConfig {
    fn check(&self, warnings: &mut Vec<ConfigWarning>) {
        if self.max_hops == 0 {
            warnings.push(ConfigWarning::error(
                "mesh.max_hops",
                "max_hops is 0: nothing would ever be forwarded",
                Some("Set to e.g. 8"),
            ));
        } else if self.max_hops > 16 {
            warnings.push(ConfigWarning::warning(
                "mesh.max_hops",
                format!("max_hops {} floods far beyond a typical deployment", self.max_hops),
                Some("Every extra hop is another retransmission per broadcast"),
            ));
        }
        if self.dedup_window == 0 {
            warnings.push(ConfigWarning::error(
                "mesh.dedup_window",
                "de-duplication window is 0: broadcasts would loop",
                Some("Set to e.g. 256"),
            ));
        }
        if self.route_timeout_ms == 0 {
            warnings.push(ConfigWarning::error(
                "mesh.route_timeout_ms",
                "route timeout is 0",
                Some("Set to e.g. 300000"),
            ));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            warnings.push(ConfigWarning::error(
                "mesh.max_frame_bytes",
                format!("{} bytes cannot hold a frame", self.max_frame_bytes),
                Some(format!("Use at least {MIN_FRAME_BYTES}").as_str()),
            ));
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: pretty, json, compact.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Simulation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Node n hears only n-1 and n+1.
    #[default]
    Line,
    /// Everyone hears everyone.
    Full,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Line => "line",
            Topology::Full => "full",
        }
    }
}

impl std::str::FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(Topology::Line),
            "full" => Ok(Topology::Full),
            other => Err(format!("unknown topology '{other}' (expected line or full)")),
        }
    }
}

/// Parameters for `wildmesh simulate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub nodes: u32,
    pub coordinator: NodeId,
    pub topology: Topology,
    /// Per-frame loss probability.
    pub loss: f64,
    pub tick_ms: u64,
    pub duration_secs: u64,
    /// How often the coordinator submits a task. 0 disables.
    pub task_every_secs: u64,
    pub device_latency_ms: u64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            coordinator: 1,
            topology: Topology::Line,
            loss: 0.05,
            tick_ms: 1_000,
            duration_secs: 3_600,
            task_every_secs: 120,
            device_latency_ms: 2_000,
            seed: 7,
        }
    }
}

impl SimulationConfig {
    fn check(&self, warnings: &mut Vec<ConfigWarning>) {
        if self.nodes < 2 {
            warnings.push(ConfigWarning::warning(
                "simulation.nodes",
                "a single node has nobody to coordinate",
                None,
            ));
        }
        if self.coordinator == 0 || self.coordinator > self.nodes {
            warnings.push(ConfigWarning::error(
                "simulation.coordinator",
                format!("coordinator {} is not one of nodes 1..={}", self.coordinator, self.nodes),
                None,
            ));
        }
        if !(0.0..=1.0).contains(&self.loss) {
            warnings.push(ConfigWarning::error(
                "simulation.loss",
                format!("loss {} is not a probability", self.loss),
                Some("Use a value between 0.0 and 1.0"),
            ));
        }
        if self.tick_ms == 0 {
            warnings.push(ConfigWarning::error(
                "simulation.tick_ms",
                "tick period is 0",
                Some("Set to e.g. 1000"),
            ));
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl ConfigWarning {
    fn new(
        severity: WarningSeverity,
        field: &str,
        message: impl Into<String>,
        hint: Option<&str>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity,
            hint: hint.map(str::to_string),
        }
    }

    fn error(field: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::new(WarningSeverity::Error, field, message, hint)
    }

    fn warning(field: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::new(WarningSeverity::Warning, field, message, hint)
    }

    fn info(field: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::new(WarningSeverity::Info, field, message, hint)
    }
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

fn collect_errors(warnings: &[ConfigWarning]) -> Result<(), String> {
    let errors: Vec<String> = warnings
        .iter()
        .filter(|w| w.severity == WarningSeverity::Error)
        .map(|w| format!("{}: {}", w.field, w.message))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")))
    }
}

impl WildmeshConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Identity ───
        if self.identity.node_id == 0 {
            warnings.push(ConfigWarning::error(
                "identity.node_id",
                "node id 0 is reserved for broadcast",
                Some("Pick a unique id per device, starting at 1"),
            ));
        }
        if let Err(e) = CapabilitySet::from_names(&self.identity.capabilities) {
            warnings.push(ConfigWarning::error(
                "identity.capabilities",
                e.to_string(),
                Some("Valid: basic, image, sensors, ai, gateway, high_power"),
            ));
        }

        self.node.check(&mut warnings);
        self.mesh.check(&mut warnings);

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning::warning(
                "logging.format",
                format!("unknown log format '{}'", self.logging.format),
                Some(format!("Valid values: {}", valid_formats.join(", ")).as_str()),
            ));
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning::warning(
                "logging.level",
                format!("unknown log level '{}'", self.logging.level),
                Some(format!("Valid values: {}", valid_levels.join(", ")).as_str()),
            ));
        }

        self.simulation.check(&mut warnings);

        collect_errors(&warnings)?;
        Ok(warnings)
    }
}

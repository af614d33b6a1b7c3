//! `wildmesh simulate`: a whole fleet in one process, sharing a simulated
//! radio medium and a virtual clock.

use std::time::Duration;

use console::style;
use serde::Serialize;
use tracing::{debug, info, warn};
use wildmesh_config::{SimulationConfig, Topology, WildmeshConfig};
use wildmesh_core::{CapabilitySet, NodeId, NodeIdentity, Role, WildError};
use wildmesh_mesh::coordinator::TaskRequest;
use wildmesh_mesh::sim::{Script, ScriptedDevice, SimulatedAir};
use wildmesh_mesh::task::{CaptureParams, MotionParams, TaskKind, TransmitParams};
use wildmesh_mesh::{ManualClock, MeshNode, NodeLifecycleState, NodeStats};

use super::SimulateArgs;

/// What a finished run looked like.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub sim_time_ms: u64,
    pub ticks: u64,
    pub topology: Topology,
    pub transmissions: usize,
    pub tasks_submitted: u64,
    /// Submissions the coordinator could not place.
    pub tasks_rejected: u64,
    pub nodes: Vec<NodeStats>,
}

/// Nodes, air and clock of one simulation.
pub struct Fleet {
    sim: SimulationConfig,
    air: SimulatedAir,
    clock: ManualClock,
    nodes: Vec<MeshNode>,
    elapsed_ms: u64,
    ticks: u64,
    next_task_at: u64,
    submitted: u64,
    rejected: u64,
}

impl Fleet {
    /// Build every node from `config.node`/`config.mesh` and the
    /// `[simulation]` table. Nothing is started yet.
    pub fn build(config: &WildmeshConfig) -> wildmesh_core::Result<Self> {
        let sim = config.simulation.clone();
        if sim.nodes == 0 {
            return Err(WildError::ConfigValidation {
                field: "simulation.nodes".into(),
                reason: "at least one node is needed".into(),
            });
        }
        if sim.tick_ms == 0 {
            return Err(WildError::ConfigValidation {
                field: "simulation.tick_ms".into(),
                reason: "tick must be at least 1ms".into(),
            });
        }

        let ids: Vec<NodeId> = (1..=sim.nodes).collect();
        let air = match sim.topology {
            Topology::Line => SimulatedAir::line(sim.seed, &ids),
            Topology::Full => SimulatedAir::new(sim.seed),
        }
        .with_loss(sim.loss);
        let clock = ManualClock::new(0);

        // Device latency in whole ticks.
        let polls = u32::try_from((sim.device_latency_ms / sim.tick_ms).max(1)).unwrap_or(u32::MAX);

        let mut nodes = Vec::with_capacity(ids.len());
        for &id in &ids {
            let role = if id == sim.coordinator {
                Role::Coordinator
            } else {
                Role::Node
            };
            let identity = NodeIdentity::new(id, role, capabilities_for(id, role))?;
            let device = ScriptedDevice::new(Script::Succeed { polls })
                .with_battery(Some(battery_for(id)));
            nodes.push(MeshNode::new(
                identity,
                config.node.clone(),
                config.mesh.clone(),
                Box::new(clock.clone()),
                Box::new(air.radio(id)),
                Box::new(device),
            ));
        }

        Ok(Self {
            next_task_at: sim.task_every_secs.saturating_mul(1_000),
            sim,
            air,
            clock,
            nodes,
            elapsed_ms: 0,
            ticks: 0,
            submitted: 0,
            rejected: 0,
        })
    }

    pub fn start(&mut self) -> wildmesh_core::Result<()> {
        for node in &mut self.nodes {
            node.start()?;
        }
        info!(
            nodes = self.nodes.len(),
            topology = self.sim.topology.as_str(),
            loss = self.sim.loss,
            "fleet started"
        );
        Ok(())
    }

    /// Submit due work, tick every node once, then advance the clock.
    pub fn step(&mut self) {
        if self.next_task_at > 0 && self.elapsed_ms >= self.next_task_at {
            self.submit_next();
            self.next_task_at = self
                .next_task_at
                .saturating_add(self.sim.task_every_secs.saturating_mul(1_000));
        }
        for node in &mut self.nodes {
            node.tick();
        }
        self.clock.advance(self.sim.tick_ms);
        self.elapsed_ms += self.sim.tick_ms;
        self.ticks += 1;
    }

    pub fn total_ticks(&self) -> u64 {
        self.sim.duration_secs.saturating_mul(1_000) / self.sim.tick_ms
    }

    /// Run the whole duration as fast as possible.
    pub fn run_virtual(&mut self) {
        for _ in 0..self.total_ticks() {
            self.step();
        }
    }

    fn submit_next(&mut self) {
        let kind = match (self.submitted + self.rejected) % 4 {
            0 => TaskKind::ImageCapture(CaptureParams::default()),
            1 => TaskKind::MotionCheck(MotionParams::default()),
            2 => TaskKind::StatusReport,
            _ => TaskKind::DataTransmission(TransmitParams {
                item: "latest".into(),
                max_bytes: 4_096,
            }),
        };
        let Some(coordinator) = self
            .nodes
            .iter_mut()
            .find(|n| n.role() == Role::Coordinator && n.coordinator() == Some(n.node_id()))
        else {
            debug!("no acting coordinator, skipping submission");
            self.rejected += 1;
            return;
        };
        match coordinator.submit_task(TaskRequest::new(kind)) {
            Ok(task_id) => {
                self.submitted += 1;
                debug!(task_id, "simulated submission");
            }
            Err(e) => {
                self.rejected += 1;
                warn!(error = %e, "task not submitted");
            }
        }
    }

    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn air(&self) -> &SimulatedAir {
        &self.air
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn report(&self) -> SimReport {
        SimReport {
            sim_time_ms: self.elapsed_ms,
            ticks: self.ticks,
            topology: self.sim.topology,
            transmissions: self.air.transmission_count(),
            tasks_submitted: self.submitted,
            tasks_rejected: self.rejected,
            nodes: self.nodes.iter().map(MeshNode::stats).collect(),
        }
    }
}

/// Cameras and sensors everywhere, models on every third node, gateway and
/// mains power on the coordinator.
fn capabilities_for(id: NodeId, role: Role) -> CapabilitySet {
    let mut caps = CapabilitySet::IMAGE | CapabilitySet::SENSORS;
    if id % 3 == 0 {
        caps |= CapabilitySet::AI;
    }
    if role == Role::Coordinator {
        caps |= CapabilitySet::GATEWAY | CapabilitySet::HIGH_POWER;
    }
    caps
}

fn battery_for(id: NodeId) -> u8 {
    100 - (id.wrapping_mul(13) % 45) as u8
}

/// Apply command-line overrides onto `[simulation]`.
pub fn apply_args(sim: &mut SimulationConfig, args: &SimulateArgs) {
    if let Some(n) = args.nodes {
        sim.nodes = n;
    }
    if let Some(c) = args.coordinator {
        sim.coordinator = c;
    }
    if let Some(t) = args.topology {
        sim.topology = t;
    }
    if let Some(l) = args.loss {
        sim.loss = l;
    }
    if let Some(d) = args.duration {
        sim.duration_secs = d;
    }
    if let Some(t) = args.tick_ms {
        sim.tick_ms = t;
    }
    if let Some(e) = args.task_every {
        sim.task_every_secs = e;
    }
    if let Some(s) = args.seed {
        sim.seed = s;
    }
}

pub(super) async fn cmd_simulate(
    mut config: WildmeshConfig,
    args: SimulateArgs,
) -> wildmesh_core::Result<()> {
    apply_args(&mut config.simulation, &args);
    config.validate().map_err(WildError::Config)?;

    let mut fleet = Fleet::build(&config)?;
    fleet.start()?;

    if args.realtime {
        run_realtime(&mut fleet).await;
    } else {
        fleet.run_virtual();
    }

    let report = fleet.report();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// One tick per `tick_ms` of wall time; Ctrl+C ends the run early.
async fn run_realtime(fleet: &mut Fleet) {
    let mut interval = tokio::time::interval(Duration::from_millis(fleet.sim.tick_ms));
    println!(
        "⏱️  Running {} ticks in real time, press Ctrl+C to stop\n",
        fleet.total_ticks()
    );
    for _ in 0..fleet.total_ticks() {
        tokio::select! {
            _ = interval.tick() => fleet.step(),
            _ = tokio::signal::ctrl_c() => {
                info!(elapsed_ms = fleet.elapsed_ms(), "simulation interrupted");
                break;
            }
        }
    }
}

fn print_report(report: &SimReport) {
    println!("{}", style("🕸️  Simulation report").bold());
    println!();
    println!(
        "   Simulated:    {}s in {} ticks",
        report.sim_time_ms / 1_000,
        report.ticks
    );
    println!("   Topology:     {}", report.topology.as_str());
    println!("   Frames:       {}", report.transmissions);
    println!(
        "   Tasks:        {} submitted, {} not placed",
        report.tasks_submitted, report.tasks_rejected
    );
    println!();
    println!(
        "{}",
        style(format!(
            "   {:>4}  {:<11} {:<19} {:>5} {:>5} {:>5} {:>5} {:>5} {:>6} {:>6}",
            "NODE", "ROLE", "STATE", "COORD", "DONE", "FAIL", "T/O", "PEERS", "SENT", "FWD"
        ))
        .bold()
    );
    for s in &report.nodes {
        let state = format!("{:<19}", s.state.as_str());
        let state = match s.state {
            NodeLifecycleState::Active | NodeLifecycleState::ExecutingTask => style(state).green(),
            NodeLifecycleState::Standalone => style(state).yellow(),
            NodeLifecycleState::SeekingCoordinator => style(state).cyan(),
            _ => style(state).red(),
        };
        let coordinator = s
            .coordinator
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "   {:>4}  {:<11} {} {:>5} {:>5} {:>5} {:>5} {:>5} {:>6} {:>6}",
            s.node_id,
            s.role.as_str(),
            state,
            coordinator,
            s.tasks_completed,
            s.tasks_failed,
            s.tasks_timed_out,
            s.peers_reachable,
            s.messages.sent,
            s.messages.forwarded
        );
    }

    if let Some(ledger) = report
        .nodes
        .iter()
        .find(|s| s.role == Role::Coordinator)
        .map(|s| s.ledger)
    {
        println!();
        println!(
            "   Ledger:       {} assigned, {} completed, {} retried, {} abandoned",
            ledger.assigned, ledger.completed, ledger.retried, ledger.abandoned
        );
    }
}

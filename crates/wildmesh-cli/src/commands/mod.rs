use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wildmesh_config::{ConfigLoader, Topology, WarningSeverity, WildmeshConfig};
use wildmesh_core::WildError;

pub mod setup;
pub mod simulate;

/// 🦌 Wildmesh: coordinator/node protocol for wildlife camera meshes
#[derive(Parser, Debug)]
#[command(name = "wildmesh", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to wildmesh.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a fleet of nodes over a simulated radio mesh
    Simulate(SimulateArgs),
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and report problems
    Doctor,
    /// Initialize a new wildmesh.toml in the current or home directory
    Init {
        /// Create in current directory instead of ~/.wildmesh/
        #[arg(long)]
        local: bool,
    },
    /// Show version and build info
    Version,
}

/// Flags for `wildmesh simulate`. Each one overrides `[simulation]`.
#[derive(clap::Args, Debug, Default)]
pub struct SimulateArgs {
    /// Number of nodes
    #[arg(short, long)]
    pub nodes: Option<u32>,

    /// Node id that starts as coordinator
    #[arg(long)]
    pub coordinator: Option<u32>,

    /// line or full
    #[arg(short, long)]
    pub topology: Option<Topology>,

    /// Per-frame loss probability, 0.0 to 1.0
    #[arg(long)]
    pub loss: Option<f64>,

    /// Simulated duration in seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Milliseconds of simulated time per tick
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Seconds between task submissions (0 disables)
    #[arg(long)]
    pub task_every: Option<u64>,

    /// RNG seed for packet loss
    #[arg(long)]
    pub seed: Option<u64>,

    /// Pace ticks in wall-clock time instead of running flat out
    #[arg(long)]
    pub realtime: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub async fn run(self) -> wildmesh_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Simulate(args) => simulate::cmd_simulate(config, args).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config, config_loader.path()),
            Commands::Init { local } => setup::cmd_init(local),
            Commands::Version => Self::cmd_version(),
        }
    }

    fn cmd_config(config: WildmeshConfig, json: bool) -> wildmesh_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| WildError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: WildmeshConfig, path: &std::path::Path) -> wildmesh_core::Result<()> {
        println!("🩺 Wildmesh Doctor: configuration audit");
        println!("   {}", path.display());
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let mut extra_ok = 0;

        if !path.exists() {
            println!("  💡 no config file, running on defaults\n   ↳ Run 'wildmesh init' to write one");
            info_count += 1;
        } else {
            extra_ok += 1;
        }

        let node = &config.node;
        if node.discovery_window() < node.heartbeat_interval_ms {
            println!(
                "  💡 node.discovery_window: {}ms is shorter than one heartbeat\n   ↳ Only direct discovery answers can end the search",
                node.discovery_window()
            );
            info_count += 1;
        } else {
            extra_ok += 1;
        }

        // Room for a task assignment with modest parameters.
        if config.mesh.max_frame_bytes < 256 {
            println!(
                "  💡 mesh.max_frame_bytes: {} leaves little room for task parameters\n   ↳ Assignments with long folder or model names will not encode",
                config.mesh.max_frame_bytes
            );
            info_count += 1;
        } else {
            extra_ok += 1;
        }

        println!();
        println!(
            "  ✅ {extra_ok} extra checks passed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions"
        );
        Ok(())
    }

    fn cmd_version() -> wildmesh_core::Result<()> {
        println!("🦌 Wildmesh v{}", env!("CARGO_PKG_VERSION"));
        println!("   Protocol version: {}", wildmesh_mesh::protocol::PROTOCOL_VERSION);
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
fn init_tracing(level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .pretty()
            .with_target(false)
            .init(),
    }
}

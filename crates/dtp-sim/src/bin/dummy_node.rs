//! Standalone CLI for running one synthetic DTP experiment locally, without
//! the HTTP control surface — useful for quick local comparisons and for
//! generating a JSONL experiment log to inspect offline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dtp_sim::{ExperimentLogger, Mode, Simulation, SimulationConfig};

#[derive(Parser, Debug)]
#[command(name = "dummy_node", about = "Run one synthetic DTP experiment")]
struct Args {
    /// Path to a TOML config file; falls back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scheduler under test.
    #[arg(long, value_enum, default_value = "dtp")]
    mode: CliMode,

    /// Directory to write config.jsonl/events.jsonl/summary.jsonl into.
    /// When omitted, no experiment log is written.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Upper bound on how long to wait for the run to finish on its own
    /// before forcing a stop.
    #[arg(long, default_value_t = 30)]
    max_seconds: u64,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Dtp,
    UdpRaw,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            SimulationConfig::from_toml(&text)?
        }
        None => SimulationConfig::default(),
    };
    config.mode = match args.mode {
        CliMode::Dtp => Mode::Dtp,
        CliMode::UdpRaw => Mode::UdpRaw,
    };

    let logger = match &args.log_dir {
        Some(dir) => {
            let experiment_id = format!("dummy-node-{}", config.mode.as_str());
            Some(Arc::new(ExperimentLogger::create(
                dir,
                experiment_id,
                &config,
                dtp_transport::clock::now_ms(),
            )?))
        }
        None => None,
    };

    tracing::info!(mode = config.mode.as_str(), total = config.total_packets(), "starting run");
    let sim = Simulation::start(config, logger)?;

    let deadline = std::time::Instant::now() + Duration::from_secs(args.max_seconds);
    while sim.is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(200));
    }
    sim.stop();
    let result = sim.join();

    println!("mode: {:?}", result.mode);
    println!("duration_ms: {}", result.duration_ms);
    for class in &result.comparison.per_class {
        println!(
            "{:?}: sent={} received={} on_time_rate={:.3} avg_latency_ms={:.1} p95_latency_ms={:.1}",
            class.priority,
            class.sent,
            class.received,
            class.on_time_rate,
            class.avg_latency_ms,
            class.p95_latency_ms,
        );
    }

    Ok(())
}

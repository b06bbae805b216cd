//! Binary target for the transactional chaos simulation.
//!
//! Runs seeded iterations of the whole cluster with the standard invariants
//! and prints the report. `--tokio` runs one iteration on real tokio tasks
//! instead.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use moonpool_txn::{SimulationBuilder, TokioCluster, TxnConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "txn_chaos")]
#[command(about = "2PC/OCC transactions under deterministic simulation", long_about = None)]
struct Args {
    /// Replay a single seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of iterations (ignored with --seed)
    #[arg(long, default_value = "100")]
    iterations: usize,

    /// JSON configuration file; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start from the crash-heavy preset instead of the fast local one
    #[arg(long)]
    chaos: bool,

    /// Draw a fresh configuration from every seed
    #[arg(long)]
    random_config: bool,

    /// Run once on tokio tasks instead of the simulator
    #[arg(long)]
    tokio: bool,
}

fn load_config(args: &Args) -> moonpool_txn::Result<TxnConfig> {
    match &args.config {
        Some(path) => TxnConfig::load(path),
        None if args.chaos => Ok(TxnConfig::chaos()),
        None => Ok(TxnConfig::fast_local()),
    }
}

fn run_tokio(config: TxnConfig, seed: u64) -> moonpool_txn::Result<bool> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let report = runtime.block_on(TokioCluster::new(config).with_seed(seed).run())?;
    eprintln!("{report}");
    Ok(report.is_consistent())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {err}");
            return ExitCode::FAILURE;
        }
    };

    if args.tokio {
        return match run_tokio(config, args.seed.unwrap_or(0)) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(err) => {
                eprintln!("ERROR: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let mut builder = SimulationBuilder::new()
        .config(config)
        .standard_invariants();
    builder = match args.seed {
        Some(seed) => builder.set_debug_seeds(vec![seed]).set_iterations(1),
        None => builder.set_iterations(args.iterations),
    };
    if args.random_config {
        builder = builder.random_config().random_network();
    }

    let report = builder.run();
    eprintln!("{report}");

    if report.failed_runs > 0 {
        eprintln!("ERROR: {} seeds failed", report.failed_runs);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

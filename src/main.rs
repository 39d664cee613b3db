use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use landgen::simulation::migration::Backend;
use landgen::simulation::params::SimulationConfig;
use landgen::simulation::sampling::SamplingMode;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

#[derive(Parser)]
#[command(name = "landgen")]
#[command(about = "Spatial population genetics on raster landscapes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation from a config file
    Run {
        /// Path to config file (JSON); the built-in scenario when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to write the trajectory (default: trajectory-<timestamp>.json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the operator backend
        #[arg(long, value_parser = parse_backend)]
        backend: Option<Backend>,

        /// Use expectations instead of random draws
        #[arg(long)]
        expected: bool,
    },
    /// Dump the default configuration to stdout
    DumpDefaultConfig,
}

fn parse_backend(value: &str) -> Result<Backend, String> {
    match value {
        "raster" => Ok(Backend::Raster),
        "matrix" => Ok(Backend::Matrix),
        other => Err(format!("unknown backend `{other}`, expected raster or matrix")),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            out,
            seed,
            backend,
            expected,
        } => {
            let mut config = match config {
                Some(path) => SimulationConfig::load_from_file(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => SimulationConfig::default(),
            };
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(backend) = backend {
                config.backend = backend;
            }
            if expected {
                config.sampling = SamplingMode::Expected;
            }
            run(&config, out)
        }
        Commands::DumpDefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&SimulationConfig::default())?);
            Ok(())
        }
    }
}

fn run(config: &SimulationConfig, out: Option<PathBuf>) -> Result<()> {
    let mut scenario = config.build().context("invalid configuration")?;
    info!(
        name = %config.name,
        habitable = scenario.population.domain().n_habitable(),
        genotypes = scenario.population.n_genotypes(),
        backend = ?config.backend,
        seed = scenario.seed,
        "configured scenario"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(scenario.seed);
    let trajectory = scenario.simulator.simulate(
        &mut scenario.population,
        &scenario.demography,
        scenario.carrying_capacity.view(),
        &scenario.time_grid,
        &scenario.summaries,
        &mut rng,
    )?;

    let out = out.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("trajectory-{stamp}.json"))
    });
    trajectory
        .save_to_file(&out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!(
        snapshots = trajectory.len(),
        final_total = scenario.population.total(),
        path = %out.display(),
        "simulation finished"
    );
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::path::PathBuf;

// Define modules used by main
mod comm;
mod exchange;
#[cfg(test)]
mod local;
#[cfg(feature = "mpi")]
mod mpi_comm;
mod region_state;
mod simulation;
mod termination;
mod walk;

use walk_common::{EngineConfig, RunReport, WalkParams};

/// Distributed Monte Carlo random walk on a toroidal grid of regions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Side length of each square region
    l: u32,
    /// Grid width in regions
    a: u32,
    /// Grid height in regions
    b: u32,
    /// Lifetime of each particle, in steps
    n: u32,
    /// Particles seeded per region
    #[arg(value_name = "N")]
    particles: u32,
    /// Weight of moving left
    #[arg(allow_negative_numbers = true)]
    pl: f32,
    /// Weight of moving right
    #[arg(allow_negative_numbers = true)]
    pr: f32,
    /// Weight of moving up
    #[arg(allow_negative_numbers = true)]
    pu: f32,
    /// Weight of moving down
    #[arg(allow_negative_numbers = true)]
    pd: f32,

    /// Optional TOML file with engine and output settings
    #[arg(long, default_value = "walk.toml")]
    config: PathBuf,
}

impl Args {
    fn walk_params(&self) -> WalkParams {
        WalkParams {
            l: self.l,
            a: self.a,
            b: self.b,
            n: self.n,
            particles_per_worker: self.particles,
            pl: self.pl,
            pr: self.pr,
            pu: self.pu,
            pd: self.pd,
        }
    }
}

/// Joins the MPI world as the worker for this process's region and runs it to completion.
/// Only the coordinator gets the report back.
#[cfg(feature = "mpi")]
fn run_group(params: &WalkParams, config: &EngineConfig) -> Result<Option<RunReport>> {
    use crate::comm::Communicator;
    use crate::mpi_comm::MpiComm;
    use crate::simulation::RegionSimulation;
    use crate::termination::COORDINATOR;

    let universe = mpi::initialize().context("Failed to initialize MPI (already initialized?)")?;
    let mut comm = MpiComm::new(universe.world());
    if comm.rank() == COORDINATOR {
        info!("Launching {} workers ({}x{} grid).", comm.size(), params.a, params.b);
    }

    let outcome = RegionSimulation::new(params, config, &mut comm).and_then(RegionSimulation::run);
    if let Err(e) = &outcome {
        // Peers may be blocked in a collective; take the whole group down
        comm.abort(&format!("{:#}", e));
    }
    outcome
}

#[cfg(not(feature = "mpi"))]
fn run_group(_params: &WalkParams, _config: &EngineConfig) -> Result<Option<RunReport>> {
    anyhow::bail!("walk-engine was built without the `mpi` feature and cannot start a worker group")
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    // Missing or extra arguments exit here with a usage message
    let args = Args::parse();

    // --- Load Configuration ---
    let params = args.walk_params();
    params.validate()?;
    let config = EngineConfig::load_or_default(&args.config)?;

    // --- Simulation ---
    let Some(report) = run_group(&params, &config)? else {
        // Every worker but the coordinator is done once the totals are gathered
        return Ok(());
    };
    info!(
        "Random walk: l={} grid={}x{} n={} N={} weights l/r/u/d={}/{}/{}/{}",
        params.l, params.a, params.b, params.n, params.particles_per_worker,
        params.pl, params.pr, params.pu, params.pd
    );
    info!(
        "Batch limit {} steps, growth factor {}, seed {}.",
        config.engine.batch_limit,
        config.engine.growth_factor,
        config.engine.seed.map_or_else(|| "from clock".to_string(), |s| s.to_string())
    );
    info!(
        "Simulation finished in {:.3} seconds after {} rounds; {} of {} particles completed.",
        report.elapsed_seconds,
        report.rounds,
        report.total_completed(),
        params.total_particles()
    );

    // --- Save Report ---
    report.write_text(&config.output.report_path)?;
    info!("Report saved to {}", config.output.report_path);

    if let Some(json_path) = &config.output.summary_json {
        let file = File::create(json_path)
            .with_context(|| format!("Failed to create summary file '{}'", json_path))?;
        serde_json::to_writer(file, &report)
            .with_context(|| format!("Failed to write summary JSON to '{}'", json_path))?;
        info!("Summary saved to {}", json_path);
    }

    Ok(())
}

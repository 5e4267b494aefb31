use anyhow::{Context, Result};
use log::{debug, trace};
use rand::prelude::*;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use walk_common::{Coords, EngineConfig, GridTopology, Particle, RunReport, WalkParams};

use crate::comm::Communicator;
use crate::exchange::{exchange, ExchangeStats};
use crate::region_state::RegionState;
use crate::termination::{Decision, TerminationDetector, COORDINATOR};
use crate::walk::{RandomWalkEngine, WalkTally};

/// What happened on one worker during one round.
#[derive(Debug, Clone, Copy)]
pub struct RoundSummary {
    pub round: u64,
    pub walk: WalkTally,
    pub exchange: ExchangeStats,
    pub active: usize,
    pub completed: usize,
    pub decision: Decision,
}

/// Drives the region owned by one worker: walk, exchange, termination check.
pub struct RegionSimulation<'c, C: Communicator> {
    params: WalkParams,
    comm: &'c mut C,
    topology: GridTopology,
    /// The five particle collections of this region.
    state: RegionState,
    engine: RandomWalkEngine,
    detector: TerminationDetector,
    /// Rounds completed so far.
    current_round: u64,
}

impl<'c, C: Communicator> RegionSimulation<'c, C> {
    /// Validates the setup, takes part in seed distribution and seeds this region's particles.
    pub fn new(params: &WalkParams, config: &EngineConfig, comm: &'c mut C) -> Result<Self> {
        params.validate()?;
        config.validate()?;
        let topology = GridTopology::new(comm.rank(), params.a, params.b);
        anyhow::ensure!(
            comm.size() == topology.worker_count(),
            "Group has {} workers but a {}x{} grid needs {}",
            comm.size(),
            params.a,
            params.b,
            topology.worker_count()
        );

        let seed = distribute_seeds(comm, config.engine.seed)?;
        let state = seed_particles(params, seed, config.engine.growth_factor)?;
        trace!(
            "Worker {} at {:?} seeded {} particles (seed {}).",
            topology.worker_id(),
            topology.coords(),
            state.active.len(),
            seed
        );

        Ok(Self {
            params: params.clone(),
            engine: RandomWalkEngine::new(params, config.engine.batch_limit),
            detector: TerminationDetector::new(params.total_particles()),
            comm,
            topology,
            state,
            current_round: 0,
        })
    }

    /// Runs one round and returns the group's decision.
    pub fn step(&mut self) -> Result<RoundSummary> {
        self.current_round += 1;

        // --- 1. Walk (sequential; the only phase that grows buffers) ---
        let held = self.state.population();
        let walk = self.engine.advance_round(&mut self.state)?;
        anyhow::ensure!(
            self.state.population() == held,
            "Walk changed the particle count of worker {} from {} to {}",
            self.topology.worker_id(),
            held,
            self.state.population()
        );

        // --- 2. Migrate ---
        let exchange = exchange(&mut *self.comm, &self.topology, &mut self.state)?;

        // --- 3. Termination check ---
        let completed = self.state.completed.len();
        let decision = self.detector.check(&mut *self.comm, completed as u64, self.state.population() as u64)?;

        let summary = RoundSummary {
            round: self.current_round,
            walk,
            exchange,
            active: self.state.active.len(),
            completed,
            decision,
        };
        debug!(
            "Worker {} round {}: walked {} kept / {} done / {} out | sent l/r/u/d {:?} ({}) | received {} | active {} | completed {}",
            self.topology.worker_id(),
            summary.round,
            summary.walk.still_active,
            summary.walk.completed,
            summary.walk.migrating.iter().sum::<usize>(),
            summary.exchange.sent,
            summary.exchange.total_sent(),
            summary.exchange.total_received(),
            summary.active,
            summary.completed
        );
        Ok(summary)
    }

    /// Runs rounds until the group stops, then gathers the totals.
    /// The coordinator returns the report; every other worker returns `None`.
    pub fn run(mut self) -> Result<Option<RunReport>> {
        let start_time = Instant::now();
        while self.step()?.decision == Decision::Continue {}

        let completed = self.state.completed.len() as u64;
        let totals = self.detector.collect_totals(&mut *self.comm, completed)?;
        let elapsed_seconds = start_time.elapsed().as_secs_f64();

        Ok(totals.map(|completed_per_worker| RunReport {
            params: self.params.clone(),
            elapsed_seconds,
            rounds: self.current_round,
            completed_per_worker,
        }))
    }
}

/// The coordinator draws one seed per worker from a root seed and scatters them.
/// The root seed is the configured one, or the wall clock.
fn distribute_seeds<C: Communicator>(comm: &mut C, fixed_seed: Option<u64>) -> Result<u64> {
    if comm.rank() != COORDINATOR {
        return comm.scatter(COORDINATOR, None);
    }
    let root_seed = match fixed_seed {
        Some(seed) => seed,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock is before the Unix epoch")?
            .as_nanos() as u64,
    };
    debug!("Root seed {}.", root_seed);
    let mut rng = StdRng::seed_from_u64(root_seed);
    let seeds: Vec<u64> = (0..comm.size()).map(|_| rng.random()).collect();
    comm.scatter(COORDINATOR, Some(seeds.as_slice()))
}

/// Places `N` particles uniformly in the region, each with its own RNG state.
fn seed_particles(params: &WalkParams, seed: u64, growth_factor: usize) -> Result<RegionState> {
    let count = params.particles_per_worker as usize;
    let mut state = RegionState::new(count, growth_factor)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let side = params.l as i32;
    for _ in 0..count {
        let position = Coords::new(rng.random_range(0..side), rng.random_range(0..side));
        state.active.push(Particle::new(position, params.n, rng.random()))?;
    }
    Ok(state)
}

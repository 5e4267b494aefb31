//! Message-passing operations every worker in a group takes part in.
//!
//! The neighbor phases are indexed by direction of travel: entry `dir` of what
//! a worker sends goes to `topology.neighbor(dir)`, and entry `dir` of what it
//! receives comes from [`inbound_source`]. Collectives are rooted at one worker.

use anyhow::Result;
use walk_common::{Direction, GridTopology, Particle};

/// Where particles travelling in `dir` come from: the neighbor on the opposite side.
#[inline(always)]
pub fn inbound_source(topology: &GridTopology, dir: Direction) -> usize {
    topology.neighbor(dir.opposite())
}

pub trait Communicator {
    /// This worker's identity in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Sends one count to each of the four neighbors and returns the four counts
    /// addressed to this worker. All sends are posted before any receive is awaited.
    fn exchange_counts(&mut self, topology: &GridTopology, outgoing: [u64; 4]) -> Result<[u64; 4]>;

    /// Sends one batch to each neighbor and returns the four inbound batches.
    /// `announced` holds the inbound sizes from [`Communicator::exchange_counts`];
    /// a returned batch may still differ from it if a peer misbehaves.
    fn exchange_batches(
        &mut self,
        topology: &GridTopology,
        outgoing: [&[Particle]; 4],
        announced: [u64; 4],
    ) -> Result<[Vec<Particle>; 4]>;

    /// No worker leaves until every worker has entered.
    fn barrier(&mut self) -> Result<()>;

    /// Element-wise sum of `values` across the group. Only `root` gets the result.
    fn reduce_sum(&mut self, root: usize, values: &[u64]) -> Result<Option<Vec<u64>>>;

    /// Every worker returns `root`'s `flag`.
    fn broadcast_flag(&mut self, root: usize, flag: bool) -> Result<bool>;

    /// `root` supplies one value per worker; each worker returns its own.
    fn scatter(&mut self, root: usize, values: Option<&[u64]>) -> Result<u64>;

    /// Collects one value from every worker at `root`, ordered by rank.
    fn gather(&mut self, root: usize, value: u64) -> Result<Option<Vec<u64>>>;

    /// Tells every peer this worker has failed, releasing anyone blocked on it.
    fn abort(&mut self, reason: &str);
}

use anyhow::Result;
use log::trace;
use walk_common::{Direction, GridTopology};

use crate::comm::{inbound_source, Communicator};
use crate::region_state::RegionState;

/// Particle counts moved by one exchange, indexed by direction of travel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub sent: [usize; 4],
    pub received: [usize; 4],
}

impl ExchangeStats {
    pub fn total_sent(&self) -> usize { self.sent.iter().sum() }
    pub fn total_received(&self) -> usize { self.received.iter().sum() }
}

/// Swaps staged particles with the four neighbors and merges arrivals into `active`.
///
/// Phase A trades counts, phase B trades the batches themselves. In each phase all
/// four sends are posted before any receive is awaited, so mutually sending
/// neighbors cannot block each other.
pub fn exchange<C: Communicator>(
    comm: &mut C,
    topology: &GridTopology,
    state: &mut RegionState,
) -> Result<ExchangeStats> {
    let mut stats = ExchangeStats::default();

    // --- Phase A: counts ---
    let outgoing = Direction::ALL.map(|dir| state.staging(dir).len() as u64);
    let announced = comm.exchange_counts(topology, outgoing)?;
    stats.sent = outgoing.map(|count| count as usize);
    trace!("Worker {} sizes out {:?} in {:?}", topology.worker_id(), outgoing, announced);

    // --- Phase B: payloads ---
    let batches = comm.exchange_batches(topology, Direction::ALL.map(|dir| state.staging(dir).as_slice()), announced)?;

    // Everything is on the wire; staging can be reused
    state.clear_staging();

    // --- Merge ---
    for (dir, batch) in Direction::ALL.into_iter().zip(batches) {
        let expected = announced[dir.index()] as usize;
        anyhow::ensure!(
            batch.len() == expected,
            "Worker {} expected {} particles travelling {} from worker {}, got {}",
            topology.worker_id(),
            expected,
            dir.name(),
            inbound_source(topology, dir),
            batch.len()
        );
        stats.received[dir.index()] = batch.len();
        state.active.extend_from(batch)?;
    }

    Ok(stats)
}

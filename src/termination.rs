use anyhow::Result;
use log::debug;

use crate::comm::Communicator;

/// Worker that reduces counts, decides, and collects the final totals.
pub const COORDINATOR: usize = 0;

/// What every worker does after this round's check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

/// Decides when every particle in the group has completed.
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    /// `size * N`.
    expected_total: u64,
}

impl TerminationDetector {
    pub fn new(expected_total: u64) -> Self { Self { expected_total } }

    /// Sums `completed` (and `population`, to check conservation) at the coordinator
    /// and broadcasts the stop/continue decision. On `Continue` all workers pass a
    /// barrier before returning.
    pub fn check<C: Communicator>(&self, comm: &mut C, completed: u64, population: u64) -> Result<Decision> {
        let sums = comm.reduce_sum(COORDINATOR, &[completed, population])?;

        let stop = match sums.as_deref() {
            Some(&[completed_sum, population_sum]) => {
                // Particles only ever move between collections and workers
                anyhow::ensure!(
                    population_sum == self.expected_total,
                    "Conservation violated: group holds {} particles, expected {}",
                    population_sum,
                    self.expected_total
                );
                debug!("Completed {}/{} particles.", completed_sum, self.expected_total);
                completed_sum == self.expected_total
            }
            Some(other) => anyhow::bail!("Reduction returned {} values, expected 2", other.len()),
            None => false,
        };

        if comm.broadcast_flag(COORDINATOR, stop)? {
            Ok(Decision::Stop)
        } else {
            comm.barrier()?;
            Ok(Decision::Continue)
        }
    }

    /// Gathers each worker's completed count at the coordinator (rank order).
    pub fn collect_totals<C: Communicator>(&self, comm: &mut C, completed: u64) -> Result<Option<Vec<u64>>> {
        comm.gather(COORDINATOR, completed)
    }
}

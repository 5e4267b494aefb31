//! Multi-process worker group over MPI: one process per region.

use anyhow::Result;
use log::error;
use mpi::collective::SystemOperation;
use mpi::request;
use mpi::topology::{Rank, SimpleCommunicator};
use mpi::traits::{Communicator as _, CommunicatorCollectives, Destination, Equivalence, Root, Source};
use walk_common::{Coords, Direction, GridTopology, Particle};

use crate::comm::{inbound_source, Communicator};

/// Error code handed to `MPI_Abort` when a worker fails.
const ABORT_CODE: i32 = 1;

/// Particle layout on the wire.
#[derive(Equivalence, Debug, Clone, Copy, Default, PartialEq)]
struct MpiParticle {
    x: i32,
    y: i32,
    remaining_steps: u32,
    rng_state: u32,
}

impl From<&Particle> for MpiParticle {
    fn from(p: &Particle) -> Self {
        Self {
            x: p.position.x,
            y: p.position.y,
            remaining_steps: p.remaining_steps,
            rng_state: p.rng.state(),
        }
    }
}

impl From<MpiParticle> for Particle {
    fn from(p: MpiParticle) -> Self {
        Particle::new(Coords::new(p.x, p.y), p.remaining_steps, p.rng_state)
    }
}

// Counts and payloads travelling in the same direction share a source when a
// grid dimension is 1 or 2, so each direction gets its own tag per phase.
fn count_tag(dir: Direction) -> mpi::Tag { dir.index() as mpi::Tag }
fn payload_tag(dir: Direction) -> mpi::Tag { 4 + dir.index() as mpi::Tag }

pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    pub fn new(world: SimpleCommunicator) -> Self { Self { world } }

    fn rank_of(worker: usize) -> Rank { worker as Rank }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize { self.world.rank() as usize }

    fn size(&self) -> usize { self.world.size() as usize }

    fn exchange_counts(&mut self, topology: &GridTopology, outgoing: [u64; 4]) -> Result<[u64; 4]> {
        let world = &self.world;
        let mut inbound = [0u64; 4];
        request::scope(|scope| {
            let receives: Vec<_> = Direction::ALL
                .into_iter()
                .zip(inbound.iter_mut())
                .map(|(dir, slot)| {
                    world
                        .process_at_rank(Self::rank_of(inbound_source(topology, dir)))
                        .immediate_receive_into_with_tag(scope, slot, count_tag(dir))
                })
                .collect();
            let sends: Vec<_> = Direction::ALL
                .into_iter()
                .zip(outgoing.iter())
                .map(|(dir, count)| {
                    world
                        .process_at_rank(Self::rank_of(topology.neighbor(dir)))
                        .immediate_send_with_tag(scope, count, count_tag(dir))
                })
                .collect();
            // Every receive is posted before the first wait
            for req in receives {
                req.wait();
            }
            for req in sends {
                req.wait();
            }
        });
        Ok(inbound)
    }

    fn exchange_batches(
        &mut self,
        topology: &GridTopology,
        outgoing: [&[Particle]; 4],
        announced: [u64; 4],
    ) -> Result<[Vec<Particle>; 4]> {
        let world = &self.world;
        let outbound: Vec<Vec<MpiParticle>> =
            outgoing.iter().map(|batch| batch.iter().map(MpiParticle::from).collect()).collect();
        let mut inbound: Vec<Vec<MpiParticle>> =
            announced.iter().map(|&count| vec![MpiParticle::default(); count as usize]).collect();

        let statuses = request::scope(|scope| {
            let receives: Vec<_> = Direction::ALL
                .into_iter()
                .zip(inbound.iter_mut())
                .map(|(dir, buffer)| {
                    world
                        .process_at_rank(Self::rank_of(inbound_source(topology, dir)))
                        .immediate_receive_into_with_tag(scope, &mut buffer[..], payload_tag(dir))
                })
                .collect();
            let sends: Vec<_> = Direction::ALL
                .into_iter()
                .zip(outbound.iter())
                .map(|(dir, batch)| {
                    world
                        .process_at_rank(Self::rank_of(topology.neighbor(dir)))
                        .immediate_send_with_tag(scope, &batch[..], payload_tag(dir))
                })
                .collect();
            let statuses: Vec<_> = receives.into_iter().map(|req| req.wait()).collect();
            for req in sends {
                req.wait();
            }
            statuses
        });

        let mut batches: [Vec<Particle>; 4] = Default::default();
        for ((batch, buffer), status) in batches.iter_mut().zip(inbound).zip(statuses) {
            // A short message leaves the tail of the buffer unfilled
            let received = status.count(MpiParticle::equivalent_datatype()).max(0) as usize;
            *batch = buffer.into_iter().take(received).map(Particle::from).collect();
        }
        Ok(batches)
    }

    fn barrier(&mut self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn reduce_sum(&mut self, root: usize, values: &[u64]) -> Result<Option<Vec<u64>>> {
        let root_process = self.world.process_at_rank(Self::rank_of(root));
        if self.rank() == root {
            let mut total = vec![0u64; values.len()];
            root_process.reduce_into_root(values, &mut total[..], SystemOperation::sum());
            Ok(Some(total))
        } else {
            root_process.reduce_into(values, SystemOperation::sum());
            Ok(None)
        }
    }

    fn broadcast_flag(&mut self, root: usize, flag: bool) -> Result<bool> {
        let mut flag = flag;
        self.world.process_at_rank(Self::rank_of(root)).broadcast_into(&mut flag);
        Ok(flag)
    }

    fn scatter(&mut self, root: usize, values: Option<&[u64]>) -> Result<u64> {
        let root_process = self.world.process_at_rank(Self::rank_of(root));
        let mut mine = 0u64;
        if self.rank() == root {
            let values = values.ok_or_else(|| anyhow::anyhow!("Scatter root must supply values"))?;
            anyhow::ensure!(
                values.len() == self.size(),
                "Scatter needs {} values, got {}",
                self.size(),
                values.len()
            );
            root_process.scatter_into_root(values, &mut mine);
        } else {
            root_process.scatter_into(&mut mine);
        }
        Ok(mine)
    }

    fn gather(&mut self, root: usize, value: u64) -> Result<Option<Vec<u64>>> {
        let root_process = self.world.process_at_rank(Self::rank_of(root));
        if self.rank() == root {
            let mut all = vec![0u64; self.size()];
            root_process.gather_into_root(&value, &mut all[..]);
            Ok(Some(all))
        } else {
            root_process.gather_into(&value);
            Ok(None)
        }
    }

    fn abort(&mut self, reason: &str) {
        error!("Worker {} aborting the group: {}", self.rank(), reason);
        self.world.abort(ABORT_CODE)
    }
}

//! In-process worker group for tests: one thread per worker, connected by channels.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use walk_common::{Direction, GridTopology, Particle};

use crate::comm::{inbound_source, Communicator};

/// Identifies a message stream between two workers.
///
/// Per-direction tags name the direction of travel from the sender's side, so
/// the receiver waits on `Count(dir)` from its `dir.opposite()` neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Count(Direction),
    Payload(Direction),
    Barrier,
    BarrierRelease,
    Reduce,
    Broadcast,
    Scatter,
    Gather,
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context("Failed to encode message")
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context("Failed to decode message")
}

#[derive(Debug)]
enum Envelope {
    Message { source: usize, tag: Tag, payload: Vec<u8> },
    Abort { source: usize, reason: String },
}

/// One worker's endpoint. Shares the group's senders (its own included).
pub struct LocalComm {
    rank: usize,
    peers: Arc<[Sender<Envelope>]>,
    inbox: Receiver<Envelope>,
    // Messages that arrived before anyone waited for them
    mailbox: HashMap<(usize, Tag), VecDeque<Vec<u8>>>,
}

impl LocalComm {
    /// Builds a fully connected set of `size` endpoints, indexed by rank.
    pub fn group(size: usize) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let peers: Arc<[Sender<Envelope>]> = senders.into();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                peers: Arc::clone(&peers),
                inbox,
                mailbox: HashMap::new(),
            })
            .collect()
    }

    /// Queues `payload` for `dest` without waiting for it to be received.
    pub fn post_send(&mut self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let peer = self
            .peers
            .get(dest)
            .ok_or_else(|| anyhow::anyhow!("No worker {} in a group of {}", dest, self.peers.len()))?;
        peer.send(Envelope::Message { source: self.rank, tag, payload })
            .map_err(|_| anyhow::anyhow!("Worker {} hung up before {:?} from {} was sent", dest, tag, self.rank))
    }

    /// Blocks until the next message from `source` with `tag` arrives.
    /// Messages on the same `(source, tag)` stream are delivered in order.
    pub fn wait_recv(&mut self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        if let Some(payload) = self.mailbox.get_mut(&(source, tag)).and_then(VecDeque::pop_front) {
            return Ok(payload);
        }
        loop {
            match self.inbox.recv() {
                Ok(Envelope::Message { source: from, tag: got, payload }) => {
                    if from == source && got == tag {
                        return Ok(payload);
                    }
                    self.mailbox.entry((from, got)).or_default().push_back(payload);
                }
                Ok(Envelope::Abort { source: from, reason }) => {
                    anyhow::bail!("Worker {} aborted the group: {}", from, reason);
                }
                Err(_) => anyhow::bail!("Inbox of worker {} closed while waiting for {:?} from {}", self.rank, tag, source),
            }
        }
    }

    /// Posts `payloads[dir]` to each neighbor under `tag(dir)`, then waits for the four inbound ones.
    fn swap_with_neighbors(
        &mut self,
        topology: &GridTopology,
        tag: fn(Direction) -> Tag,
        payloads: [Vec<u8>; 4],
    ) -> Result<[Vec<u8>; 4]> {
        for (dir, payload) in Direction::ALL.into_iter().zip(payloads) {
            self.post_send(topology.neighbor(dir), tag(dir), payload)?;
        }
        let mut inbound: [Vec<u8>; 4] = Default::default();
        for dir in Direction::ALL {
            inbound[dir.index()] = self.wait_recv(inbound_source(topology, dir), tag(dir))?;
        }
        Ok(inbound)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize { self.rank }

    fn size(&self) -> usize { self.peers.len() }

    fn exchange_counts(&mut self, topology: &GridTopology, outgoing: [u64; 4]) -> Result<[u64; 4]> {
        let payloads = [encode(&outgoing[0])?, encode(&outgoing[1])?, encode(&outgoing[2])?, encode(&outgoing[3])?];
        let inbound = self.swap_with_neighbors(topology, Tag::Count, payloads)?;
        let mut counts = [0u64; 4];
        for (count, bytes) in counts.iter_mut().zip(&inbound) {
            *count = decode(bytes)?;
        }
        Ok(counts)
    }

    fn exchange_batches(
        &mut self,
        topology: &GridTopology,
        outgoing: [&[Particle]; 4],
        _announced: [u64; 4],
    ) -> Result<[Vec<Particle>; 4]> {
        let payloads = [encode(outgoing[0])?, encode(outgoing[1])?, encode(outgoing[2])?, encode(outgoing[3])?];
        let inbound = self.swap_with_neighbors(topology, Tag::Payload, payloads)?;
        let mut batches: [Vec<Particle>; 4] = Default::default();
        for (batch, bytes) in batches.iter_mut().zip(&inbound) {
            *batch = decode(bytes)?;
        }
        Ok(batches)
    }

    fn barrier(&mut self) -> Result<()> {
        const ROOT: usize = 0;
        if self.rank == ROOT {
            for peer in (0..self.size()).filter(|&p| p != ROOT) {
                self.wait_recv(peer, Tag::Barrier)?;
            }
            for peer in (0..self.size()).filter(|&p| p != ROOT) {
                self.post_send(peer, Tag::BarrierRelease, Vec::new())?;
            }
        } else {
            self.post_send(ROOT, Tag::Barrier, Vec::new())?;
            self.wait_recv(ROOT, Tag::BarrierRelease)?;
        }
        Ok(())
    }

    fn reduce_sum(&mut self, root: usize, values: &[u64]) -> Result<Option<Vec<u64>>> {
        if self.rank != root {
            self.post_send(root, Tag::Reduce, encode(values)?)?;
            return Ok(None);
        }
        let mut total = values.to_vec();
        for peer in (0..self.size()).filter(|&p| p != root) {
            let contribution: Vec<u64> = decode(&self.wait_recv(peer, Tag::Reduce)?)?;
            anyhow::ensure!(
                contribution.len() == total.len(),
                "Reduction from worker {} has {} values, expected {}",
                peer,
                contribution.len(),
                total.len()
            );
            for (acc, v) in total.iter_mut().zip(contribution) {
                *acc += v;
            }
        }
        Ok(Some(total))
    }

    fn broadcast_flag(&mut self, root: usize, flag: bool) -> Result<bool> {
        if self.rank == root {
            let bytes = encode(&flag)?;
            for peer in (0..self.size()).filter(|&p| p != root) {
                self.post_send(peer, Tag::Broadcast, bytes.clone())?;
            }
            Ok(flag)
        } else {
            decode(&self.wait_recv(root, Tag::Broadcast)?)
        }
    }

    fn scatter(&mut self, root: usize, values: Option<&[u64]>) -> Result<u64> {
        if self.rank != root {
            return decode(&self.wait_recv(root, Tag::Scatter)?);
        }
        let values = values.context("Scatter root must supply values")?;
        anyhow::ensure!(
            values.len() == self.size(),
            "Scatter needs {} values, got {}",
            self.size(),
            values.len()
        );
        for (peer, value) in values.iter().enumerate().filter(|&(p, _)| p != root) {
            self.post_send(peer, Tag::Scatter, encode(value)?)?;
        }
        Ok(values[root])
    }

    fn gather(&mut self, root: usize, value: u64) -> Result<Option<Vec<u64>>> {
        if self.rank != root {
            self.post_send(root, Tag::Gather, encode(&value)?)?;
            return Ok(None);
        }
        let mut all = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == root {
                all.push(value);
            } else {
                all.push(decode(&self.wait_recv(peer, Tag::Gather)?)?);
            }
        }
        Ok(Some(all))
    }

    fn abort(&mut self, reason: &str) {
        for (rank, peer) in self.peers.iter().enumerate() {
            if rank != self.rank {
                // A peer that is already gone needs no release
                let _ = peer.send(Envelope::Abort { source: self.rank, reason: reason.to_string() });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Runs `size` workers on scoped threads and returns their results by rank.
pub struct LocalGroup {
    size: usize,
}

impl LocalGroup {
    pub fn new(size: usize) -> Self { Self { size } }

    /// Calls `body` once per worker with that worker's endpoint.
    /// A worker whose body fails or panics aborts the group so blocked peers return too.
    pub fn run<T, F>(&self, body: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&mut LocalComm) -> Result<T> + Sync,
    {
        let endpoints = LocalComm::group(self.size);
        let body = &body;
        thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let rank = comm.rank();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut comm)))
                            .unwrap_or_else(|payload| {
                                Err(anyhow::anyhow!("Worker {} panicked: {}", rank, panic_message(payload.as_ref())))
                            });
                        match &result {
                            Ok(_) => debug!("Worker {} finished.", rank),
                            Err(e) => {
                                error!("Worker {} failed: {:#}", rank, e);
                                comm.abort(&format!("{:#}", e));
                            }
                        }
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("Worker {} panicked", rank)))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_matches_source_and_tag() {
        let mut comms = LocalComm::group(2);
        let mut second = comms.pop().unwrap();
        let mut first = comms.pop().unwrap();

        first.post_send(1, Tag::Payload(Direction::Left), encode(&7u32).unwrap()).unwrap();
        first.post_send(1, Tag::Count(Direction::Left), encode(&3u32).unwrap()).unwrap();

        // Asked for in the opposite order of arrival
        let count: u32 = decode(&second.wait_recv(0, Tag::Count(Direction::Left)).unwrap()).unwrap();
        let payload: u32 = decode(&second.wait_recv(0, Tag::Payload(Direction::Left)).unwrap()).unwrap();
        assert_eq!((count, payload), (3, 7));
    }

    #[test]
    fn same_stream_is_fifo() {
        let mut comms = LocalComm::group(1);
        let me = &mut comms[0];
        for i in 0..5u32 {
            me.post_send(0, Tag::Count(Direction::Up), encode(&i).unwrap()).unwrap();
        }
        for i in 0..5u32 {
            let got: u32 = decode(&me.wait_recv(0, Tag::Count(Direction::Up)).unwrap()).unwrap();
            assert_eq!(got, i);
        }
    }

    #[test]
    fn counts_arrive_indexed_by_direction_of_travel() {
        // Row of two: horizontal neighbors are the other worker, vertical ones are itself
        let results = LocalGroup::new(2).run(|comm| {
            let topology = GridTopology::new(comm.rank(), 2, 1);
            let base = 10 * comm.rank() as u64;
            comm.exchange_counts(&topology, [base + 1, base + 2, base + 3, base + 4])
        });
        assert_eq!(results[0].as_ref().unwrap(), &[11, 12, 3, 4]);
        assert_eq!(results[1].as_ref().unwrap(), &[1, 2, 13, 14]);
    }

    #[test]
    fn collectives_across_group() {
        let results = LocalGroup::new(4).run(|comm| {
            let rank = comm.rank() as u64;
            let seeds = [10u64, 11, 12, 13];
            let seed = comm.scatter(0, if rank == 0 { Some(&seeds[..]) } else { None })?;
            let sum = comm.reduce_sum(0, &[rank, 1])?;
            let stop = comm.broadcast_flag(0, sum.as_ref().map_or(false, |s| s[0] == 6))?;
            comm.barrier()?;
            let gathered = comm.gather(0, seed)?;
            Ok((seed, sum, stop, gathered))
        });
        for (rank, result) in results.into_iter().enumerate() {
            let (seed, sum, stop, gathered) = result.unwrap();
            assert_eq!(seed, 10 + rank as u64);
            assert!(stop);
            if rank == 0 {
                assert_eq!(sum, Some(vec![6, 4]));
                assert_eq!(gathered, Some(vec![10, 11, 12, 13]));
            } else {
                assert_eq!(sum, None);
                assert_eq!(gathered, None);
            }
        }
    }

    #[test]
    fn failing_worker_releases_blocked_peers() {
        let results = LocalGroup::new(3).run(|comm| {
            if comm.rank() == 2 {
                anyhow::bail!("resource exhausted");
            }
            comm.barrier()
        });
        assert!(results[2].is_err());
        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }

    #[test]
    fn panicking_worker_releases_blocked_peers() {
        let results = LocalGroup::new(3).run(|comm| {
            if comm.rank() == 1 {
                panic!("walk invariant broken");
            }
            comm.barrier()
        });
        let panicked = results[1].as_ref().unwrap_err();
        assert!(format!("{:#}", panicked).contains("Worker 1 panicked: walk invariant broken"));
        for rank in [0, 2] {
            let released = results[rank].as_ref().unwrap_err();
            assert!(format!("{:#}", released).contains("Worker 1 aborted the group"), "{:#}", released);
        }
    }
}

use anyhow::Result;
use walk_common::{Direction, Particle};

/// A particle collection with explicit, fallible capacity growth.
///
/// Growth only happens from `push`, which is called during the sequential walk
/// and merge phases, never while an exchange holds a borrow of the contents.
#[derive(Debug, Clone)]
pub struct ParticleBuffer {
    items: Vec<Particle>,
    growth_factor: usize,
}

impl ParticleBuffer {
    pub fn with_capacity(capacity: usize, growth_factor: usize) -> Result<Self> {
        let mut items = Vec::new();
        items
            .try_reserve_exact(capacity)
            .map_err(|e| anyhow::anyhow!("Failed to allocate particle buffer of {} slots: {}", capacity, e))?;
        Ok(Self { items, growth_factor: growth_factor.max(2) })
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn as_slice(&self) -> &[Particle] { &self.items }

    #[inline(always)]
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Particle> { self.items.get_mut(idx) }

    /// Appends a particle, multiplying the capacity by the growth factor when full.
    /// Allocation failure is returned as an error; existing contents are untouched.
    pub fn push(&mut self, particle: Particle) -> Result<()> {
        if self.items.len() == self.items.capacity() {
            let current = self.items.capacity();
            let additional = (current * (self.growth_factor - 1)).max(1);
            self.items.try_reserve_exact(additional).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to grow particle buffer from {} to {} slots: {}",
                    current,
                    current + additional,
                    e
                )
            })?;
            log::trace!("Grew particle buffer from {} to {} slots.", current, self.items.capacity());
        }
        self.items.push(particle);
        Ok(())
    }

    /// Removes the particle at `idx` by moving the last one into its slot.
    #[inline(always)]
    pub fn swap_remove(&mut self, idx: usize) -> Particle { self.items.swap_remove(idx) }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) { self.items.clear(); }

    /// Moves every particle of `incoming` onto the end of this buffer.
    pub fn extend_from(&mut self, incoming: Vec<Particle>) -> Result<()> {
        for particle in incoming {
            self.push(particle)?;
        }
        Ok(())
    }
}

/// Destination of a particle leaving the active collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Staging(Direction),
    Completed,
}

/// The five particle collections owned by a single worker.
///
/// Each particle is in exactly one of them; transfers go through [`RegionState::relocate`]
/// or the exchange, so nothing is ever duplicated or dropped.
#[derive(Debug)]
pub struct RegionState {
    pub active: ParticleBuffer,
    staging: [ParticleBuffer; 4], // Indexed by Direction::index()
    pub completed: ParticleBuffer,
}

impl RegionState {
    /// Allocates every collection with room for `initial_capacity` particles.
    pub fn new(initial_capacity: usize, growth_factor: usize) -> Result<Self> {
        let buffer = || ParticleBuffer::with_capacity(initial_capacity, growth_factor);
        Ok(Self {
            active: buffer()?,
            staging: [buffer()?, buffer()?, buffer()?, buffer()?],
            completed: buffer()?,
        })
    }

    pub fn staging(&self, dir: Direction) -> &ParticleBuffer { &self.staging[dir.index()] }

    pub fn staged_total(&self) -> usize { self.staging.iter().map(ParticleBuffer::len).sum() }

    /// Every particle this worker currently holds.
    pub fn population(&self) -> usize {
        self.active.len() + self.staged_total() + self.completed.len()
    }

    /// Moves the active particle at `idx` into `target` (swap-remove from active).
    pub fn relocate(&mut self, idx: usize, target: Slot) -> Result<()> {
        let particle = self.active.swap_remove(idx);
        match target {
            Slot::Staging(dir) => self.staging[dir.index()].push(particle),
            Slot::Completed => self.completed.push(particle),
        }
    }

    /// Resets all staging collections after their contents have been handed off.
    pub fn clear_staging(&mut self) {
        for buffer in self.staging.iter_mut() {
            buffer.clear();
        }
    }
}

use anyhow::Result;
use walk_common::{Direction, Particle, WalkParams};

use crate::region_state::{RegionState, Slot};

/// Outcome of advancing one particle for up to `batch_limit` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Batch exhausted; the particle stays active for the next round.
    Active,
    /// Lifetime spent.
    Completed,
    /// Left the region; wrapped locally and waiting for the exchange.
    Migrating(Direction),
}

/// Per-round counters from [`RandomWalkEngine::advance_round`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkTally {
    pub still_active: usize,
    pub completed: usize,
    pub migrating: [usize; 4], // Indexed by Direction::index()
}

/// Advances particles with the weighted arg-max direction rule.
#[derive(Debug, Clone)]
pub struct RandomWalkEngine {
    side: i32,
    batch_limit: u32,
    // Direction weights
    pl: f32,
    pr: f32,
    pu: f32,
    pd: f32,
}

impl RandomWalkEngine {
    pub fn new(params: &WalkParams, batch_limit: u32) -> Self {
        Self {
            side: params.l as i32,
            batch_limit,
            pl: params.pl,
            pr: params.pr,
            pu: params.pu,
            pd: params.pd,
        }
    }

    /// Walks every active particle once, routing exits into staging and
    /// exhausted particles into the completed collection.
    ///
    /// Removal is swap-based, so the particle moved into the vacated slot is
    /// processed next without advancing the index.
    pub fn advance_round(&self, state: &mut RegionState) -> Result<WalkTally> {
        let mut tally = WalkTally::default();
        let mut idx = 0;
        while idx < state.active.len() {
            let outcome = match state.active.get_mut(idx) {
                Some(particle) => self.advance_particle(particle),
                None => break,
            };
            match outcome {
                StepOutcome::Active => {
                    tally.still_active += 1;
                    idx += 1;
                }
                StepOutcome::Completed => {
                    state.relocate(idx, Slot::Completed)?;
                    tally.completed += 1;
                }
                StepOutcome::Migrating(dir) => {
                    state.relocate(idx, Slot::Staging(dir))?;
                    tally.migrating[dir.index()] += 1;
                }
            }
        }
        Ok(tally)
    }

    /// Runs up to `batch_limit` single steps on one particle.
    pub fn advance_particle(&self, particle: &mut Particle) -> StepOutcome {
        for _ in 0..self.batch_limit {
            if particle.is_exhausted() {
                return StepOutcome::Completed;
            }
            if let Some(exit) = self.step(particle) {
                return StepOutcome::Migrating(exit);
            }
        }
        StepOutcome::Active
    }

    /// One move. Returns the edge crossed, if any, after wrapping the
    /// coordinate to the opposite side of this region.
    pub fn step(&self, particle: &mut Particle) -> Option<Direction> {
        // Draw order is fixed: up, down, left, right
        let up = particle.rng.next_draw() as f32 * self.pu;
        let down = particle.rng.next_draw() as f32 * self.pd;
        let left = particle.rng.next_draw() as f32 * self.pl;
        let right = particle.rng.next_draw() as f32 * self.pr;

        let dir = choose_direction(left, right, up, down);
        let (dx, dy) = dir.offset();
        particle.position.x += dx;
        particle.position.y += dy;
        particle.remaining_steps = particle.remaining_steps.saturating_sub(1);

        let pos = &mut particle.position;
        if pos.y < 0 {
            pos.y = self.side - 1;
            Some(Direction::Up)
        } else if pos.y >= self.side {
            pos.y = 0;
            Some(Direction::Down)
        } else if pos.x < 0 {
            pos.x = self.side - 1;
            Some(Direction::Left)
        } else if pos.x >= self.side {
            pos.x = 0;
            Some(Direction::Right)
        } else {
            None
        }
    }
}

/// Arg-max over the scaled draws. Ties go to the first of LEFT, RIGHT, UP, DOWN.
#[inline(always)]
pub fn choose_direction(left: f32, right: f32, up: f32, down: f32) -> Direction {
    if left >= right && left >= up && left >= down {
        Direction::Left
    } else if right >= left && right >= up && right >= down {
        Direction::Right
    } else if up >= left && up >= right && up >= down {
        Direction::Up
    } else {
        Direction::Down
    }
}

use serde::{Deserialize, Serialize};

use crate::topology::Coords;

/// Per-particle pseudo-random state.
///
/// Reproduces the reentrant `rand_r` recurrence: three LCG rounds whose high bits
/// are packed into a 31-bit result. The state lives inside the particle that owns
/// it and only the walk step of that particle advances it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleRng(u32);

const LCG_MULTIPLIER: u32 = 1_103_515_245;
const LCG_INCREMENT: u32 = 12_345;

/// Largest value `next_draw` can return.
pub const DRAW_MAX: u32 = (1 << 31) - 1;

impl ParticleRng {
    pub fn new(state: u32) -> Self { Self(state) }

    /// Current raw state.
    pub fn state(self) -> u32 { self.0 }

    /// Advances the state and returns a value in `[0, DRAW_MAX]`.
    pub fn next_draw(&mut self) -> u32 {
        let mut next = self.0;

        next = next.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        let mut result = (next / 65_536) % 2_048;

        next = next.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        result <<= 10;
        result ^= (next / 65_536) % 1_024;

        next = next.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        result <<= 10;
        result ^= (next / 65_536) % 1_024;

        self.0 = next;
        result
    }
}

/// A walker: its position inside the owning region, remaining lifetime and own RNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Particle {
    pub position: Coords,
    pub remaining_steps: u32,
    pub rng: ParticleRng,
}

impl Particle {
    pub fn new(position: Coords, remaining_steps: u32, rng_state: u32) -> Self {
        Self { position, remaining_steps, rng: ParticleRng::new(rng_state) }
    }

    /// True once the lifetime budget is spent.
    #[inline(always)]
    pub fn is_exhausted(&self) -> bool { self.remaining_steps == 0 }
}

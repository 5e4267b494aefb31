use serde::{Deserialize, Serialize};

/// One of the four axis-aligned moves on the toroidal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// All directions, in the order staging collections are indexed.
    pub const ALL: [Direction; 4] = [Direction::Left, Direction::Right, Direction::Up, Direction::Down];

    /// Stable index into per-direction arrays.
    #[inline(always)]
    pub fn index(self) -> usize {
        match self {
            Direction::Left => 0,
            Direction::Right => 1,
            Direction::Up => 2,
            Direction::Down => 3,
        }
    }

    /// The direction pointing back at the sender.
    /// Particles leaving through our LEFT edge arrive at the neighbor from its RIGHT.
    #[inline(always)]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Unit offset `(dx, dy)`. UP decrements y, DOWN increments it.
    #[inline(always)]
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// Position of a region (or of a particle inside a region).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coords {
    pub x: i32,
    pub y: i32,
}

impl Coords {
    #[inline(always)]
    pub fn new(x: i32, y: i32) -> Self { Self { x, y } }
}

/// Maps worker identities onto an `a x b` toroidal grid of regions.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTopology {
    worker_id: usize,
    grid_width: u32,  // a
    grid_height: u32, // b
    coords: Coords,
    neighbors: [usize; 4], // Indexed by Direction::index()
}

impl GridTopology {
    /// Builds the topology for `worker_id` on an `a x b` grid.
    /// Callers guarantee `a, b >= 1` and `worker_id < a * b` (checked by `WalkParams::validate`).
    pub fn new(worker_id: usize, grid_width: u32, grid_height: u32) -> Self {
        let coords = coordinates_of(worker_id, grid_width);
        let mut neighbors = [0usize; 4];
        for dir in Direction::ALL {
            neighbors[dir.index()] = neighbor(coords, dir, grid_width, grid_height);
        }
        Self { worker_id, grid_width, grid_height, coords, neighbors }
    }

    pub fn worker_id(&self) -> usize { self.worker_id }
    pub fn coords(&self) -> Coords { self.coords }

    /// Number of regions (and therefore workers) in the grid.
    pub fn worker_count(&self) -> usize { self.grid_width as usize * self.grid_height as usize }

    /// Worker owning the region adjacent in `dir`.
    #[inline(always)]
    pub fn neighbor(&self, dir: Direction) -> usize { self.neighbors[dir.index()] }
}

/// `x = id mod a`, `y = id div a`.
#[inline(always)]
pub fn coordinates_of(worker_id: usize, grid_width: u32) -> Coords {
    let a = grid_width as usize;
    Coords::new((worker_id % a) as i32, (worker_id / a) as i32)
}

/// Converts grid coordinates back into a worker id (`y * a + x`).
#[inline(always)]
pub fn worker_at(coords: Coords, grid_width: u32) -> usize {
    coords.y as usize * grid_width as usize + coords.x as usize
}

/// Worker id one step away in `dir`, wrapping on both axes.
pub fn neighbor(coords: Coords, dir: Direction, grid_width: u32, grid_height: u32) -> usize {
    let (dx, dy) = dir.offset();
    let x = (coords.x + dx).rem_euclid(grid_width as i32);
    let y = (coords.y + dy).rem_euclid(grid_height as i32);
    worker_at(Coords::new(x, y), grid_width)
}

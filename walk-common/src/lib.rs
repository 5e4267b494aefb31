pub mod config;
pub mod particle;
pub mod report;
pub mod topology;

// Re-export key types for easier use by dependent crates
pub use config::{EngineConfig, EngineSettings, OutputConfig, WalkParams};
pub use particle::{Particle, ParticleRng};
pub use report::RunReport;
pub use topology::{Coords, Direction, GridTopology};

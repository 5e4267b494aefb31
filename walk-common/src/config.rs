use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The nine startup values, in their positional order on the command line.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct WalkParams {
    /// Side length of each square region.
    pub l: u32,
    /// Grid width in regions.
    pub a: u32,
    /// Grid height in regions.
    pub b: u32,
    /// Lifetime (step budget) of each particle.
    pub n: u32,
    /// Particles seeded per worker.
    #[serde(rename = "N")]
    pub particles_per_worker: u32,
    // Direction weights
    pub pl: f32,
    pub pr: f32,
    pub pu: f32,
    pub pd: f32,
}

impl WalkParams {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.l == 0 {
            anyhow::bail!("region side length l must be at least 1.");
        }
        if self.a == 0 || self.b == 0 {
            anyhow::bail!("grid dimensions must be at least 1x1 (got {}x{}).", self.a, self.b);
        }
        if self.l > i32::MAX as u32 {
            anyhow::bail!("region side length l={} does not fit signed coordinates.", self.l);
        }
        for (name, w) in [("pl", self.pl), ("pr", self.pr), ("pu", self.pu), ("pd", self.pd)] {
            if !w.is_finite() {
                anyhow::bail!("direction weight {} must be finite (got {}).", name, w);
            }
        }
        Ok(())
    }

    /// Number of workers in the group: one per region.
    pub fn worker_count(&self) -> usize { self.a as usize * self.b as usize }

    /// Particles in the whole simulation (`size * N`).
    pub fn total_particles(&self) -> u64 {
        self.worker_count() as u64 * self.particles_per_worker as u64
    }
}

// Engine tuning knobs, loaded from the [engine] table
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineSettings {
    /// Maximum steps one particle advances per round before the exchange.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
    /// Multiplier applied to a full collection's capacity when it grows.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: usize,
    /// Fixed root seed. The wall clock is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

// Report destinations, loaded from the [output] table
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_report_path")]
    pub report_path: String,
    /// Also write the report as JSON when set.
    #[serde(default)]
    pub summary_json: Option<String>,
}

fn default_batch_limit() -> u32 {
    200
}

fn default_growth_factor() -> usize {
    2
}

fn default_report_path() -> String {
    "stats.txt".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            batch_limit: default_batch_limit(),
            growth_factor: default_growth_factor(),
            seed: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { report_path: default_report_path(), summary_json: None }
    }
}

/// Optional tuning file. Every table and key may be omitted.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Like [`EngineConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.batch_limit == 0 {
            anyhow::bail!("batch_limit must be greater than 0.");
        }
        if self.engine.growth_factor < 2 {
            anyhow::bail!("growth_factor must be at least 2 (got {}).", self.engine.growth_factor);
        }
        if self.output.report_path.is_empty() {
            anyhow::bail!("report_path must not be empty.");
        }
        Ok(())
    }
}

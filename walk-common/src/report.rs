use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::config::WalkParams;

/// Final statistics produced by the coordinator once every particle has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Startup values echoed on the header line.
    pub params: WalkParams,
    /// Wall time from the first round to termination.
    pub elapsed_seconds: f64,
    /// Number of rounds executed.
    pub rounds: u64,
    /// `completed_per_worker[id]` is the completed count held by worker `id`.
    pub completed_per_worker: Vec<u64>,
}

impl RunReport {
    pub fn total_completed(&self) -> u64 {
        self.completed_per_worker.iter().sum()
    }

    /// Writes the text report (the `Display` form).
    pub fn write_text<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let mut file = File::create(path_ref)
            .with_context(|| format!("Failed to create report file '{}'", path_ref.display()))?;
        write!(file, "{}", self)
            .with_context(|| format!("Failed to write report file '{}'", path_ref.display()))?;
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        writeln!(
            f,
            "{} {} {} {} {} {:.6} {:.6} {:.6} {:.6} {:.6}s",
            p.l, p.a, p.b, p.n, p.particles_per_worker, p.pl, p.pr, p.pu, p.pd, self.elapsed_seconds
        )?;
        for (rank, completed) in self.completed_per_worker.iter().enumerate() {
            writeln!(f, "{}: {}", rank, completed)?;
        }
        Ok(())
    }
}

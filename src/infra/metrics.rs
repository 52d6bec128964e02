// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file at every checkpoint.
//
// Metrics recorded per checkpoint:
//   - global_step:    optimizer updates so far
//   - learning_rate:  rate after any decay at this checkpoint
//   - step_time:      average seconds per training step
//   - perplexity:     exp(average training loss) over the interval
//   - eval_bucket_N:  dev-set perplexity of bucket N
//                     (empty cell when the dev bucket is empty)
//
// Output file: <train_dir>/metrics.csv
//
// Example CSV output:
//   global_step,learning_rate,step_time,perplexity,eval_bucket_0,eval_bucket_1
//   250,0.001000,0.412000,212.310000,180.220000,
//   500,0.001000,0.409000,97.500000,88.010000,120.440000

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub global_step:     u64,
    pub learning_rate:   f64,
    pub step_time:       f64,
    /// Training perplexity; +inf when the loss overflowed
    pub perplexity:      f64,
    /// One entry per bucket, None when the bucket was skipped
    pub eval_perplexity: Vec<Option<f64>>,
}

impl CheckpointMetrics {
    fn csv_row(&self) -> String {
        let mut row = format!(
            "{},{:.6},{:.6},{:.6}",
            self.global_step, self.learning_rate, self.step_time, self.perplexity,
        );
        for eval in &self.eval_perplexity {
            row.push(',');
            if let Some(p) = eval {
                row.push_str(&format!("{p:.6}"));
            }
        }
        row
    }
}

/// Logs checkpoint metrics to a CSV file for later analysis.
#[derive(Debug)]
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so a
    /// resumed run appends to the same log.
    pub fn new(dir: impl AsRef<Path>, num_buckets: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            let mut header = String::from("global_step,learning_rate,step_time,perplexity");
            for bucket_id in 0..num_buckets {
                header.push_str(&format!(",eval_bucket_{bucket_id}"));
            }
            writeln!(f, "{header}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one checkpoint's metrics as a new row.
    pub fn log(&self, m: &CheckpointMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.csv_row())?;

        tracing::debug!("Logged metrics for step {}", m.global_step);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ============================================================
// Layer 6: Metrics Logger
// ============================================================
// Appends one CSV row per training epoch.
//
// Output file: <output_dir>/metrics.csv
//
//   epoch,train_loss,val_loss,val_mrr
//   1,3.124500,3.089200,0.183000
//   2,2.890100,2.854300,0.241000
//
// val_mrr is the mean reciprocal rank of the true code among
// all codes of the same validation batch; 1.0 means every
// query ranked its own code first.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

pub const METRICS_HEADER: &str = "epoch,train_loss,val_loss,val_mrr";

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch: usize,

    /// Mean in-batch softmax loss over all training batches
    pub train_loss: f64,

    pub val_loss: f64,

    /// Range: [0.0, 1.0]
    pub val_mrr: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, val_mrr: f64) -> Self {
        Self { epoch, train_loss, val_loss, val_mrr }
    }

    /// True if this epoch beat the best validation loss so far.
    /// A NaN loss never counts as an improvement.
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header if the file doesn't exist yet, so reruns append.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{METRICS_HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.val_mrr,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}, val_mrr={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.val_mrr,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 2.5, 2.3, 0.4);
        assert!(m.is_improvement(3.0));
        assert!(!m.is_improvement(2.0));
        assert!(!EpochMetrics::new(1, 1.0, f64::NAN, 0.0).is_improvement(f64::INFINITY));
    }

    #[test]
    fn test_rows_are_appended_across_loggers() {
        let tmp = tempfile::tempdir().unwrap();
        MetricsLogger::new(tmp.path()).unwrap().log(&EpochMetrics::new(1, 2.0, 1.5, 0.5)).unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();
        logger.log(&EpochMetrics::new(2, 1.0, 1.25, 0.75)).unwrap();

        let text = std::fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            METRICS_HEADER,
            "1,2.000000,1.500000,0.500000",
            "2,1.000000,1.250000,0.750000",
        ]);
    }
}

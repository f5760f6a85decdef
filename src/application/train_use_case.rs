// ============================================================
// Layer 2: TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Build the context from the config, or restore a
//           saved one                        (Layer 5 - ml)
//   Step 2: Encode the training split        (Layer 4 - data)
//   Step 3: Encode the validation split, or carve one out of
//           the training samples             (Layer 4 - data)
//   Step 4: Save the config next to the run  (Layer 6 - infra)
//   Step 5: Run the epoch loop               (Layer 5 - ml)
//
// The backend is chosen from `training.device` once, here;
// everything below is generic over it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;

use crate::data::{dataset::LangDataset, splitter::split_train_val};
use crate::domain::config::{ContextConfig, DeviceKind};
use crate::domain::split::DatasetSplit;
use crate::infra::record::write_json;
use crate::ml::context::TrainingContext;
use crate::ml::trainer::{run_training, TrainingSummary};

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config:  ContextConfig,
    /// Continue from a saved context instead of starting fresh
    restore: Option<PathBuf>,
}

impl TrainUseCase {
    pub fn new(config: ContextConfig, restore: Option<PathBuf>) -> Self {
        Self { config, restore }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingSummary> {
        match self.config.training.device {
            DeviceKind::Cpu  => self.run::<Autodiff<NdArray>>(Default::default()),
            DeviceKind::Wgpu => self.run::<Autodiff<Wgpu>>(WgpuDevice::default()),
        }
    }

    fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<TrainingSummary> {
        // ── Step 1: Context ───────────────────────────────────────────────────
        // A restored context keeps the config it was saved with; only the
        // device comes from the file given on the command line.
        let mut ctx = match &self.restore {
            Some(dir) => {
                tracing::info!("Restoring training context from '{}'", dir.display());
                TrainingContext::<B>::build_context_from_dir(dir, device)
                    .with_context(|| format!("Cannot restore training context from '{}'", dir.display()))?
            }
            None => TrainingContext::<B>::build_context_from_config(self.config.clone(), device)
                .context("Cannot build training context from configuration")?,
        };
        let cfg = ctx.config().clone();

        // ── Step 2: Training samples ──────────────────────────────────────────
        let train = ctx
            .build_lang_dataset(DatasetSplit::Train)
            .context("Cannot build the training dataset")?;

        // ── Step 3: Validation samples ────────────────────────────────────────
        let (train, val) = if cfg.dataset.val_paths.is_empty() {
            tracing::info!(
                "No validation directories configured, holding out {:.0}% of the training samples",
                (1.0 - cfg.training.train_fraction) * 100.0
            );
            let name = train.name().to_string();
            let (t, v) = split_train_val(train.into_samples(), cfg.training.train_fraction, cfg.training.seed);
            (LangDataset::new(name, t), LangDataset::new(format!("{}_{}", DatasetSplit::Val, ctx.tokenizer_type()), v))
        } else {
            let val = ctx
                .build_lang_dataset(DatasetSplit::Val)
                .context("Cannot build the validation dataset")?;
            (train, val)
        };
        tracing::info!("Split: {} train, {} validation", train.sample_count(), val.sample_count());

        // ── Step 4: Save config for later runs ────────────────────────────────
        let run_dir = cfg.training.output_dir.join(&cfg.training.name);
        write_json(&run_dir.join("train_config.json"), &cfg)
            .with_context(|| format!("Cannot write train_config.json to '{}'", run_dir.display()))?;

        // ── Step 5: Train ─────────────────────────────────────────────────────
        run_training(&mut ctx, train, val)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::context::tests::test_config;

    #[test]
    fn test_train_then_continue_from_saved_context() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_config(tmp.path());

        let summary = TrainUseCase::new(cfg.clone(), None).execute().unwrap();
        assert_eq!(summary.epochs_run, 1);
        let run_dir = tmp.path().join("out").join("query_code_siamese");
        assert!(run_dir.join("train_config.json").is_file());
        assert!(summary.last_dir.join("records.json").is_file());

        let resumed = TrainUseCase::new(cfg, Some(summary.last_dir.clone())).execute().unwrap();
        assert_eq!(resumed.epochs_run, 1);
    }

    #[test]
    fn test_restore_from_missing_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_config(tmp.path());
        let err = TrainUseCase::new(cfg, Some(tmp.path().join("nothing"))).execute().unwrap_err();
        assert!(format!("{err:#}").contains("nothing to restore from"));
    }
}

// ============================================================
// Layer 5: Training Loop
// ============================================================
// Epoch driver over a TrainingContext using Burn's DataLoader.
//
// Per epoch:
//   1. train mode: zero_grad → forward → backward_optimize
//      for every shuffled training batch
//   2. eval mode: forward over every validation batch,
//      collecting loss and in-batch MRR
//   3. append a row to metrics.csv
//   4. save the whole context to <run>/best whenever the
//      validation loss improves
//
// The final state is always saved to <run>/last.
//
// Both loaders produce batches on the autodiff backend; the
// context strips autodiff itself when it is in eval mode.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{batcher::SiameseBatcher, dataset::LangDataset};
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::context::TrainingContext;
use crate::ml::model::mean_reciprocal_rank;

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs_run:    usize,
    pub best_epoch:    Option<usize>,
    pub best_val_loss: f64,
    /// Context saved at the best validation loss
    pub best_dir:      PathBuf,
    /// Context saved after the last epoch
    pub last_dir:      PathBuf,
}

pub fn run_training<B: AutodiffBackend>(
    ctx:           &mut TrainingContext<B>,
    train_dataset: LangDataset,
    val_dataset:   LangDataset,
) -> Result<TrainingSummary> {
    let cfg = ctx.config().training.clone();
    let run_dir  = cfg.output_dir.join(&cfg.name);
    let best_dir = run_dir.join("best");
    let last_dir = run_dir.join("last");
    let metrics  = MetricsLogger::new(&run_dir)?;

    tracing::info!(
        "Training '{}': {} train / {} val samples, batch_size={}, epochs={}",
        cfg.name,
        train_dataset.sample_count(),
        val_dataset.sample_count(),
        cfg.batch_size,
        cfg.epochs,
    );

    let device = ctx.device().clone();
    let train_loader = DataLoaderBuilder::new(SiameseBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);
    let val_loader = DataLoaderBuilder::new(SiameseBatcher::<B>::new(device))
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .build(val_dataset);

    let mut best_val_loss = f64::INFINITY;
    let mut best_epoch = None;

    for epoch in 1..=cfg.epochs {
        // ── Training phase ────────────────────────────────────────────────────
        ctx.train_mode();
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for (idx, batch) in train_loader.iter().enumerate() {
            ctx.zero_grad()?;
            let output = ctx.forward(batch, idx);
            let loss = ctx.backward_optimize(output.loss)?;
            train_loss_sum += loss.into_scalar().elem::<f64>();
            train_batches  += 1;
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        ctx.eval_mode();
        let mut val_loss_sum = 0.0f64;
        let mut val_batches  = 0usize;
        let mut mrr_sum      = 0.0f64;
        let mut val_samples  = 0usize;

        for (idx, batch) in val_loader.iter().enumerate() {
            let n = batch.len();
            let output = ctx.forward(batch, idx);
            val_loss_sum += output.loss.into_scalar().elem::<f64>();
            val_batches  += 1;

            let scores = output
                .scores
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("Cannot read similarity scores: {e:?}"))?;
            mrr_sum     += mean_reciprocal_rank(&scores, n) * n as f64;
            val_samples += n;
        }

        let avg_val_loss = if val_batches > 0 { val_loss_sum / val_batches as f64 } else { f64::NAN };
        let val_mrr      = if val_samples > 0 { mrr_sum / val_samples as f64 } else { 0.0 };

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_mrr={:.4}",
            epoch, cfg.epochs, avg_train_loss, avg_val_loss, val_mrr,
        );

        let row = EpochMetrics::new(epoch, avg_train_loss, avg_val_loss, val_mrr);
        metrics.log(&row)?;

        if row.is_improvement(best_val_loss) {
            best_val_loss = avg_val_loss;
            best_epoch = Some(epoch);
            ctx.save(&best_dir)
                .with_context(|| format!("Failed to save best context to '{}'", best_dir.display()))?;
            tracing::info!("New best val_loss {:.4} at epoch {}", avg_val_loss, epoch);
        }
    }

    ctx.save(&last_dir)
        .with_context(|| format!("Failed to save final context to '{}'", last_dir.display()))?;
    tracing::info!("Training complete!");

    Ok(TrainingSummary {
        epochs_run: cfg.epochs,
        best_epoch,
        best_val_loss,
        best_dir,
        last_dir,
    })
}

// ============================================================
// Layer 5: Model + Optimizer Pairing
// ============================================================
// The siamese module and its AdamW state saved and restored
// as one unit.
//
// AdamW keeps its moment estimates in a map keyed by the
// ParamId of each tensor it updates. Those ids travel inside
// the module record, so the optimizer record is only valid
// next to the exact module record it was saved with.
//
// Files written under the entry directory:
//   model_config.json     ← architecture, to rebuild the module
//   optimizer_config.json ← AdamW hyper-parameters
//   pairing.json          ← learning rate
//   model.mpk             ← module weights (full precision)
//   optimizer.mpk         ← AdamW moments, keyed by ParamId
//
// Restore runs in two phases and returns nothing until both
// pass:
//   Phase 1: rebuild the module, load its weights onto the
//            target device, check every parameter is there
//   Phase 2: load the optimizer record onto the same device,
//            check every ParamId it names exists in the module

use std::collections::HashSet;
use std::path::Path;

use burn::{
    module::{list_param_ids, AutodiffModule, ParamId},
    optim::{adaptor::OptimizerAdaptor, AdamW, AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::Recordable;
use crate::infra::record::{read_json, write_json};
use crate::ml::model::{QueryCodeSiamese, QueryCodeSiameseConfig};

pub const MODEL_AND_ADAMW_TAG: &str = "query_code_siamese.ml.pairing.ModelAndAdamW";

const MODEL_CONFIG: &str = "model_config.json";
const OPTIM_CONFIG: &str = "optimizer_config.json";
const PAIRING_META: &str = "pairing.json";
const MODEL_RECORD: &str = "model";
const OPTIM_RECORD: &str = "optimizer";

type Siamese<B> = QueryCodeSiamese<B>;
type SiameseOptim<B> = OptimizerAdaptor<AdamW, Siamese<B>, B>;
type SiameseOptimRecord<B> = <SiameseOptim<B> as Optimizer<Siamese<B>, B>>::Record;

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PairingMeta {
    lr: f64,
}

pub struct ModelAndAdamW<B: AutodiffBackend> {
    model:        Siamese<B>,
    model_config: QueryCodeSiameseConfig,
    optim:        SiameseOptim<B>,
    optim_config: AdamWConfig,
    accumulator:  GradientsAccumulator<Siamese<B>>,
    lr:           f64,
}

impl<B: AutodiffBackend> ModelAndAdamW<B> {
    /// A freshly initialised module with an empty AdamW state.
    pub fn new(
        model_config: QueryCodeSiameseConfig,
        optim_config: AdamWConfig,
        lr: f64,
        device: &B::Device,
    ) -> Self {
        let model = model_config.init::<B>(device);
        let optim = optim_config.init::<B, Siamese<B>>();
        Self {
            model,
            model_config,
            optim,
            optim_config,
            accumulator: GradientsAccumulator::new(),
            lr,
        }
    }

    pub fn model(&self) -> &Siamese<B> {
        &self.model
    }

    /// Inference copy on the inner backend: no autodiff graph, no dropout.
    pub fn valid_model(&self) -> Siamese<B::InnerBackend> {
        self.model.valid()
    }

    pub fn model_config(&self) -> &QueryCodeSiameseConfig {
        &self.model_config
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Backpropagate `loss` and apply one AdamW step with everything
    /// accumulated since the last `zero_grad`.
    pub fn step(&mut self, loss: Tensor<B, 1>) {
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.accumulator.accumulate(&self.model, grads);
        let grads = self.accumulator.grads();
        self.model = self.optim.step(self.lr, self.model.clone(), grads);
    }

    pub fn zero_grad(&mut self) {
        self.accumulator = GradientsAccumulator::new();
    }

    /// Two-phase restore; see the module header.
    pub fn restore(dir: &Path, device: &B::Device) -> Result<Self> {
        if !dir.is_dir() {
            return Err(SiameseError::not_found(dir, "model and optimizer record"));
        }
        let model_config = QueryCodeSiameseConfig::load(dir.join(MODEL_CONFIG))
            .map_err(|e| SiameseError::corrupt(dir.join(MODEL_CONFIG), "model config", e))?;
        let optim_config = AdamWConfig::load(dir.join(OPTIM_CONFIG))
            .map_err(|e| SiameseError::corrupt(dir.join(OPTIM_CONFIG), "optimizer config", e))?;
        let meta: PairingMeta = read_json(&dir.join(PAIRING_META), "pairing metadata")?;

        // Phase 1: module first, on the target device.
        let model_path = dir.join(MODEL_RECORD);
        let record = Recorder::<B>::load(&recorder(), model_path.clone(), device)
            .map_err(|e| SiameseError::corrupt(&model_path, "model record", e))?;
        let model = model_config.init::<B>(device).load_record(record);
        check_devices(&model, device)?;

        // Phase 2: optimizer state, bound to the parameters just loaded.
        let optim_path = dir.join(OPTIM_RECORD);
        let optim_record: SiameseOptimRecord<B> = Recorder::<B>::load(&recorder(), optim_path.clone(), device)
            .map_err(|e| SiameseError::corrupt(&optim_path, "optimizer record", e))?;
        check_param_binding(&model, optim_record.keys(), &optim_path)?;
        let optim = optim_config.init::<B, Siamese<B>>().load_record(optim_record);

        tracing::debug!("Restored model and AdamW state from '{}'", dir.display());
        Ok(Self {
            model,
            model_config,
            optim,
            optim_config,
            accumulator: GradientsAccumulator::new(),
            lr: meta.lr,
        })
    }
}

fn check_devices<B: Backend>(model: &Siamese<B>, device: &B::Device) -> Result<()> {
    match model.devices().into_iter().find(|d| d != device) {
        Some(found) => Err(SiameseError::DeviceMismatch {
            expected: format!("{device:?}"),
            found:    format!("{found:?}"),
        }),
        None => Ok(()),
    }
}

/// Every ParamId an optimizer record refers to must belong to `model`.
pub fn check_param_binding<'a, B: Backend>(
    model: &Siamese<B>,
    record_ids: impl IntoIterator<Item = &'a ParamId>,
    path: &Path,
) -> Result<()> {
    let live: HashSet<ParamId> = list_param_ids(model).into_iter().collect();
    let stale = record_ids.into_iter().filter(|id| !live.contains(id)).count();
    if stale > 0 {
        return Err(SiameseError::corrupt(
            path,
            "optimizer record matching the model parameters",
            format!("{stale} optimizer entries refer to parameters the model does not have"),
        ));
    }
    Ok(())
}

impl<B: AutodiffBackend> Recordable for ModelAndAdamW<B> {
    fn type_tag(&self) -> &'static str {
        MODEL_AND_ADAMW_TAG
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(SiameseError::io(dir))?;
        self.model_config
            .save(dir.join(MODEL_CONFIG))
            .map_err(SiameseError::io(dir.join(MODEL_CONFIG)))?;
        self.optim_config
            .save(dir.join(OPTIM_CONFIG))
            .map_err(SiameseError::io(dir.join(OPTIM_CONFIG)))?;
        write_json(&dir.join(PAIRING_META), &PairingMeta { lr: self.lr })?;

        let model_path = dir.join(MODEL_RECORD);
        Recorder::<B>::record(&recorder(), self.model.clone().into_record(), model_path.clone())
            .map_err(|e| SiameseError::corrupt(&model_path, "writable model record", e))?;
        let optim_path = dir.join(OPTIM_RECORD);
        Recorder::<B>::record(&recorder(), self.optim.to_record(), optim_path.clone())
            .map_err(|e| SiameseError::corrupt(&optim_path, "writable optimizer record", e))?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn pairing(device: &<TestBackend as Backend>::Device) -> ModelAndAdamW<TestBackend> {
        let cfg = QueryCodeSiameseConfig::new(20, 2, 6, 8, 2, 1, 16, 0.0, 4);
        ModelAndAdamW::new(cfg, AdamWConfig::new(), 1e-3, device)
    }

    fn trained(device: &<TestBackend as Backend>::Device) -> ModelAndAdamW<TestBackend> {
        let mut p = pairing(device);
        let tokens = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 5, 6, 7, 8], device).reshape([2, 3]);
        let mask = Tensor::<TestBackend, 2, Int>::ones([2, 3], device);
        let loss = p.model().encode_query(tokens, mask).powf_scalar(2.0).mean();
        p.zero_grad();
        p.step(loss);
        p
    }

    fn embed(p: &ModelAndAdamW<TestBackend>) -> Vec<f32> {
        let device = Default::default();
        let model = p.valid_model();
        let tokens = Tensor::<NdArray, 1, Int>::from_ints([3, 4, 0, 9, 1, 2], &device).reshape([2, 3]);
        let mask = Tensor::<NdArray, 1, Int>::from_ints([1, 1, 0, 1, 1, 1], &device).reshape([2, 3]);
        model.encode_query(tokens, mask).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_restore_is_bit_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let p = trained(&device);
        p.save(tmp.path()).unwrap();

        let restored = ModelAndAdamW::<TestBackend>::restore(tmp.path(), &device).unwrap();
        assert_eq!(embed(&p), embed(&restored));
        assert_eq!(restored.lr(), 1e-3);
    }

    #[test]
    fn test_restored_optimizer_keeps_training() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        trained(&device).save(tmp.path()).unwrap();
        let mut restored = ModelAndAdamW::<TestBackend>::restore(tmp.path(), &device).unwrap();
        let before = embed(&restored);
        let tokens = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 5], &device).reshape([1, 3]);
        let mask = Tensor::<TestBackend, 2, Int>::ones([1, 3], &device);
        let loss = restored.model().encode_query(tokens, mask).powf_scalar(2.0).mean();
        restored.step(loss);
        assert_ne!(before, embed(&restored));
    }

    #[test]
    fn test_optimizer_from_other_model_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        trained(&device).save(&a).unwrap();
        trained(&device).save(&b).unwrap();
        // b's weights with a's optimizer moments: different ParamIds
        std::fs::copy(a.join("optimizer.mpk"), b.join("optimizer.mpk")).unwrap();

        let err = ModelAndAdamW::<TestBackend>::restore(&b, &device).err().unwrap();
        assert!(matches!(err, SiameseError::CorruptArtifact { .. }), "{err}");
    }

    #[test]
    fn test_missing_dir_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = ModelAndAdamW::<TestBackend>::restore(&tmp.path().join("nope"), &device).err().unwrap();
        assert!(matches!(err, SiameseError::NotFound { .. }));
    }

    #[test]
    fn test_param_binding_rejects_unknown_ids() {
        let device = Default::default();
        let p = pairing(&device);
        let known = list_param_ids(p.model());
        assert!(check_param_binding(p.model(), known.iter(), Path::new("x")).is_ok());
        let foreign = [ParamId::new()];
        assert!(check_param_binding(p.model(), foreign.iter(), Path::new("x")).is_err());
    }
}

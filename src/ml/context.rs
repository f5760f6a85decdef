// ============================================================
// Layer 5: Training Context
// ============================================================
// The unit that trains, encodes and gets saved. It owns:
//
//   config           → the ContextConfig it was built from
//   tokenizer        → one Box<dyn TokenizerRecord>
//   model_optimizer  → one ModelAndAdamW pairing
//
// Two modes:
//   Train → forward runs the autodiff module (dropout on),
//           backward_optimize is allowed
//   Eval  → forward and encode_* run model.valid() on the
//           inner backend (no graph, no dropout);
//           backward_optimize is refused
//
// Saving writes the three records as one RecordMapping, so a
// restore either brings all three back or fails.

use std::path::{Path, PathBuf};

use burn::{
    optim::AdamWConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::{encoded_tensors, SiameseBatch};
use crate::data::corpus::expand_data_paths;
use crate::data::dataset::{LangDataset, LangDatasetSpec};
use crate::domain::config::ContextConfig;
use crate::domain::error::{Result, SiameseError};
use crate::domain::split::DatasetSplit;
use crate::infra::record::{RecordMapping, RecordRegistry};
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::{QueryCodeSiamese, QueryCodeSiameseConfig, SiameseOutput};
use crate::ml::pairing::{ModelAndAdamW, MODEL_AND_ADAMW_TAG};
use crate::tokenizer::{register_tokenizers, tokenizer_kind, EncodedBatch, TokenizerRecord};

pub const CONFIG_RECORD: &str = "config";
pub const TOKENIZER_RECORD: &str = "tokenizer";
pub const MODEL_OPTIMIZER_RECORD: &str = "model_optimizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

pub struct TrainingContext<B: AutodiffBackend> {
    config:     ContextConfig,
    tokenizer:  Box<dyn TokenizerRecord>,
    pairing:    ModelAndAdamW<B>,
    device:     B::Device,
    mode:       Mode,
    /// valid() copy, refreshed on every switch to Eval
    eval_model: Option<QueryCodeSiamese<B::InnerBackend>>,
}

/// Encoder hyper-parameters for a config and a tokenizer of `vocab_size`.
pub fn siamese_config(config: &ContextConfig, vocab_size: usize) -> QueryCodeSiameseConfig {
    let p = &config.dataset.common_params;
    let m = &config.model;
    let n_langs = p.lang_ids.values().max().map_or(1, |&max| max as usize + 1);
    QueryCodeSiameseConfig::new(
        vocab_size,
        n_langs,
        p.code_max_num_tokens.max(p.query_max_num_tokens),
        m.d_model,
        m.num_heads,
        m.num_layers,
        m.d_ff,
        m.dropout,
        m.embedding_dim,
    )
}

impl<B: AutodiffBackend> TrainingContext<B> {
    /// Fresh context: load or train the tokenizer, then a new model and
    /// optimizer sized for it.
    pub fn build_context_from_config(config: ContextConfig, device: B::Device) -> Result<Self> {
        let dirs = expand_data_paths(config.split_paths(DatasetSplit::Train))?;
        let store = TokenizerStore::new(&config.tokenizers);
        let tokenizer = store.load_or_build(&dirs, &config.dataset.common_params)?;

        if let Some(kind) = tokenizer_kind(tokenizer.as_ref()) {
            if kind != config.tokenizers.kind {
                tracing::warn!(
                    "Tokenizer stored at '{}' is {}, not the configured {}; using the stored one",
                    config.tokenizers.build_path.display(),
                    kind.as_str(),
                    config.tokenizer_type(),
                );
            }
        }

        let model_config = siamese_config(&config, tokenizer.vocab_size());
        let optim_config = AdamWConfig::new().with_weight_decay(config.training.weight_decay);
        let pairing = ModelAndAdamW::new(model_config, optim_config, config.training.lr, &device);

        tracing::info!(
            "Built context '{}' (tokenizer={}, vocab={}, experiment_tracking={})",
            config.training.name,
            config.tokenizer_type(),
            tokenizer.vocab_size(),
            config.training.experiment_tracking,
        );
        Ok(Self::assemble(config, tokenizer, pairing, device))
    }

    /// Restore a context saved with [`TrainingContext::save`].
    pub fn build_context_from_dir(path: &Path, device: B::Device) -> Result<Self> {
        if !path.is_dir() {
            tracing::error!("Nothing to restore from: '{}' does not exist", path.display());
            return Err(SiameseError::not_found(path, "saved training context (nothing to restore from)"));
        }

        let mut registry = RecordRegistry::new();
        registry.register_loadable::<ContextConfig>();
        register_tokenizers(&mut registry);
        let restore_device = device.clone();
        registry.register(MODEL_AND_ADAMW_TAG, move |dir| {
            Ok(Box::new(ModelAndAdamW::<B>::restore(dir, &restore_device)?) as Box<dyn std::any::Any>)
        });

        let mut records = RecordMapping::load(path, &registry)?;
        let config = records.take::<ContextConfig>(CONFIG_RECORD)?;
        let tokenizer = records.take::<Box<dyn TokenizerRecord>>(TOKENIZER_RECORD)?;
        let pairing = records.take::<ModelAndAdamW<B>>(MODEL_OPTIMIZER_RECORD)?;

        if pairing.model_config().vocab_size < tokenizer.vocab_size() {
            return Err(SiameseError::corrupt(
                path,
                "model sized for its tokenizer",
                format!(
                    "model has {} token embeddings, tokenizer has {} entries",
                    pairing.model_config().vocab_size,
                    tokenizer.vocab_size()
                ),
            ));
        }

        tracing::info!(
            "Restored context '{}' from '{}' (tokenizer={}, experiment_tracking={})",
            config.training.name,
            path.display(),
            config.tokenizer_type(),
            config.training.experiment_tracking,
        );
        Ok(Self::assemble(config, tokenizer, pairing, device))
    }

    fn assemble(
        config: ContextConfig,
        tokenizer: Box<dyn TokenizerRecord>,
        pairing: ModelAndAdamW<B>,
        device: B::Device,
    ) -> Self {
        Self { config, tokenizer, pairing, device, mode: Mode::Train, eval_model: None }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &dyn TokenizerRecord {
        self.tokenizer.as_ref()
    }

    /// Short tag of the tokenizer actually held, used in cache and
    /// output file names.
    pub fn tokenizer_type(&self) -> &'static str {
        tokenizer_kind(self.tokenizer.as_ref()).map_or_else(|| self.config.tokenizer_type(), |k| k.as_str())
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn pairing(&self) -> &ModelAndAdamW<B> {
        &self.pairing
    }

    /// Language id used for a language name, if it is configured.
    pub fn lang_id(&self, lang: &str) -> Option<u32> {
        self.config.dataset.common_params.lang_ids.get(lang).copied()
    }

    // ── Mode ──────────────────────────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn train_mode(&mut self) {
        self.mode = Mode::Train;
        self.eval_model = None;
    }

    pub fn eval_mode(&mut self) {
        self.mode = Mode::Eval;
        self.eval_model = Some(self.pairing.valid_model());
    }

    fn eval_model(&self) -> QueryCodeSiamese<B::InnerBackend> {
        match &self.eval_model {
            Some(m) => m.clone(),
            None => self.pairing.valid_model(),
        }
    }

    // ── Training ──────────────────────────────────────────────────────────────

    /// Average loss, per-sample losses and the raw query·code scores.
    pub fn forward(&self, batch: SiameseBatch<B>, batch_idx: usize) -> SiameseOutput<B> {
        let batch = batch.to_device(&self.device);
        tracing::trace!("forward batch {} ({} pairs, {:?})", batch_idx, batch.len(), self.mode);
        match self.mode {
            Mode::Train => self.pairing.model().forward(batch),
            Mode::Eval => {
                let inner = SiameseBatch::<B::InnerBackend> {
                    languages:    batch.languages.inner(),
                    similarity:   batch.similarity.inner(),
                    query_tokens: batch.query_tokens.inner(),
                    query_mask:   batch.query_mask.inner(),
                    code_tokens:  batch.code_tokens.inner(),
                    code_mask:    batch.code_mask.inner(),
                };
                let out = self.eval_model().forward(inner);
                SiameseOutput {
                    loss:       Tensor::from_inner(out.loss),
                    per_sample: Tensor::from_inner(out.per_sample),
                    scores:     Tensor::from_inner(out.scores),
                }
            }
        }
    }

    /// Backpropagate and apply one optimizer step. Train mode only.
    pub fn backward_optimize(&mut self, loss: Tensor<B, 1>) -> Result<Tensor<B, 1>> {
        if self.mode == Mode::Eval {
            return Err(SiameseError::Configuration(
                "backward_optimize called in eval mode; switch to train mode first".to_string(),
            ));
        }
        self.pairing.step(loss.clone());
        Ok(loss.detach())
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        self.pairing.zero_grad();
        Ok(())
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    pub fn encode_query(&self, batch: &EncodedBatch) -> Result<Vec<Vec<f32>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.check_batch(batch)?;
        match self.mode {
            Mode::Eval => {
                let (tokens, mask) = encoded_tensors::<B::InnerBackend>(batch, &self.device);
                tensor_rows(self.eval_model().encode_query(tokens, mask))
            }
            Mode::Train => {
                let (tokens, mask) = encoded_tensors::<B>(batch, &self.device);
                tensor_rows(self.pairing.model().encode_query(tokens, mask).inner())
            }
        }
    }

    /// `languages[i]` is the language id of row `i` of `batch`.
    pub fn encode_code(&self, languages: &[u32], batch: &EncodedBatch) -> Result<Vec<Vec<f32>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if languages.len() != batch.len() {
            return Err(SiameseError::Configuration(format!(
                "{} language ids for {} code sequences",
                languages.len(),
                batch.len()
            )));
        }
        self.check_batch(batch)?;
        let langs: Vec<i32> = languages.iter().map(|&l| l as i32).collect();
        match self.mode {
            Mode::Eval => {
                let (tokens, mask) = encoded_tensors::<B::InnerBackend>(batch, &self.device);
                let langs = Tensor::<B::InnerBackend, 1, Int>::from_ints(langs.as_slice(), &self.device);
                tensor_rows(self.eval_model().encode_code(langs, tokens, mask))
            }
            Mode::Train => {
                let (tokens, mask) = encoded_tensors::<B>(batch, &self.device);
                let langs = Tensor::<B, 1, Int>::from_ints(langs.as_slice(), &self.device);
                tensor_rows(self.pairing.model().encode_code(langs, tokens, mask).inner())
            }
        }
    }

    fn check_batch(&self, batch: &EncodedBatch) -> Result<()> {
        let vocab = self.pairing.model_config().vocab_size;
        if let Some(bad) = batch.ids.iter().flatten().find(|&&id| id as usize >= vocab) {
            return Err(SiameseError::Configuration(format!(
                "token id {bad} is outside the model's {vocab} embeddings; tokenizer and model do not match"
            )));
        }
        let max = self.pairing.model_config().max_seq_len;
        let widths: Vec<usize> = batch.ids.iter().map(Vec::len).collect();
        let first = widths[0];
        if widths.iter().any(|&w| w != first) {
            return Err(SiameseError::Configuration(
                "sequences in one batch must share a fixed length".to_string(),
            ));
        }
        if first > max || first == 0 {
            return Err(SiameseError::Configuration(format!(
                "sequence length {first} outside the encoder's range 1..={max}"
            )));
        }
        Ok(())
    }

    // ── Tokenization ──────────────────────────────────────────────────────────

    pub fn tokenize_query_sentences(&self, sentences: &[String], max_length: Option<usize>) -> Result<EncodedBatch> {
        self.tokenizer.encode_sentences(sentences, max_length)
    }

    pub fn tokenize_code_sentences(&self, sentences: &[String], max_length: Option<usize>) -> Result<EncodedBatch> {
        self.tokenizer.encode_sentences(sentences, max_length)
    }

    pub fn tokenize_code_tokens(&self, tokens: &[Vec<String>], max_length: Option<usize>) -> Result<EncodedBatch> {
        self.tokenizer.encode_tokens(tokens, max_length)
    }

    // ── Data ──────────────────────────────────────────────────────────────────

    /// Encoded dataset of one split, cached under the pickle path.
    pub fn build_lang_dataset(&self, split: DatasetSplit) -> Result<LangDataset> {
        let paths = self.config.split_paths(split);
        if paths.is_empty() {
            return Err(SiameseError::Configuration(format!("no data paths configured for split '{split}'")));
        }
        let dirs = expand_data_paths(paths)?;
        let params = &self.config.dataset.common_params;
        let pickle_path: PathBuf = self.config.training.pickle_path.clone();
        let spec = LangDatasetSpec {
            dirs:        &dirs,
            name:        format!("{}_{}", split, self.tokenizer_type()),
            params,
            tokenizer:   self.tokenizer.as_ref(),
            lang_token:  &params.lang_token,
            query_token: &params.query_token,
            pickle_path: &pickle_path,
            parallelize: params.parallelize,
        };
        LangDataset::build(&spec)
    }

    /// Train a fresh tokenizer from `from_split`, store it at the build
    /// path and make it the context's tokenizer.
    ///
    /// A tokenizer with more entries than the model has embeddings is
    /// still stored, so a new context can be built on it, but this
    /// context keeps its current tokenizer and a `Configuration` error
    /// is returned.
    pub fn build_tokenizers(&mut self, from_split: DatasetSplit) -> Result<()> {
        let dirs = expand_data_paths(self.config.split_paths(from_split))?;
        let store = TokenizerStore::new(&self.config.tokenizers);
        let tokenizer = store.build(&dirs, &self.config.dataset.common_params)?;
        let model_vocab = self.pairing.model_config().vocab_size;
        if tokenizer.vocab_size() > model_vocab {
            return Err(SiameseError::Configuration(format!(
                "new tokenizer has {} entries but the model embeds only {model_vocab}; \
                 it was stored at '{}', build a new context from it",
                tokenizer.vocab_size(),
                store.build_path().display(),
            )));
        }
        self.tokenizer = tokenizer;
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    pub fn save(&self, dir: &Path) -> Result<()> {
        RecordMapping::new()
            .with(CONFIG_RECORD, &self.config)
            .with(TOKENIZER_RECORD, self.tokenizer.as_record())
            .with(MODEL_OPTIMIZER_RECORD, &self.pairing)
            .save(dir)
    }
}

/// `[rows, dim]` tensor → one Vec per row.
fn tensor_rows<B: Backend>(t: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [rows, dim] = t.dims();
    let flat = t
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SiameseError::Tensor(format!("{e:?}")))?;
    if dim == 0 {
        return Ok(vec![Vec::new(); rows]);
    }
    Ok(flat.chunks(dim).map(<[f32]>::to_vec).collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::batcher::SiameseBatcher;
    use crate::data::corpus::tests::write_gz;
    use crate::domain::config::TokenizerKind;
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::Dataset;
    use serde_json::json;

    pub(crate) type TestBackend = Autodiff<NdArray>;

    /// Small corpus + config rooted in `root`.
    pub(crate) fn test_config(root: &Path) -> ContextConfig {
        let train = root.join("train").join("python");
        std::fs::create_dir_all(&train).unwrap();
        let words = ["add", "sum", "read", "file", "sort", "list", "parse", "json"];
        let mut lines = Vec::new();
        for (i, w) in words.iter().enumerate() {
            let other = words[(i + 3) % words.len()];
            lines.push(json!({
                "code_tokens": ["def", w, "(", "x", ")", ":", "return", other, "(", "x", ")"],
                "docstring_tokens": [w, "the", other, "values"],
                "identifier": format!("{w}_{other}"),
                "url": format!("https://example.com/{i}"),
            }));
        }
        write_gz(&train.join("0.jsonl.gz"), &lines);

        let mut cfg = ContextConfig::default();
        cfg.dataset.root_dir = root.to_path_buf();
        cfg.dataset.train_paths = vec![train];
        cfg.dataset.val_paths = Vec::new();
        cfg.dataset.test_paths = Vec::new();
        cfg.dataset.common_params.vocab_size = 80;
        cfg.dataset.common_params.vocab_count_threshold = 1;
        cfg.dataset.common_params.code_max_num_tokens = 16;
        cfg.dataset.common_params.query_max_num_tokens = 8;
        cfg.dataset.common_params.parallelize = false;
        cfg.tokenizers.kind = TokenizerKind::BpeVocabulary;
        cfg.tokenizers.build_path = root.join("tokenizer");
        cfg.tokenizers.token_files = root.join("token_files");
        cfg.training.pickle_path = root.join("pickles");
        cfg.training.output_dir = root.join("out");
        cfg.training.batch_size = 4;
        cfg.training.epochs = 1;
        cfg.training.lr = 1e-3;
        cfg.model.d_model = 16;
        cfg.model.num_heads = 2;
        cfg.model.num_layers = 1;
        cfg.model.d_ff = 32;
        cfg.model.dropout = 0.0;
        cfg.model.embedding_dim = 8;
        cfg
    }

    fn queries(ctx: &TrainingContext<TestBackend>) -> EncodedBatch {
        let q = vec!["<qy> add the values".to_string(), "<qy> parse json".to_string()];
        ctx.tokenize_query_sentences(&q, Some(8)).unwrap()
    }

    #[test]
    fn test_save_restore_gives_identical_embeddings() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), device).unwrap();
        ctx.eval_mode();
        let before = ctx.encode_query(&queries(&ctx)).unwrap();

        let saved = tmp.path().join("saved");
        ctx.save(&saved).unwrap();
        let mut restored = TrainingContext::<TestBackend>::build_context_from_dir(&saved, Default::default()).unwrap();
        restored.eval_mode();
        let after = restored.encode_query(&queries(&restored)).unwrap();

        assert_eq!(before, after);
        assert_eq!(restored.config(), ctx.config());
        assert_eq!(restored.tokenizer().vocab_size(), ctx.tokenizer().vocab_size());
    }

    #[test]
    fn test_restore_missing_dir_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let res = TrainingContext::<TestBackend>::build_context_from_dir(&tmp.path().join("none"), Default::default());
        assert!(matches!(res, Err(SiameseError::NotFound { .. })));
    }

    #[test]
    fn test_restore_with_corrupt_entry_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        let saved = tmp.path().join("saved");
        ctx.save(&saved).unwrap();
        let vocab = saved
            .join(TOKENIZER_RECORD)
            .join("query_code_siamese.tokenizer.BpeVocabularyTokenizer")
            .join("vocab.json");
        std::fs::write(&vocab, "{ not json").unwrap();
        let res = TrainingContext::<TestBackend>::build_context_from_dir(&saved, Default::default());
        assert!(matches!(res, Err(SiameseError::CorruptArtifact { .. })));
    }

    #[test]
    fn test_backward_in_eval_mode_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        let ds = ctx.build_lang_dataset(DatasetSplit::Train).unwrap();
        let items: Vec<_> = (0..ds.len().min(4)).filter_map(|i| ds.get(i)).collect();
        let batch = SiameseBatcher::<TestBackend>::new(Default::default()).batch(items);

        ctx.eval_mode();
        let out = ctx.forward(batch.clone(), 0);
        assert_eq!(out.scores.dims(), [4, 4]);
        assert!(matches!(ctx.backward_optimize(out.loss), Err(SiameseError::Configuration(_))));

        ctx.train_mode();
        ctx.zero_grad().unwrap();
        let out = ctx.forward(batch, 0);
        assert!(ctx.backward_optimize(out.loss).is_ok());
    }

    #[test]
    fn test_training_step_changes_embeddings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        ctx.eval_mode();
        let before = ctx.encode_query(&queries(&ctx)).unwrap();

        let ds = ctx.build_lang_dataset(DatasetSplit::Train).unwrap();
        let items: Vec<_> = (0..ds.len()).filter_map(|i| ds.get(i)).collect();
        let batch = SiameseBatcher::<TestBackend>::new(Default::default()).batch(items);
        ctx.train_mode();
        let out = ctx.forward(batch, 0);
        ctx.backward_optimize(out.loss).unwrap();

        ctx.eval_mode();
        assert_ne!(before, ctx.encode_query(&queries(&ctx)).unwrap());
    }

    #[test]
    fn test_encode_code_checks_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        ctx.eval_mode();
        let code = vec![vec!["python".to_string(), "<lg>".to_string(), "def".to_string(), "add".to_string()]];
        let batch = ctx.tokenize_code_tokens(&code, Some(16)).unwrap();
        assert_eq!(ctx.encode_code(&[0], &batch).unwrap()[0].len(), 8);
        assert!(ctx.encode_code(&[0, 1], &batch).is_err());
        let too_long = ctx.tokenize_code_tokens(&code, Some(40)).unwrap();
        assert!(ctx.encode_code(&[0], &too_long).is_err());

        let sentences = vec!["python <lg> def add ( x )".to_string()];
        let from_text = ctx.tokenize_code_sentences(&sentences, Some(16)).unwrap();
        assert_eq!(from_text.ids[0].len(), 16);
        assert_eq!(ctx.encode_code(&[0], &from_text).unwrap().len(), 1);
    }

    #[test]
    fn test_build_lang_dataset_for_unconfigured_split() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        assert!(matches!(ctx.build_lang_dataset(DatasetSplit::Val), Err(SiameseError::Configuration(_))));
        let cache = tmp.path().join("pickles");
        ctx.build_lang_dataset(DatasetSplit::Train).unwrap();
        assert!(cache.join("train_bpe_vocabulary_samples.json").is_file());
    }

    #[test]
    fn test_oversized_tokenizer_is_not_swapped_in() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = test_config(tmp.path());
        let val = tmp.path().join("val").join("python");
        std::fs::create_dir_all(&val).unwrap();
        let lines: Vec<_> = (0..200)
            .map(|i| json!({
                "code_tokens": [format!("fn{i}"), "(", format!("arg{i}"), ")"],
                "docstring_tokens": [format!("word{i}"), format!("term{i}"), "value"],
                "identifier": format!("fn{i}"),
                "url": format!("https://example.com/v/{i}"),
            }))
            .collect();
        write_gz(&val.join("0.jsonl.gz"), &lines);
        cfg.dataset.val_paths = vec![val];

        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(cfg, Default::default()).unwrap();
        let model_vocab = ctx.pairing().model_config().vocab_size;
        let old_vocab = ctx.tokenizer().vocab_size();

        let res = ctx.build_tokenizers(DatasetSplit::Val);
        assert!(matches!(res, Err(SiameseError::Configuration(_))));
        assert_eq!(ctx.tokenizer().vocab_size(), old_vocab);
        assert!(ctx.tokenizer().vocab_size() <= model_vocab);

        ctx.eval_mode();
        assert_eq!(ctx.encode_query(&queries(&ctx)).unwrap().len(), 2);
    }

    #[test]
    fn test_out_of_range_token_id_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        let vocab = ctx.pairing().model_config().vocab_size as u32;
        let batch: EncodedBatch = std::iter::once(crate::tokenizer::EncodedSequence {
            ids:  vec![2, vocab, 3, 0],
            mask: vec![1, 1, 1, 0],
        })
        .collect();

        ctx.eval_mode();
        assert!(matches!(ctx.encode_query(&batch), Err(SiameseError::Configuration(_))));
        assert!(matches!(ctx.encode_code(&[0], &batch), Err(SiameseError::Configuration(_))));
        ctx.train_mode();
        assert!(matches!(ctx.encode_query(&batch), Err(SiameseError::Configuration(_))));
    }

    #[test]
    fn test_tokenizer_type_follows_the_stored_tokenizer() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = test_config(tmp.path());
        TrainingContext::<TestBackend>::build_context_from_config(cfg.clone(), Default::default()).unwrap();

        cfg.tokenizers.kind = TokenizerKind::HuggingfaceBpe;
        let ctx = TrainingContext::<TestBackend>::build_context_from_config(cfg, Default::default()).unwrap();
        assert_eq!(ctx.tokenizer_type(), "bpe_vocabulary");
        let ds = ctx.build_lang_dataset(DatasetSplit::Train).unwrap();
        assert_eq!(ds.name(), "train_bpe_vocabulary");
    }
}

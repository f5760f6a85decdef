// ============================================================
// Layer 3: Context Configuration
// ============================================================
// Everything a training context is built from, grouped the
// way the JSON file is laid out:
//
//   dataset      → where the corpus lives + tokenization params
//   tokenizers   → which tokenizer, where it is built
//   training     → device, optimiser, batch and output paths
//   model        → encoder hyper-parameters
//   predictions  → retrieval settings
//
// Every section implements Default and is tagged
// #[serde(default)], so a config file only needs the keys
// that differ from the defaults.
//
// The config travels with the saved context (as the "config"
// record), so a restored context re-derives its data roots
// and tokenizer type from exactly what it was trained with.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::split::DatasetSplit;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub dataset:     DatasetConfig,
    pub tokenizers:  TokenizersConfig,
    pub training:    TrainingConfig,
    pub model:       ModelConfig,
    pub predictions: PredictionsConfig,
}

impl ContextConfig {
    /// Directories (or manifest files listing directories) for a split.
    pub fn split_paths(&self, split: DatasetSplit) -> &[PathBuf] {
        match split {
            DatasetSplit::Train => &self.dataset.train_paths,
            DatasetSplit::Val   => &self.dataset.val_paths,
            DatasetSplit::Test  => &self.dataset.test_paths,
        }
    }

    /// Short tag used in cache and output file names.
    pub fn tokenizer_type(&self) -> &'static str {
        self.tokenizers.kind.as_str()
    }
}

// ─── Dataset ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Root holding `data/<lang>_dedupe_definitions_v2.jsonl(.gz)`
    pub root_dir:      PathBuf,
    pub train_paths:   Vec<PathBuf>,
    pub val_paths:     Vec<PathBuf>,
    pub test_paths:    Vec<PathBuf>,
    pub common_params: DatasetParams,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root_dir:      PathBuf::from("resources"),
            train_paths:   vec![PathBuf::from("resources/data_dirs_train.txt")],
            val_paths:     vec![PathBuf::from("resources/data_dirs_valid.txt")],
            test_paths:    vec![PathBuf::from("resources/data_dirs_test.txt")],
            common_params: DatasetParams::default(),
        }
    }
}

/// Tokenization and vocabulary parameters shared by every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetParams {
    pub vocab_size:            usize,
    /// Minimum count for a whole word to enter the vocabulary
    pub vocab_count_threshold: u64,
    pub use_bpe:               bool,
    /// Share of `vocab_size` reserved for byte-pair subwords
    pub pct_bpe:               f64,
    pub do_lowercase:          bool,
    pub special_tokens:        Vec<String>,
    pub code_max_num_tokens:   usize,
    pub query_max_num_tokens:  usize,
    /// Split camelCase / snake_case identifiers while counting
    pub use_subtokens:         bool,
    pub mark_subtoken_end:     bool,
    pub max_files_per_dir:     Option<usize>,
    pub parallelize:           bool,
    /// Records whose docstring is shorter than this are skipped
    pub min_query_tokens:      usize,
    pub lang_token:            String,
    pub query_token:           String,
    pub lang_ids:              BTreeMap<String, u32>,
}

impl Default for DatasetParams {
    fn default() -> Self {
        let lang_ids = crate::domain::definition::KNOWN_LANGUAGES
            .iter()
            .enumerate()
            .map(|(i, l)| (l.to_string(), i as u32))
            .collect();
        Self {
            vocab_size:            10_000,
            vocab_count_threshold: 10,
            use_bpe:               true,
            pct_bpe:               0.5,
            do_lowercase:          true,
            special_tokens:        vec![
                "<pad>".to_string(),
                "<unk>".to_string(),
                "<lg>".to_string(),
                "<qy>".to_string(),
            ],
            code_max_num_tokens:   200,
            query_max_num_tokens:  30,
            use_subtokens:         false,
            mark_subtoken_end:     false,
            max_files_per_dir:     None,
            parallelize:           true,
            min_query_tokens:      3,
            lang_token:            "<lg>".to_string(),
            query_token:           "<qy>".to_string(),
            lang_ids,
        }
    }
}

// ─── Tokenizers ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    HuggingfaceBpe,
    BpeVocabulary,
}

impl TokenizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerKind::HuggingfaceBpe => "huggingface_bpe",
            TokenizerKind::BpeVocabulary  => "bpe_vocabulary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizersConfig {
    pub kind:        TokenizerKind,
    /// Where the trained tokenizer mapping is stored
    pub build_path:  PathBuf,
    /// Where formatted training samples are written before training
    pub token_files: PathBuf,
}

impl Default for TokenizersConfig {
    fn default() -> Self {
        Self {
            kind:        TokenizerKind::HuggingfaceBpe,
            build_path:  PathBuf::from("checkpoints/tokenizers/query_code_siamese"),
            token_files: PathBuf::from("checkpoints/tokenizers/query_code_siamese/token_files"),
        }
    }
}

// ─── Training ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Wgpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub name:                String,
    pub device:              DeviceKind,
    pub lr:                  f64,
    pub weight_decay:        f32,
    pub batch_size:          usize,
    pub epochs:              usize,
    pub seed:                u64,
    /// Used only when no validation directories are configured
    pub train_fraction:      f64,
    /// Encoded sample caches and embedding caches
    pub pickle_path:         PathBuf,
    /// Saved contexts, metrics and predictions
    pub output_dir:          PathBuf,
    /// Off means runs are only logged locally
    pub experiment_tracking: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            name:                "query_code_siamese".to_string(),
            device:              DeviceKind::Cpu,
            lr:                  1e-4,
            weight_decay:        0.01,
            batch_size:          32,
            epochs:              10,
            seed:                42,
            train_fraction:      0.9,
            pickle_path:         PathBuf::from("pickles"),
            output_dir:          PathBuf::from("checkpoints"),
            experiment_tracking: false,
        }
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    pub dropout:       f64,
    pub embedding_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            d_model:       128,
            num_heads:     4,
            num_layers:    3,
            d_ff:          512,
            dropout:       0.1,
            embedding_dim: 128,
        }
    }
}

// ─── Predictions ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionsConfig {
    /// CSV with a `query` column
    pub queries_file: PathBuf,
    pub top_k:        usize,
    /// Definitions encoded per forward pass
    pub batch_length: usize,
    pub languages:    Vec<String>,
}

impl Default for PredictionsConfig {
    fn default() -> Self {
        Self {
            queries_file: PathBuf::from("resources/queries.csv"),
            top_k:        100,
            batch_length: 1024,
            languages:    vec!["python".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: ContextConfig = serde_json::from_str(
            r#"{"training": {"device": "wgpu", "lr": 0.001}, "tokenizers": {"kind": "bpe_vocabulary"}}"#,
        ).unwrap();
        assert_eq!(cfg.training.device, DeviceKind::Wgpu);
        assert_eq!(cfg.training.batch_size, 32);
        assert_eq!(cfg.tokenizer_type(), "bpe_vocabulary");
        assert_eq!(cfg.predictions.top_k, 100);
        assert_eq!(cfg.predictions.batch_length, 1024);
    }

    #[test]
    fn test_default_lang_ids_are_dense() {
        let p = DatasetParams::default();
        let mut ids: Vec<u32> = p.lang_ids.values().copied().collect();
        ids.sort();
        assert_eq!(ids, (0..p.lang_ids.len() as u32).collect::<Vec<_>>());
    }
}

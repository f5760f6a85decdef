// ============================================================
// Layer 2: Tokenizer Use Cases
// ============================================================
// Vocabulary work that runs ahead of training:
//
//   build-tokenizers   → train the context tokenizer from one
//                        split and store it at
//                        tokenizers.build_path; optionally also
//                        the per-language query/code vocabularies
//   most-common-tokens → top-k code tokens per language, stored
//                        under <pickle_path>/most_common_tokens

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::data::corpus::expand_data_paths;
use crate::domain::config::ContextConfig;
use crate::domain::split::DatasetSplit;
use crate::infra::record::CommonTokensRecord;
use crate::infra::tokenizer_store::TokenizerStore;
use crate::tokenizer::metadata::{build_most_common_tokens, build_or_load_original_tokenizers};

pub struct TokenizersUseCase {
    config: ContextConfig,
}

impl TokenizersUseCase {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    fn split_dirs(&self, split: DatasetSplit) -> Result<Vec<PathBuf>> {
        let paths = self.config.split_paths(split);
        if paths.is_empty() {
            bail!("No data paths configured for split '{split}'");
        }
        expand_data_paths(paths).with_context(|| format!("Cannot resolve the '{split}' data paths"))
    }

    /// Where the per-language vocabularies go: a sibling of the
    /// context tokenizer's build path.
    pub fn per_language_path(&self) -> PathBuf {
        let build = &self.config.tokenizers.build_path;
        let mut name = build.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push("_per_language");
        build.with_file_name(name)
    }

    /// Train and store the context tokenizer. Returns its vocabulary size.
    pub fn build_tokenizers(&self, split: DatasetSplit, per_language: bool) -> Result<usize> {
        let dirs = self.split_dirs(split)?;
        let params = &self.config.dataset.common_params;

        let store = TokenizerStore::new(&self.config.tokenizers);
        let tokenizer = store
            .build(&dirs, params)
            .with_context(|| format!("Cannot build {} tokenizer", self.config.tokenizer_type()))?;
        tracing::info!(
            "Stored {} tokenizer ({} entries) at '{}'",
            self.config.tokenizer_type(),
            tokenizer.vocab_size(),
            store.build_path().display()
        );

        if per_language {
            let path = self.per_language_path();
            let original = build_or_load_original_tokenizers(&dirs, params, &path, true)
                .context("Cannot build per-language tokenizers")?;
            tracing::info!(
                "Stored query tokenizer and {} code tokenizers at '{}'",
                original.code.len(),
                path.display()
            );
        }
        Ok(tokenizer.vocab_size())
    }

    pub fn most_common_tokens(&self, k: usize) -> Result<CommonTokensRecord> {
        let dirs = self.split_dirs(DatasetSplit::Train)?;
        let out = self.config.training.pickle_path.join("most_common_tokens");
        let common = build_most_common_tokens(&dirs, &self.config.dataset.common_params, &out, k)
            .context("Cannot count the most common tokens")?;
        let sizes: BTreeMap<&str, usize> = common.tokens.iter().map(|(l, t)| (l.as_str(), t.len())).collect();
        tracing::info!("Most common tokens stored at '{}': {:?}", out.display(), sizes);
        Ok(common)
    }
}

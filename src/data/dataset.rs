// ============================================================
// Layer 4: Siamese Language Dataset
// ============================================================
// Turns corpus records into encoded (query, code) pairs and
// serves them through burn's Dataset trait.
//
// Per record:
//   query → "<qy> " + docstring tokens, fixed to
//           query_max_num_tokens
//   code  → [language, "<lg>", code tokens...], fixed to
//           code_max_num_tokens
//   similarity label 1.0; in-batch pairs act as negatives
//
// Records whose docstring is shorter than min_query_tokens
// are skipped.
//
// Encoded samples are cached as JSON under pickle_path, named
// after the split and tokenizer type. The cache is written to
// a temporary file first and renamed, so an interrupted run
// never leaves a truncated cache behind.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::corpus::{list_corpus_files, read_corpus_file};
use crate::domain::config::DatasetParams;
use crate::domain::error::Result;
use crate::infra::record::{read_json, write_json};
use crate::tokenizer::TokenizerRecord;

/// One fully tokenised and padded training pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiameseSample {
    pub language:   u32,
    pub similarity: f32,
    pub query_ids:  Vec<u32>,
    pub query_mask: Vec<u32>,
    pub code_ids:   Vec<u32>,
    pub code_mask:  Vec<u32>,
}

/// Everything needed to encode one split.
pub struct LangDatasetSpec<'a> {
    pub dirs:        &'a [PathBuf],
    /// Cache name, e.g. "train_huggingface_bpe"
    pub name:        String,
    pub params:      &'a DatasetParams,
    pub tokenizer:   &'a dyn TokenizerRecord,
    pub lang_token:  &'a str,
    pub query_token: &'a str,
    pub pickle_path: &'a Path,
    pub parallelize: bool,
}

pub struct LangDataset {
    name:    String,
    samples: Vec<SiameseSample>,
}

impl LangDataset {
    pub fn new(name: impl Into<String>, samples: Vec<SiameseSample>) -> Self {
        Self { name: name.into(), samples }
    }

    /// Load the cached encoding of this split or build and cache it.
    pub fn build(spec: &LangDatasetSpec<'_>) -> Result<Self> {
        let cache = spec.pickle_path.join(format!("{}_samples.json", spec.name));
        if cache.is_file() {
            tracing::info!("Loading cached dataset '{}' from '{}'", spec.name, cache.display());
            let samples: Vec<SiameseSample> = read_json(&cache, "encoded dataset cache")?;
            return Ok(Self::new(spec.name.clone(), samples));
        }

        let files: Vec<(PathBuf, PathBuf)> = spec
            .dirs
            .iter()
            .map(|d| Ok(list_corpus_files(d, spec.params.max_files_per_dir)?
                .into_iter()
                .map(|f| (d.clone(), f))
                .collect::<Vec<_>>()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        tracing::info!(
            "Encoding dataset '{}' from {} files (parallel={})",
            spec.name,
            files.len(),
            spec.parallelize,
        );
        let per_file: Vec<Vec<SiameseSample>> = if spec.parallelize {
            files.par_iter().map(|(dir, f)| encode_file(spec, dir, f)).collect::<Result<_>>()?
        } else {
            files.iter().map(|(dir, f)| encode_file(spec, dir, f)).collect::<Result<_>>()?
        };
        let samples: Vec<SiameseSample> = per_file.into_iter().flatten().collect();

        write_json(&cache, &samples)?;
        tracing::info!("Dataset '{}': {} samples cached to '{}'", spec.name, samples.len(), cache.display());
        Ok(Self::new(spec.name.clone(), samples))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn into_samples(self) -> Vec<SiameseSample> {
        self.samples
    }
}

fn encode_file(spec: &LangDatasetSpec<'_>, dir: &Path, file: &Path) -> Result<Vec<SiameseSample>> {
    let p = spec.params;
    let records = read_corpus_file(file)?;
    let mut out = Vec::with_capacity(records.len());

    for rec in records {
        if rec.docstring_tokens.len() < p.min_query_tokens || rec.code_tokens.is_empty() {
            continue;
        }
        let lang = rec.language_or_infer(dir);
        let Some(&language) = p.lang_ids.get(&lang) else {
            tracing::debug!("Skipping record in unsupported language '{}'", lang);
            continue;
        };

        let query = format!("{} {}", spec.query_token, rec.docstring_tokens.join(" "));
        let q = spec.tokenizer.encode_sentence(&query, Some(p.query_max_num_tokens))?;

        let mut code_tokens = Vec::with_capacity(rec.code_tokens.len() + 2);
        code_tokens.push(lang.clone());
        code_tokens.push(spec.lang_token.to_string());
        code_tokens.extend(rec.code_tokens);
        let c = spec
            .tokenizer
            .encode_tokens(std::slice::from_ref(&code_tokens), Some(p.code_max_num_tokens))?;

        out.push(SiameseSample {
            language,
            similarity: 1.0,
            query_ids:  q.ids,
            query_mask: q.mask,
            code_ids:   c.ids.into_iter().next().unwrap_or_default(),
            code_mask:  c.masks.into_iter().next().unwrap_or_default(),
        });
    }
    Ok(out)
}

impl Dataset<SiameseSample> for LangDataset {
    fn get(&self, index: usize) -> Option<SiameseSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

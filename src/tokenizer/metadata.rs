// ============================================================
// Layer 4b: Metadata / Vocabulary Builder
// ============================================================
// Counts tokens per language (and for queries) across corpus
// directories, then turns the counts into vocabularies.
//
//   Step 1: one CorpusMetadata per directory, computed in
//           parallel with rayon when `parallelize` is set
//   Step 2: merge the shards (sum of counts, so any shard
//           order gives the same result)
//   Step 3: derive what was asked for
//             - most common tokens per language, or
//             - one query tokenizer + one code tokenizer per
//               language (the per-language layout)
//
// A directory may hold several languages; each record's own
// `language` field wins over the one inferred from its path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::data::corpus::{list_corpus_files, read_corpus_file};
use crate::data::preprocessor::Preprocessor;
use crate::domain::config::DatasetParams;
use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::Recordable;
use crate::infra::record::{CommonTokensRecord, RecordMapping, RecordRegistry};
use crate::tokenizer::bpe_vocab::{BpeVocabParams, BpeVocabularyTokenizer};
use crate::tokenizer::vocabulary::TokenCounter;
use crate::tokenizer::TokenizerRecord;

pub const QUERY_TOKENIZER: &str = "query_tokenizer";
const CODE_TOKENIZER_PREFIX: &str = "code_tokenizer_";

// ─── CorpusMetadata ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusMetadata {
    pub query: TokenCounter,
    pub code:  BTreeMap<String, TokenCounter>,
}

impl CorpusMetadata {
    pub fn merge(&mut self, other: &CorpusMetadata) {
        self.query.merge(&other.query);
        for (lang, counter) in &other.code {
            self.code.entry(lang.clone()).or_default().merge(counter);
        }
    }
}

/// Count one corpus directory.
pub fn collect_dir_metadata(dir: &Path, params: &DatasetParams) -> Result<CorpusMetadata> {
    let pre = Preprocessor::new();
    let norm = |t: &str| if params.do_lowercase { t.to_lowercase() } else { t.to_string() };
    let mut meta = CorpusMetadata::default();

    for file in list_corpus_files(dir, params.max_files_per_dir)? {
        for rec in read_corpus_file(&file)? {
            let lang = rec.language_or_infer(dir);
            let counter = meta.code.entry(lang).or_default();
            for token in &rec.code_tokens {
                if params.use_subtokens {
                    for sub in pre.split_subtokens(token, params.mark_subtoken_end) {
                        counter.add(&norm(&sub));
                    }
                } else {
                    counter.add(&norm(token));
                }
            }
            for token in &rec.docstring_tokens {
                meta.query.add(&norm(token));
            }
        }
    }

    tracing::debug!(
        "Metadata for '{}': {} query tokens, {} languages",
        dir.display(),
        meta.query.len(),
        meta.code.len(),
    );
    Ok(meta)
}

/// Per-directory metadata, in directory order.
pub fn build_tokenizer_metadata(dirs: &[PathBuf], params: &DatasetParams) -> Result<Vec<CorpusMetadata>> {
    tracing::info!("Build metadata for {} directories (parallel={})", dirs.len(), params.parallelize);
    if params.parallelize {
        dirs.par_iter().map(|d| collect_dir_metadata(d, params)).collect()
    } else {
        dirs.iter().map(|d| collect_dir_metadata(d, params)).collect()
    }
}

/// Reduce shards into one. An empty list means there is nothing to
/// build a vocabulary from.
pub fn merge_metadata(shards: &[CorpusMetadata]) -> Result<CorpusMetadata> {
    if shards.is_empty() {
        return Err(SiameseError::EmptyCorpus(
            "can't build tokenizers from an empty metadata list".to_string(),
        ));
    }
    let mut merged = CorpusMetadata::default();
    for shard in shards {
        merged.merge(shard);
    }
    Ok(merged)
}

// ─── Most common tokens ───────────────────────────────────────────────────────
pub fn most_common_tokens(meta: &CorpusMetadata, k: usize) -> CommonTokensRecord {
    let tokens = meta
        .code
        .iter()
        .map(|(lang, counter)| (lang.clone(), counter.most_common(k)))
        .collect();
    CommonTokensRecord { tokens }
}

/// Count the corpus, keep the top `k` code tokens per language and
/// store them under `build_path` as the "common_tokens" record.
pub fn build_most_common_tokens(
    dirs: &[PathBuf],
    params: &DatasetParams,
    build_path: &Path,
    k: usize,
) -> Result<CommonTokensRecord> {
    let started = std::time::Instant::now();
    let meta = merge_metadata(&build_tokenizer_metadata(dirs, params)?)?;
    let common = most_common_tokens(&meta, k);
    RecordMapping::new().with("common_tokens", &common).save(build_path)?;
    tracing::info!("Most common tokens took {:.1?}", started.elapsed());
    Ok(common)
}

// ─── Per-language tokenizers ──────────────────────────────────────────────────
/// One query tokenizer and one code tokenizer per language.
#[derive(Debug, Clone)]
pub struct OriginalTokenizers {
    pub query: BpeVocabularyTokenizer,
    pub code:  BTreeMap<String, BpeVocabularyTokenizer>,
}

/// Build per-language tokenizers. An entry in `defaults` ("query" or a
/// language name) is reused instead of trained.
pub fn build_original_tokenizers(
    dirs: &[PathBuf],
    params: &DatasetParams,
    defaults: &BTreeMap<String, BpeVocabularyTokenizer>,
) -> Result<OriginalTokenizers> {
    let started = std::time::Instant::now();
    let meta = merge_metadata(&build_tokenizer_metadata(dirs, params)?)?;
    let vocab_params = BpeVocabParams::from(params);

    let query = match defaults.get("query") {
        Some(t) => {
            tracing::info!("Using pretrained query tokenizer");
            t.clone()
        }
        None => BpeVocabularyTokenizer::from_counter(&meta.query, &vocab_params),
    };

    let mut code = BTreeMap::new();
    for (lang, counter) in &meta.code {
        let tok = match defaults.get(lang) {
            Some(t) => {
                tracing::info!("Using pretrained tokenizer for {}", lang);
                t.clone()
            }
            None => {
                tracing::info!("Build vocabulary for {}", lang);
                BpeVocabularyTokenizer::from_counter(counter, &vocab_params)
            }
        };
        code.insert(lang.clone(), tok);
    }

    tracing::info!("Tokenizer building took {:.1?}", started.elapsed());
    Ok(OriginalTokenizers { query, code })
}

/// Reuse tokenizers stored under `build_path` unless `force` is set or
/// none are stored yet; otherwise build and store them.
pub fn build_or_load_original_tokenizers(
    dirs: &[PathBuf],
    params: &DatasetParams,
    build_path: &Path,
    force: bool,
) -> Result<OriginalTokenizers> {
    let tokenizers = if build_path.exists() && !force {
        tracing::info!("Loading tokenizers from '{}'", build_path.display());
        load_original_tokenizers(build_path)?
    } else {
        let built = build_original_tokenizers(dirs, params, &BTreeMap::new())?;
        save_original_tokenizers(&built, build_path)?;
        built
    };

    let txt = "this is a docstring";
    let encoded = tokenizers.query.encode_sentence(txt, None)?;
    let decoded = tokenizers.query.decode_sequence(&encoded.ids)?;
    tracing::debug!("Query tokenizer sanity check: '{}' → {:?} → '{}'", txt, encoded.ids, decoded);
    if decoded != txt {
        tracing::warn!("Query tokenizer does not round-trip '{}' (got '{}')", txt, decoded);
    }
    Ok(tokenizers)
}

fn save_original_tokenizers(t: &OriginalTokenizers, build_path: &Path) -> Result<()> {
    let names: Vec<(String, &BpeVocabularyTokenizer)> = t
        .code
        .iter()
        .map(|(lang, tok)| (format!("{CODE_TOKENIZER_PREFIX}{lang}"), tok))
        .collect();
    let mut mapping = RecordMapping::new().with(QUERY_TOKENIZER, &t.query as &dyn Recordable);
    for (name, tok) in &names {
        mapping = mapping.with(name.clone(), *tok as &dyn Recordable);
    }
    mapping.save(build_path)
}

fn load_original_tokenizers(build_path: &Path) -> Result<OriginalTokenizers> {
    let mut registry = RecordRegistry::new();
    registry.register_loadable::<BpeVocabularyTokenizer>();
    let mut restored = RecordMapping::load(build_path, &registry)?;

    let langs: Vec<String> = restored
        .names()
        .into_iter()
        .filter_map(|n| n.strip_prefix(CODE_TOKENIZER_PREFIX).map(str::to_string))
        .collect();
    let query = restored.take(QUERY_TOKENIZER)?;
    let mut code = BTreeMap::new();
    for lang in langs {
        let tok = restored.take(&format!("{CODE_TOKENIZER_PREFIX}{lang}"))?;
        code.insert(lang, tok);
    }
    Ok(OriginalTokenizers { query, code })
}

// ─── Sample formatting ────────────────────────────────────────────────────────
/// One line of tokenizer training text.
///   code  → "<lang> <lg> tok tok ...\r\n"
///   query → "<qy> tok tok ...\r\n"
pub fn format_sample(domain: &str, lang: &str, tokens: &[String], params: &DatasetParams) -> Result<String> {
    match domain {
        "code" => Ok(format!("{} {} {}\r\n", lang, params.lang_token, tokens.join(" "))),
        "query" => Ok(format!("{} {}\r\n", params.query_token, tokens.join(" "))),
        other => Err(SiameseError::Configuration(format!(
            "sample domain must be 'code' or 'query', got '{other}'"
        ))),
    }
}

// ============================================================
// Layer 2: PredictUseCase
// ============================================================
// Retrieval over a restored context:
//
//   Step 1: Restore the context and switch it to eval mode
//   Step 2: Embed every query ("<qy> " + text)
//   Step 3: Per language
//             a. read <root>/data/<lang>_dedupe_definitions_v2
//             b. load the cached code embeddings, or compute
//                them batch_length definitions at a time and
//                cache them
//             c. build an angular index over them
//             d. top-k neighbours for every query
//   Step 4: Write <output_dir>/predictions_<tokenizer_type>.csv
//
// Rows come out language by language, then query by query,
// then nearest neighbour first.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::backend::{wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;

use crate::data::corpus::{find_corpus_file, read_corpus_file};
use crate::domain::config::{ContextConfig, DeviceKind};
use crate::domain::definition::CorpusRecord;
use crate::domain::prediction::PredictionRecord;
use crate::domain::traits::LoadRecord;
use crate::infra::embedding_cache::EmbeddingCache;
use crate::infra::table::{read_queries, write_predictions};
use crate::ml::context::{TrainingContext, CONFIG_RECORD};
use crate::ml::index::{HnswAngularIndex, NeighborIndex};

pub struct PredictUseCase {
    restore: PathBuf,
}

impl PredictUseCase {
    pub fn new(restore: PathBuf) -> Self {
        Self { restore }
    }

    /// Run retrieval and return the path of the predictions file.
    pub fn execute(&self) -> Result<PathBuf> {
        match saved_device(&self.restore) {
            DeviceKind::Cpu  => self.run::<Autodiff<NdArray>>(Default::default()),
            DeviceKind::Wgpu => self.run::<Autodiff<Wgpu>>(WgpuDevice::default()),
        }
    }

    fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<PathBuf> {
        // ── Step 1: Restore ───────────────────────────────────────────────────
        let mut ctx = TrainingContext::<B>::build_context_from_dir(&self.restore, device)
            .with_context(|| format!("Cannot restore training context from '{}'", self.restore.display()))?;
        ctx.eval_mode();
        let cfg = ctx.config().clone();
        let tokenizer_type = ctx.tokenizer_type();
        let batch_length = cfg.predictions.batch_length.max(1);

        // ── Step 2: Queries ───────────────────────────────────────────────────
        let queries = read_queries(&cfg.predictions.queries_file)
            .with_context(|| format!("Cannot read queries from '{}'", cfg.predictions.queries_file.display()))?;
        tracing::info!("Embedding {} queries", queries.len());
        let query_embeddings = compute_query_embeddings(&ctx, &queries, batch_length)?;

        // ── Step 3: Per-language retrieval ────────────────────────────────────
        let cache = EmbeddingCache::new(&cfg.training.pickle_path);
        let mut predictions = Vec::new();
        for language in &cfg.predictions.languages {
            let definitions = read_definitions(&cfg, language)?;
            tracing::info!("{}: {} definitions", language, definitions.len());

            let code_embeddings = match cache.load(language, tokenizer_type)? {
                Some(cached) => {
                    if cached.len() != definitions.len() {
                        bail!(
                            "Cached {language} embeddings at '{}' hold {} rows for {} definitions; delete the cache file",
                            cache.path(language, tokenizer_type).display(),
                            cached.len(),
                            definitions.len()
                        );
                    }
                    cached
                }
                None => {
                    let computed = compute_code_embeddings(&ctx, language, &definitions, batch_length)?;
                    cache.store(language, tokenizer_type, &computed)?;
                    computed
                }
            };

            let index = HnswAngularIndex::build(&code_embeddings)
                .with_context(|| format!("Cannot index {language} code embeddings"))?;
            predictions.extend(predict(
                &index,
                &queries,
                &query_embeddings,
                language,
                &definitions,
                cfg.predictions.top_k,
            )?);
        }

        // ── Step 4: Write ─────────────────────────────────────────────────────
        let out = cfg.training.output_dir.join(format!("predictions_{tokenizer_type}.csv"));
        write_predictions(&out, &predictions)
            .with_context(|| format!("Cannot write predictions to '{}'", out.display()))?;
        Ok(out)
    }
}

/// Device recorded in a saved context. A missing or unreadable config
/// falls back to CPU; the restore itself then reports what is wrong.
fn saved_device(restore: &Path) -> DeviceKind {
    let dir = restore.join(CONFIG_RECORD).join(<ContextConfig as LoadRecord>::TYPE_TAG);
    match ContextConfig::load(&dir) {
        Ok(cfg) => cfg.training.device,
        Err(e) => {
            tracing::debug!("No device in saved config ({e}), using cpu");
            DeviceKind::Cpu
        }
    }
}

fn read_definitions(cfg: &ContextConfig, language: &str) -> Result<Vec<CorpusRecord>> {
    let data_dir = cfg.dataset.root_dir.join("data");
    let file = find_corpus_file(&data_dir, &format!("{language}_dedupe_definitions_v2"))
        .with_context(|| format!("No {language} definitions under '{}'", data_dir.display()))?;
    Ok(read_corpus_file(&file)?)
}

/// Query embeddings, `batch_length` queries per forward pass.
pub fn compute_query_embeddings<B: AutodiffBackend>(
    ctx:          &TrainingContext<B>,
    queries:      &[String],
    batch_length: usize,
) -> Result<Vec<Vec<f32>>> {
    let params = &ctx.config().dataset.common_params;
    let mut out = Vec::with_capacity(queries.len());
    for chunk in queries.chunks(batch_length.max(1)) {
        let sentences: Vec<String> = chunk.iter().map(|q| format!("{} {}", params.query_token, q)).collect();
        let batch = ctx.tokenize_query_sentences(&sentences, Some(params.query_max_num_tokens))?;
        out.extend(ctx.encode_query(&batch)?);
    }
    Ok(out)
}

/// Code embeddings for `definitions`, in definition order,
/// `batch_length` definitions per forward pass.
pub fn compute_code_embeddings<B: AutodiffBackend>(
    ctx:          &TrainingContext<B>,
    language:     &str,
    definitions:  &[CorpusRecord],
    batch_length: usize,
) -> Result<Vec<Vec<f32>>> {
    let Some(lang_id) = ctx.lang_id(language) else {
        bail!("Language '{language}' has no id in dataset.common_params.lang_ids");
    };
    let params = &ctx.config().dataset.common_params;
    let started = std::time::Instant::now();

    let mut out = Vec::with_capacity(definitions.len());
    for (n, chunk) in definitions.chunks(batch_length.max(1)).enumerate() {
        let tokens: Vec<Vec<String>> = chunk
            .iter()
            .map(|d| {
                let mut t = Vec::with_capacity(d.code_tokens.len() + 2);
                t.push(language.to_string());
                t.push(params.lang_token.clone());
                t.extend(d.code_tokens.iter().cloned());
                t
            })
            .collect();
        let batch = ctx.tokenize_code_tokens(&tokens, Some(params.code_max_num_tokens))?;
        out.extend(ctx.encode_code(&vec![lang_id; chunk.len()], &batch)?);
        tracing::debug!("{}: encoded batch {} ({} definitions so far)", language, n + 1, out.len());
    }
    tracing::info!("Encoded {} {} definitions in {:.1?}", out.len(), language, started.elapsed());
    Ok(out)
}

/// One record per (query, neighbour), queries in order, nearest first.
pub fn predict<I: NeighborIndex>(
    index:            &I,
    queries:          &[String],
    query_embeddings: &[Vec<f32>],
    language:         &str,
    definitions:      &[CorpusRecord],
    top_k:            usize,
) -> Result<Vec<PredictionRecord>> {
    if queries.len() != query_embeddings.len() {
        bail!("{} queries but {} query embeddings", queries.len(), query_embeddings.len());
    }
    let mut records = Vec::with_capacity(queries.len() * top_k.min(definitions.len()));
    for (query, embedding) in queries.iter().zip(query_embeddings) {
        for (row, distance) in index.query(embedding, top_k)? {
            let Some(def) = definitions.get(row) else {
                bail!("Index returned row {row} but only {} definitions exist", definitions.len());
            };
            tracing::trace!("'{}' → {} ({:.4})", query, def.identifier, distance);
            records.push(PredictionRecord {
                query:      query.clone(),
                language:   language.to_string(),
                identifier: def.identifier.clone(),
                url:        def.url.clone(),
            });
        }
    }
    Ok(records)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::corpus::tests::write_gz;
    use crate::ml::context::tests::{test_config, TestBackend};
    use serde_json::json;

    fn def(name: &str) -> CorpusRecord {
        CorpusRecord {
            code_tokens: vec!["def".to_string(), name.to_string(), "(".to_string(), ")".to_string()],
            identifier:  name.to_string(),
            url:         format!("https://example.com/{name}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_top1_is_nearest_definition() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let defs = vec![def("east"), def("north"), def("diagonal")];
        let index = HnswAngularIndex::build(&embeddings).unwrap();
        let out = predict(&index, &["q".to_string()], &[vec![0.9, 0.1]], "python", &defs, 1).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].identifier, "east");
        assert_eq!(out[0].language, "python");
    }

    #[test]
    fn test_predictions_follow_query_then_rank_order() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let defs = vec![def("east"), def("north"), def("diagonal")];
        let index = HnswAngularIndex::build(&embeddings).unwrap();
        let queries = vec!["first".to_string(), "second".to_string()];
        let out = predict(&index, &queries, &[vec![0.9, 0.1], vec![0.1, 0.9]], "go", &defs, 3).unwrap();
        let got: Vec<(&str, &str)> = out.iter().map(|p| (p.query.as_str(), p.identifier.as_str())).collect();
        assert_eq!(
            got,
            vec![
                ("first", "east"), ("first", "diagonal"), ("first", "north"),
                ("second", "north"), ("second", "diagonal"), ("second", "east"),
            ]
        );
    }

    #[test]
    fn test_batched_code_embeddings_match_unbatched() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        ctx.eval_mode();
        let defs: Vec<CorpusRecord> = ["add", "sum", "read", "sort", "parse"].iter().map(|n| def(n)).collect();

        let batched = compute_code_embeddings(&ctx, "python", &defs, 2).unwrap();
        let whole = compute_code_embeddings(&ctx, "python", &defs, defs.len()).unwrap();
        assert_eq!(batched.len(), 5);
        for (a, b) in batched.iter().zip(&whole) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-5, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = TrainingContext::<TestBackend>::build_context_from_config(test_config(tmp.path()), Default::default()).unwrap();
        assert!(compute_code_embeddings(&ctx, "cobol", &[def("x")], 2).is_err());
    }

    #[test]
    fn test_predict_end_to_end_writes_csv_and_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = test_config(tmp.path());
        cfg.predictions.queries_file = tmp.path().join("queries.csv");
        cfg.predictions.languages = vec!["python".to_string()];
        cfg.predictions.top_k = 3;
        cfg.predictions.batch_length = 2;

        std::fs::write(&cfg.predictions.queries_file, "query\nadd the values\nparse json\n").unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let defs: Vec<_> = ["add", "sum", "read", "file", "sort"]
            .iter()
            .map(|n| json!({"function_tokens": ["def", n, "(", "x", ")"], "identifier": n, "url": format!("u/{n}")}))
            .collect();
        write_gz(&data.join("python_dedupe_definitions_v2.jsonl.gz"), &defs);

        let saved = tmp.path().join("saved");
        TrainingContext::<TestBackend>::build_context_from_config(cfg.clone(), Default::default())
            .unwrap()
            .save(&saved)
            .unwrap();

        let out = PredictUseCase::new(saved.clone()).execute().unwrap();
        assert_eq!(out, tmp.path().join("out").join("predictions_bpe_vocabulary.csv"));
        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "query,language,identifier,url");
        assert_eq!(lines.len(), 1 + 2 * 3);
        assert!(lines[1].starts_with("add the values,python,"));
        assert!(lines[4].starts_with("parse json,python,"));

        let cache = EmbeddingCache::new(&cfg.training.pickle_path);
        assert!(cache.path("python", "bpe_vocabulary").is_file());

        // second run is served from the cache and gives the same rows
        let again = PredictUseCase::new(saved).execute().unwrap();
        assert_eq!(std::fs::read_to_string(again).unwrap(), text);
    }

    #[test]
    fn test_predict_without_saved_context_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PredictUseCase::new(tmp.path().join("missing")).execute().unwrap_err();
        assert!(format!("{err:#}").contains("nothing to restore from"));
    }
}

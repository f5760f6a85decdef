// ============================================================
// Layer 6: Tokenizer Store
// ============================================================
// Trains the context tokenizer, saves it, and loads it back.
//
// Training goes through token files so both tokenizer kinds
// learn from exactly the same text:
//
//   Step 1: read every corpus record of the chosen split
//   Step 2: format each one as a training line
//             query → "<qy> docstring tokens"
//             code  → "<lang> <lg> code tokens"
//   Step 3: write <token_files>/query.txt and <lang>.txt
//   Step 4: train the configured kind on those files
//   Step 5: add the configured special tokens
//   Step 6: save {"tokenizer": ...} as a RecordMapping at
//           <build_path>
//
// Loading reads the same mapping; a missing build path is a
// NotFound error, never an empty tokenizer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::data::corpus::{list_corpus_files, read_corpus_file};
use crate::domain::config::{DatasetParams, TokenizerKind, TokenizersConfig};
use crate::domain::error::{Result, SiameseError};
use crate::infra::record::{RecordMapping, RecordRegistry};
use crate::tokenizer::bpe_vocab::{BpeVocabParams, BpeVocabularyTokenizer};
use crate::tokenizer::huggingface::{HuggingfaceBpeParams, HuggingfaceBpeTokenizer};
use crate::tokenizer::metadata::format_sample;
use crate::tokenizer::vocabulary::TokenCounter;
use crate::tokenizer::{register_tokenizers, TokenizerRecord};

pub const TOKENIZER_RECORD: &str = "tokenizer";

pub struct TokenizerStore {
    build_path:  PathBuf,
    token_files: PathBuf,
    kind:        TokenizerKind,
}

impl TokenizerStore {
    pub fn new(cfg: &TokenizersConfig) -> Self {
        Self {
            build_path:  cfg.build_path.clone(),
            token_files: cfg.token_files.clone(),
            kind:        cfg.kind,
        }
    }

    pub fn build_path(&self) -> &Path {
        &self.build_path
    }

    /// Load the stored tokenizer, or train one from `dirs` if none is
    /// stored yet.
    pub fn load_or_build(&self, dirs: &[PathBuf], params: &DatasetParams) -> Result<Box<dyn TokenizerRecord>> {
        if self.build_path.exists() {
            tracing::info!("Loading existing tokenizer from '{}'", self.build_path.display());
            self.load()
        } else {
            tracing::info!("Building new {} tokenizer", self.kind.as_str());
            self.build(dirs, params)
        }
    }

    pub fn load(&self) -> Result<Box<dyn TokenizerRecord>> {
        if !self.build_path.exists() {
            tracing::error!(
                "Couldn't find '{}' where tokenizers should have been built and stored",
                self.build_path.display()
            );
            return Err(SiameseError::not_found(&self.build_path, "tokenizer build path"));
        }
        let mut registry = RecordRegistry::new();
        register_tokenizers(&mut registry);
        let mut records = RecordMapping::load(&self.build_path, &registry)?;
        records.take::<Box<dyn TokenizerRecord>>(TOKENIZER_RECORD)
    }

    /// Train, extend with special tokens and store.
    pub fn build(&self, dirs: &[PathBuf], params: &DatasetParams) -> Result<Box<dyn TokenizerRecord>> {
        let started = std::time::Instant::now();
        let files = self.write_token_files(dirs, params)?;
        if files.is_empty() {
            return Err(SiameseError::EmptyCorpus(format!(
                "no training samples found in {} directories",
                dirs.len()
            )));
        }

        let mut tokenizer: Box<dyn TokenizerRecord> = match self.kind {
            TokenizerKind::HuggingfaceBpe => {
                let hf = HuggingfaceBpeParams {
                    vocab_size:     params.vocab_size,
                    min_frequency:  params.vocab_count_threshold,
                    lowercase:      params.do_lowercase,
                    special_tokens: params.special_tokens.clone(),
                };
                Box::new(HuggingfaceBpeTokenizer::train(&files, &hf, &self.token_files.join("hf"))?)
            }
            TokenizerKind::BpeVocabulary => {
                let counter = count_token_files(&files, params.do_lowercase)?;
                Box::new(BpeVocabularyTokenizer::from_counter(&counter, &BpeVocabParams::from(params)))
            }
        };
        tokenizer.add_special_tokens(&params.special_tokens)?;
        tracing::info!("Tokenizer training took {:.1?}", started.elapsed());

        RecordMapping::new()
            .with(TOKENIZER_RECORD, tokenizer.as_record())
            .save(&self.build_path)?;

        let txt = "this is a docstring";
        let encoded = tokenizer.encode_sentence(txt, None)?;
        let decoded = tokenizer.decode_sequence(&encoded.ids)?;
        tracing::debug!("encoded_ids {:?} decoded '{}' txt '{}'", encoded.ids, decoded, txt);

        Ok(tokenizer)
    }

    /// Write one training line per record; returns the files written
    /// (query file first, then one per language in name order).
    pub fn write_token_files(&self, dirs: &[PathBuf], params: &DatasetParams) -> Result<Vec<PathBuf>> {
        let mut query_lines: Vec<String> = Vec::new();
        let mut code_lines: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for dir in dirs {
            for file in list_corpus_files(dir, params.max_files_per_dir)? {
                for rec in read_corpus_file(&file)? {
                    let lang = rec.language_or_infer(dir);
                    if !rec.docstring_tokens.is_empty() {
                        query_lines.push(format_sample("query", &lang, &rec.docstring_tokens, params)?);
                    }
                    if !rec.code_tokens.is_empty() {
                        let line = format_sample("code", &lang, &rec.code_tokens, params)?;
                        code_lines.entry(lang).or_default().push(line);
                    }
                }
            }
        }

        std::fs::create_dir_all(&self.token_files).map_err(SiameseError::io(&self.token_files))?;
        let mut written = Vec::new();
        if !query_lines.is_empty() {
            written.push(write_lines(&self.token_files.join("query.txt"), &query_lines)?);
        }
        for (lang, lines) in &code_lines {
            written.push(write_lines(&self.token_files.join(format!("{lang}.txt")), lines)?);
        }
        tracing::info!(
            "Wrote {} token files ({} query lines, {} languages) to '{}'",
            written.len(),
            query_lines.len(),
            code_lines.len(),
            self.token_files.display(),
        );
        Ok(written)
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<PathBuf> {
    let tmp = path.with_extension("txt.tmp");
    {
        let file = File::create(&tmp).map_err(SiameseError::io(&tmp))?;
        let mut w = BufWriter::new(file);
        for line in lines {
            w.write_all(line.as_bytes()).map_err(SiameseError::io(&tmp))?;
        }
        w.flush().map_err(SiameseError::io(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(SiameseError::io(path))?;
    Ok(path.to_path_buf())
}

/// Counts are taken in the case the tokenizer will see, so with
/// `lowercase` set "Foo" and "foo" share one entry.
fn count_token_files(files: &[PathBuf], lowercase: bool) -> Result<TokenCounter> {
    let mut counter = TokenCounter::new();
    for path in files {
        let file = File::open(path).map_err(SiameseError::io(path))?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(SiameseError::io(path))?;
            if lowercase {
                counter.update(line.to_lowercase().split_whitespace());
            } else {
                counter.update(line.split_whitespace());
            }
        }
    }
    Ok(counter)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::corpus::tests::write_gz;
    use serde_json::json;

    fn setup(root: &Path, kind: TokenizerKind) -> (TokenizerStore, Vec<PathBuf>) {
        let dir = root.join("python");
        std::fs::create_dir_all(&dir).unwrap();
        let mut lines = Vec::new();
        for i in 0..10 {
            lines.push(json!({
                "code_tokens": ["def", format!("f{i}"), "(", "x", ")", "return", "x"],
                "docstring_tokens": ["return", "the", "value"],
            }));
        }
        write_gz(&dir.join("0.jsonl.gz"), &lines);
        let cfg = TokenizersConfig {
            kind,
            build_path: root.join("build"),
            token_files: root.join("tokens"),
        };
        (TokenizerStore::new(&cfg), vec![dir])
    }

    fn params() -> DatasetParams {
        DatasetParams { vocab_size: 120, vocab_count_threshold: 1, ..DatasetParams::default() }
    }

    #[test]
    fn test_token_files_are_formatted() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, dirs) = setup(tmp.path(), TokenizerKind::BpeVocabulary);
        let files = store.write_token_files(&dirs, &params()).unwrap();
        assert_eq!(files.len(), 2);
        let query = std::fs::read_to_string(&files[0]).unwrap();
        assert!(query.starts_with("<qy> return the value\r\n"));
        let code = std::fs::read_to_string(&files[1]).unwrap();
        assert!(code.starts_with("python <lg> def f0"));
    }

    #[test]
    fn test_counts_follow_lowercasing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("code_python.txt");
        std::fs::write(&path, "python <lg> Foo FOO foo\r\n").unwrap();

        let folded = count_token_files(&[path.clone()], true).unwrap();
        assert_eq!(folded.most_common(1), vec![("foo".to_string(), 3)]);

        let kept = count_token_files(&[path], false).unwrap();
        assert!(kept.most_common(10).contains(&("Foo".to_string(), 1)));
    }

    #[test]
    fn test_build_then_load_bpe_vocabulary() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, dirs) = setup(tmp.path(), TokenizerKind::BpeVocabulary);
        let built = store.build(&dirs, &params()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(built.vocab_size(), loaded.vocab_size());
        let s = "<qy> return the value";
        assert_eq!(
            built.encode_sentence(s, Some(8)).unwrap(),
            loaded.encode_sentence(s, Some(8)).unwrap()
        );
    }

    #[test]
    fn test_build_huggingface() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, dirs) = setup(tmp.path(), TokenizerKind::HuggingfaceBpe);
        let built = store.load_or_build(&dirs, &params()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(built.vocab_size(), loaded.vocab_size());
        assert_eq!(built.pad_id(), 0);
    }

    #[test]
    fn test_missing_build_path_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _) = setup(tmp.path(), TokenizerKind::BpeVocabulary);
        assert!(matches!(store.load(), Err(SiameseError::NotFound { .. })));
    }
}

// ============================================================
// Layer 4b: Huggingface BPE Tokenizer
// ============================================================
// Wraps a `tokenizers` BPE model behind the TokenizerRecord
// contract.
//
// Training pipeline:
//   1. Formatted samples are written to token files, one
//      sample per line (see tokenizer::metadata)
//   2. A BpeTrainer learns merges from those files behind a
//      BertNormalizer (clean text, strip accents, optional
//      lowercase) and a whitespace pre-tokenizer
//   3. The trained tokenizer is written as tokenizer.json and
//      read back as a plain `tokenizers::Tokenizer`, so the
//      trained and the restored object are the same type
//
// "<pad>" and "<unk>" are always the first two special
// tokens, so padding is id 0 and unknown is id 1 whatever
// the config lists after them.

use std::path::{Path, PathBuf};

use tokenizers::decoders::bpe::BPEDecoder;
use tokenizers::models::bpe::{BpeTrainerBuilder, BPE};
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::processors::PostProcessorWrapper;
use tokenizers::{AddedToken, Tokenizer, TokenizerBuilder};

use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::{LoadRecord, Recordable};
use crate::tokenizer::TokenizerRecord;

const TOKENIZER_FILE: &str = "tokenizer.json";
pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// Training settings for [`HuggingfaceBpeTokenizer::train`].
#[derive(Debug, Clone)]
pub struct HuggingfaceBpeParams {
    pub vocab_size:     usize,
    pub min_frequency:  u64,
    pub lowercase:      bool,
    pub special_tokens: Vec<String>,
}

pub struct HuggingfaceBpeTokenizer {
    inner:  Tokenizer,
    pad_id: u32,
    unk_id: u32,
}

impl std::fmt::Debug for HuggingfaceBpeTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingfaceBpeTokenizer")
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .field("pad_id", &self.pad_id)
            .field("unk_id", &self.unk_id)
            .finish()
    }
}

fn tok_err(e: impl std::fmt::Display) -> SiameseError {
    SiameseError::Tokenizer(e.to_string())
}

impl HuggingfaceBpeTokenizer {
    /// Train on `files` and keep the artifact in `work_dir`.
    pub fn train(files: &[PathBuf], params: &HuggingfaceBpeParams, work_dir: &Path) -> Result<Self> {
        let mut specials: Vec<String> = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        for t in &params.special_tokens {
            if !specials.contains(t) {
                specials.push(t.clone());
            }
        }

        tracing::info!(
            "Training BPE tokenizer on {} files (vocab_size={}, lowercase={}, special_tokens={:?})",
            files.len(),
            params.vocab_size,
            params.lowercase,
            specials,
        );

        let mut trainer = BpeTrainerBuilder::new()
            .show_progress(false)
            .vocab_size(params.vocab_size)
            .min_frequency(params.min_frequency)
            .special_tokens(specials.iter().map(|t| AddedToken::from(t.clone(), true)).collect())
            .end_of_word_suffix("</w>".to_string())
            .build();

        let mut tokenizer = TokenizerBuilder::<BPE, BertNormalizer, Whitespace, PostProcessorWrapper, BPEDecoder>::new()
            .with_model(BPE::default())
            .with_normalizer(Some(BertNormalizer::new(true, true, Some(true), params.lowercase)))
            .with_pre_tokenizer(Some(Whitespace::default()))
            .with_post_processor(None)
            .with_decoder(Some(BPEDecoder::default()))
            .build()
            .map_err(tok_err)?;

        let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        tokenizer
            .train_from_files(&mut trainer, files)
            .map_err(tok_err)?;

        std::fs::create_dir_all(work_dir).map_err(SiameseError::io(work_dir))?;
        let path = work_dir.join(TOKENIZER_FILE);
        tokenizer.save(&path, false).map_err(tok_err)?;
        Self::from_file(&path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| SiameseError::corrupt(path, "huggingface tokenizer", e))?;
        Self::from_tokenizer(inner)
            .map_err(|e| SiameseError::corrupt(path, "huggingface tokenizer", e))
    }

    fn from_tokenizer(inner: Tokenizer) -> Result<Self> {
        let pad_id = inner
            .token_to_id(PAD_TOKEN)
            .ok_or_else(|| tok_err(format!("vocabulary has no {PAD_TOKEN} token")))?;
        let unk_id = inner
            .token_to_id(UNK_TOKEN)
            .ok_or_else(|| tok_err(format!("vocabulary has no {UNK_TOKEN} token")))?;
        Ok(Self { inner, pad_id, unk_id })
    }
}

impl TokenizerRecord for HuggingfaceBpeTokenizer {
    fn as_record(&self) -> &dyn Recordable {
        self
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self.inner.encode(text, false).map_err(tok_err)?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
        tokens
            .iter()
            .map(|t| self.inner.token_to_id(t).unwrap_or(self.unk_id))
            .collect()
    }

    fn unk_token(&self) -> &str {
        UNK_TOKEN
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<()> {
        let fresh: Vec<AddedToken> = tokens
            .iter()
            .filter(|t| self.inner.token_to_id(t).is_none())
            .map(|t| AddedToken::from(t.clone(), true))
            .collect();
        if !fresh.is_empty() {
            let added = self.inner.add_special_tokens(&fresh);
            tracing::debug!("Added {} special tokens", added);
        }
        Ok(())
    }

    fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, true).map_err(tok_err)
    }
}

impl Recordable for HuggingfaceBpeTokenizer {
    fn type_tag(&self) -> &'static str {
        <Self as LoadRecord>::TYPE_TAG
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(SiameseError::io(dir))?;
        self.inner.save(dir.join(TOKENIZER_FILE), false).map_err(tok_err)
    }
}

impl LoadRecord for HuggingfaceBpeTokenizer {
    const TYPE_TAG: &'static str = "query_code_siamese.tokenizer.HuggingfaceBpeTokenizer";

    fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(TOKENIZER_FILE);
        if !path.is_file() {
            return Err(SiameseError::not_found(&path, "huggingface tokenizer"));
        }
        Self::from_file(&path)
    }
}

// ============================================================
// Layer 4b: Tokenizers
// ============================================================
// One contract, two implementations:
//
//   BpeVocabularyTokenizer   → whole-word vocabulary with a
//                              byte-pair fallback for rare
//                              words (or word-only, by
//                              frequency threshold)
//   HuggingfaceBpeTokenizer  → the `tokenizers` crate BPE
//                              model behind a BERT normaliser
//
// Both are trained from corpora, saved as Recordables, and
// extended with sentinel tokens (<lg>, <qy>) before use.
//
// The fixed-length encoding rule lives here once, in the
// trait's provided methods:
//   - longer than max_length  → truncated from the end
//   - shorter                 → right-padded with pad_id
//   - mask                    → 0 wherever the id is pad_id,
//                               1 everywhere else
//   - no max_length           → natural length

pub mod bpe_vocab;
pub mod huggingface;
pub mod metadata;
pub mod vocabulary;

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::domain::config::TokenizerKind;
use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::{LoadRecord, Recordable};
use crate::infra::record::RecordRegistry;

pub use bpe_vocab::BpeVocabularyTokenizer;
pub use huggingface::HuggingfaceBpeTokenizer;

// ─── Encoded outputs ──────────────────────────────────────────────────────────
/// Token ids of one sequence plus its validity mask (same length).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncodedSequence {
    pub ids:  Vec<u32>,
    pub mask: Vec<u32>,
}

impl EncodedSequence {
    /// Apply the fixed-length rule to raw ids.
    /// The mask follows the ids: every `pad_id` is masked out, including
    /// one produced by a literal pad token in the input.
    pub fn from_ids(mut ids: Vec<u32>, max_length: Option<usize>, pad_id: u32) -> Self {
        if let Some(n) = max_length {
            ids.truncate(n);
            ids.resize(n, pad_id);
        }
        let mask = ids.iter().map(|&id| u32::from(id != pad_id)).collect();
        Self { ids, mask }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A batch of encoded sequences, row-aligned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncodedBatch {
    pub ids:   Vec<Vec<u32>>,
    pub masks: Vec<Vec<u32>>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<EncodedSequence> for EncodedBatch {
    fn from_iter<I: IntoIterator<Item = EncodedSequence>>(iter: I) -> Self {
        let mut batch = EncodedBatch::default();
        for seq in iter {
            batch.ids.push(seq.ids);
            batch.masks.push(seq.mask);
        }
        batch
    }
}

// ─── TokenizerRecord ──────────────────────────────────────────────────────────
/// Text ⇄ fixed-length id arrays, persisted as a Recordable.
pub trait TokenizerRecord: Recordable + Send + Sync {
    /// Same object seen through the persistence contract.
    fn as_record(&self) -> &dyn Recordable;

    /// Segment raw text into vocabulary-level token strings.
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;

    /// Segment text that is already split into words.
    fn tokenize_tokens(&self, tokens: &[String]) -> Result<Vec<String>> {
        self.tokenize(&tokens.join(" "))
    }

    /// Unknown tokens map to the unknown id.
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32>;

    fn unk_token(&self) -> &str;

    fn pad_id(&self) -> u32;

    fn vocab_size(&self) -> usize;

    /// Reserve ids for sentinel tokens. Tokens already known are left
    /// alone, so repeated calls do not grow the vocabulary.
    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<()>;

    /// Turn in-range, non-pad ids back into text.
    fn decode_ids(&self, ids: &[u32]) -> Result<String>;

    fn encode_sentence(&self, text: &str, max_length: Option<usize>) -> Result<EncodedSequence> {
        let tokens = self.tokenize(text)?;
        let ids = self.convert_tokens_to_ids(&tokens);
        Ok(EncodedSequence::from_ids(ids, max_length, self.pad_id()))
    }

    fn encode_sentences(&self, sentences: &[String], max_length: Option<usize>) -> Result<EncodedBatch> {
        sentences
            .iter()
            .map(|s| self.encode_sentence(s, max_length))
            .collect()
    }

    fn encode_tokens(&self, token_lists: &[Vec<String>], max_length: Option<usize>) -> Result<EncodedBatch> {
        token_lists
            .iter()
            .map(|tokens| {
                let pieces = self.tokenize_tokens(tokens)?;
                let ids = self.convert_tokens_to_ids(&pieces);
                Ok(EncodedSequence::from_ids(ids, max_length, self.pad_id()))
            })
            .collect()
    }

    /// Padding is skipped; an id outside the vocabulary is an error.
    fn decode_sequence(&self, ids: &[u32]) -> Result<String> {
        let size = self.vocab_size();
        if let Some(bad) = ids.iter().find(|&&id| id as usize >= size) {
            return Err(SiameseError::Tokenizer(format!(
                "cannot decode id {bad}: vocabulary has {size} entries"
            )));
        }
        let pad = self.pad_id();
        let kept: Vec<u32> = ids.iter().copied().filter(|&id| id != pad).collect();
        self.decode_ids(&kept)
    }

    fn decode_sequences(&self, sequences: &[Vec<u32>]) -> Result<Vec<String>> {
        sequences.iter().map(|s| self.decode_sequence(s)).collect()
    }
}

/// Kind of a tokenizer as recorded by its type tag.
pub fn tokenizer_kind(tokenizer: &dyn TokenizerRecord) -> Option<TokenizerKind> {
    let tag = tokenizer.type_tag();
    if tag == BpeVocabularyTokenizer::TYPE_TAG {
        Some(TokenizerKind::BpeVocabulary)
    } else if tag == HuggingfaceBpeTokenizer::TYPE_TAG {
        Some(TokenizerKind::HuggingfaceBpe)
    } else {
        None
    }
}

/// Register loaders for every tokenizer type. Each one restores as a
/// `Box<dyn TokenizerRecord>`, so callers take the entry by that type
/// without knowing which implementation was saved.
pub fn register_tokenizers(registry: &mut RecordRegistry) {
    registry
        .register(BpeVocabularyTokenizer::TYPE_TAG, |dir| {
            let tok: Box<dyn TokenizerRecord> = Box::new(BpeVocabularyTokenizer::load(dir)?);
            Ok(Box::new(tok) as Box<dyn Any>)
        })
        .register(HuggingfaceBpeTokenizer::TYPE_TAG, |dir| {
            let tok: Box<dyn TokenizerRecord> = Box::new(HuggingfaceBpeTokenizer::load(dir)?);
            Ok(Box::new(tok) as Box<dyn Any>)
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_length_pads_and_masks() {
        for n in [1usize, 3, 5, 8] {
            let seq = EncodedSequence::from_ids(vec![7, 8, 9], Some(n), 0);
            assert_eq!(seq.ids.len(), n);
            assert_eq!(seq.mask.len(), n);
            let real = 3.min(n);
            assert!(seq.mask[..real].iter().all(|&m| m == 1));
            assert!(seq.mask[real..].iter().all(|&m| m == 0));
            assert!(seq.ids[real..].iter().all(|&id| id == 0));
        }
    }

    #[test]
    fn test_natural_length_keeps_everything() {
        let seq = EncodedSequence::from_ids(vec![4, 5], None, 0);
        assert_eq!(seq.ids, vec![4, 5]);
        assert_eq!(seq.mask, vec![1, 1]);
    }

    #[test]
    fn test_pad_id_inside_the_input_is_masked() {
        let seq = EncodedSequence::from_ids(vec![5, 0, 4], Some(5), 0);
        assert_eq!(seq.ids, vec![5, 0, 4, 0, 0]);
        assert_eq!(seq.mask, vec![1, 0, 1, 0, 0]);
        let natural = EncodedSequence::from_ids(vec![0, 3], None, 0);
        assert_eq!(natural.mask, vec![0, 1]);
    }

    #[test]
    fn test_truncates_from_the_end() {
        let seq = EncodedSequence::from_ids(vec![1, 2, 3, 4], Some(2), 0);
        assert_eq!(seq.ids, vec![1, 2]);
        assert_eq!(seq.mask, vec![1, 1]);
    }
}

// ============================================================
// Layer 4b: Word + Byte-Pair Vocabulary Tokenizer
// ============================================================
// Id layout (contiguous, stable once built):
//
//   0 __pad | 1 __unk | 2 __sow | 3 __eow
//   4 ..                 whole words, most frequent first
//   subword_start ..     byte-pair subwords
//   subword_end ..       special tokens appended later
//
// A known word is one token. An unknown word is spelled as
//   __sow, subword, subword, ..., __eow
// so decoding can glue it back together. With use_bpe off
// an unknown word is simply __unk.
//
// Words and subwords have separate lookup tables: "a" can be
// both a word and a subword and the two get different ids.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::preprocessor::Preprocessor;
use crate::domain::config::DatasetParams;
use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::{LoadRecord, Recordable};
use crate::infra::record::{read_json, write_json};
use crate::tokenizer::vocabulary::{
    apply_merges, learn_bpe, merge_ranks, select_words, TokenCounter, EOW, PAD, RESERVED, SOW, UNK,
};
use crate::tokenizer::TokenizerRecord;

const VOCAB_FILE: &str = "vocab.json";

const UNK_ID: u32 = 1;
const SOW_ID: u32 = 2;
const EOW_ID: u32 = 3;

/// Knobs for building a vocabulary from counts.
#[derive(Debug, Clone, PartialEq)]
pub struct BpeVocabParams {
    pub vocab_size: usize,
    pub pct_bpe:    f64,
    pub threshold:  u64,
    pub use_bpe:    bool,
    pub lowercase:  bool,
}

impl From<&DatasetParams> for BpeVocabParams {
    fn from(p: &DatasetParams) -> Self {
        Self {
            vocab_size: p.vocab_size,
            pct_bpe:    p.pct_bpe,
            threshold:  p.vocab_count_threshold,
            use_bpe:    p.use_bpe,
            lowercase:  p.do_lowercase,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpeVocabularyTokenizer {
    /// id → token text
    tokens:        Vec<String>,
    subword_start: u32,
    subword_end:   u32,
    merges:        Vec<(String, String)>,
    use_bpe:       bool,
    lowercase:     bool,

    #[serde(skip)]
    words:    HashMap<String, u32>,
    #[serde(skip)]
    subwords: HashMap<String, u32>,
    #[serde(skip)]
    ranks:    HashMap<(String, String), usize>,
}

impl BpeVocabularyTokenizer {
    /// Build from token counts.
    pub fn from_counter(counter: &TokenCounter, params: &BpeVocabParams) -> Self {
        let reserved = RESERVED.len();
        let bpe_budget = if params.use_bpe {
            (params.vocab_size as f64 * params.pct_bpe).round() as usize
        } else {
            0
        };
        let word_budget = params.vocab_size.saturating_sub(bpe_budget + reserved);

        let mut tokens: Vec<String> = RESERVED.iter().map(|t| t.to_string()).collect();
        tokens.extend(select_words(counter, params.threshold, word_budget));

        let subword_start = tokens.len() as u32;
        let bpe = if params.use_bpe { learn_bpe(counter, bpe_budget) } else { Default::default() };
        tokens.extend(bpe.symbols);
        let subword_end = tokens.len() as u32;

        tracing::debug!(
            "Built vocabulary: {} words, {} subwords, {} merges",
            subword_start as usize - reserved,
            subword_end - subword_start,
            bpe.merges.len(),
        );

        let mut tok = Self {
            tokens,
            subword_start,
            subword_end,
            merges: bpe.merges,
            use_bpe: params.use_bpe,
            lowercase: params.lowercase,
            words: HashMap::new(),
            subwords: HashMap::new(),
            ranks: HashMap::new(),
        };
        tok.reindex();
        tok
    }

    fn reindex(&mut self) {
        self.words.clear();
        self.subwords.clear();
        for (id, token) in self.tokens.iter().enumerate() {
            let id = id as u32;
            if (self.subword_start..self.subword_end).contains(&id) {
                self.subwords.insert(token.clone(), id);
            } else {
                self.words.entry(token.clone()).or_insert(id);
            }
        }
        self.ranks = merge_ranks(&self.merges);
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.words.contains_key(word)
    }

    pub fn subword_count(&self) -> usize {
        (self.subword_end - self.subword_start) as usize
    }

    fn push_word(&self, raw: &str, out: &mut Vec<String>) {
        if self.words.contains_key(raw) {
            out.push(raw.to_string());
            return;
        }
        let word = if self.lowercase { raw.to_lowercase() } else { raw.to_string() };
        if self.words.contains_key(&word) || !self.use_bpe {
            out.push(word);
            return;
        }
        out.push(SOW.to_string());
        out.extend(apply_merges(&word, &self.ranks));
        out.push(EOW.to_string());
    }
}

impl TokenizerRecord for BpeVocabularyTokenizer {
    fn as_record(&self) -> &dyn Recordable {
        self
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let clean = Preprocessor::new().clean_line(text);
        let mut out = Vec::new();
        for raw in clean.split_whitespace() {
            self.push_word(raw, &mut out);
        }
        Ok(out)
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
        let mut in_word = false;
        tokens
            .iter()
            .map(|t| {
                if t == SOW {
                    in_word = true;
                    return SOW_ID;
                }
                if t == EOW {
                    in_word = false;
                    return EOW_ID;
                }
                let table = if in_word { &self.subwords } else { &self.words };
                table.get(t).copied().unwrap_or(UNK_ID)
            })
            .collect()
    }

    fn unk_token(&self) -> &str {
        UNK
    }

    fn pad_id(&self) -> u32 {
        0
    }

    fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    fn add_special_tokens(&mut self, tokens: &[String]) -> Result<()> {
        for t in tokens {
            if !self.words.contains_key(t) {
                let id = self.tokens.len() as u32;
                self.tokens.push(t.clone());
                self.words.insert(t.clone(), id);
            }
        }
        Ok(())
    }

    fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        let mut words: Vec<String> = Vec::new();
        let mut current: Option<String> = None;
        for &id in ids {
            let token = self.tokens.get(id as usize).ok_or_else(|| {
                SiameseError::Tokenizer(format!("id {id} outside vocabulary"))
            })?;
            match token.as_str() {
                SOW => current = Some(String::new()),
                EOW => {
                    if let Some(w) = current.take() {
                        words.push(w);
                    }
                }
                PAD => {}
                t => match current.as_mut() {
                    Some(w) => w.push_str(t),
                    None => words.push(t.to_string()),
                },
            }
        }
        if let Some(w) = current {
            words.push(w);
        }
        Ok(words.join(" "))
    }
}

impl Recordable for BpeVocabularyTokenizer {
    fn type_tag(&self) -> &'static str {
        <Self as LoadRecord>::TYPE_TAG
    }

    fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(VOCAB_FILE), self)
    }
}

impl LoadRecord for BpeVocabularyTokenizer {
    const TYPE_TAG: &'static str = "query_code_siamese.tokenizer.BpeVocabularyTokenizer";

    fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(VOCAB_FILE);
        let mut tok: Self = read_json(&path, "bpe vocabulary")?;
        let reserved_ok = tok.tokens.iter().take(RESERVED.len()).eq(RESERVED.iter());
        if !reserved_ok
            || tok.subword_start > tok.subword_end
            || tok.subword_end as usize > tok.tokens.len()
        {
            return Err(SiameseError::corrupt(&path, "bpe vocabulary", "inconsistent id layout"));
        }
        tok.reindex();
        Ok(tok)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn counter(texts: &[&str]) -> TokenCounter {
        let mut c = TokenCounter::new();
        for t in texts {
            c.update(t.split_whitespace());
        }
        c
    }

    fn params(use_bpe: bool) -> BpeVocabParams {
        BpeVocabParams { vocab_size: 100, pct_bpe: 0.5, threshold: 1, use_bpe, lowercase: true }
    }

    #[test]
    fn test_threshold_vocabulary_maps_unknown_word_to_unk() {
        let tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar", "foo baz"]), &params(false));
        let ids = tok.convert_tokens_to_ids(&["foo".to_string(), "qux".to_string()]);
        let unk = tok.convert_tokens_to_ids(&[tok.unk_token().to_string()])[0];
        assert_ne!(ids[0], unk);
        assert_eq!(ids[1], unk);
        assert_eq!(tok.encode_sentence("qux", None).unwrap().ids, vec![unk]);
    }

    #[test]
    fn test_fixed_length_encoding() {
        let tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar", "foo baz"]), &params(false));
        for n in 1..6 {
            let enc = tok.encode_sentence("foo bar baz", Some(n)).unwrap();
            assert_eq!(enc.ids.len(), n);
            let real = 3.min(n);
            assert_eq!(enc.mask.iter().filter(|&&m| m == 1).count(), real);
            assert!(enc.mask[real..].iter().all(|&m| m == 0));
        }
    }

    #[test]
    fn test_round_trip_in_vocabulary_sentence() {
        let tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar", "foo baz"]), &params(true));
        let s = "foo  baz bar";
        let ids = tok.convert_tokens_to_ids(&tok.tokenize(s).unwrap());
        assert_eq!(tok.decode_sequence(&ids).unwrap(), "foo baz bar");
    }

    #[test]
    fn test_literal_pad_token_is_masked() {
        let tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar", "foo baz"]), &params(true));
        let seq = tok.encode_sentence("foo __pad bar", Some(5)).unwrap();
        assert_eq!(seq.ids[1], tok.pad_id());
        assert_eq!(seq.mask, vec![1, 0, 1, 0, 0]);
    }

    #[test]
    fn test_unknown_word_is_spelled_with_subwords() {
        let tok = BpeVocabularyTokenizer::from_counter(
            &counter(&["lower lowest low", "low lower"]),
            &BpeVocabParams { vocab_size: 40, pct_bpe: 0.5, threshold: 2, use_bpe: true, lowercase: true },
        );
        assert!(tok.subword_count() > 0);
        let pieces = tok.tokenize("slow").unwrap();
        assert_eq!(pieces.first().map(String::as_str), Some(SOW));
        assert_eq!(pieces.last().map(String::as_str), Some(EOW));
        let ids = tok.convert_tokens_to_ids(&pieces);
        assert_eq!(tok.decode_sequence(&ids).unwrap(), "slow");
    }

    #[test]
    fn test_add_special_tokens_is_idempotent() {
        let mut tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar"]), &params(true));
        let specials = vec!["<lg>".to_string(), "<qy>".to_string()];
        tok.add_special_tokens(&specials).unwrap();
        let once = tok.vocab_size();
        tok.add_special_tokens(&specials).unwrap();
        assert_eq!(tok.vocab_size(), once);
        assert_eq!(tok.tokenize("<qy> foo").unwrap(), vec!["<qy>", "foo"]);
    }

    #[test]
    fn test_decode_out_of_range_fails() {
        let tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo"]), &params(false));
        let err = tok.decode_sequence(&[tok.vocab_size() as u32]).unwrap_err();
        assert!(matches!(err, SiameseError::Tokenizer(_)));
    }

    #[test]
    fn test_save_and_load_keep_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tok = BpeVocabularyTokenizer::from_counter(&counter(&["foo bar", "foo baz"]), &params(true));
        tok.add_special_tokens(&["<lg>".to_string()]).unwrap();
        tok.save(tmp.path()).unwrap();

        let back = BpeVocabularyTokenizer::load(tmp.path()).unwrap();
        let s = "<lg> foo zap";
        assert_eq!(back.encode_sentence(s, Some(8)).unwrap(), tok.encode_sentence(s, Some(8)).unwrap());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = BpeVocabularyTokenizer::load(tmp.path()).unwrap_err();
        assert!(matches!(err, SiameseError::NotFound { .. }));
    }
}

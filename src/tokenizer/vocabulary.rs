// ============================================================
// Layer 4b: Vocabulary Building Blocks
// ============================================================
// Token counting and the two ways a vocabulary is derived
// from counts:
//
//   select_words  → frequency threshold + size budget
//   learn_bpe     → byte-pair merges over the character
//                   spelling of every counted word
//
// Counts live in a BTreeMap and every ranking breaks ties
// by token text, so the result of a build depends only on
// the multiset of counts and never on the order shards were
// merged in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub const PAD: &str = "__pad";
pub const UNK: &str = "__unk";
/// Opens the subword spelling of an out-of-vocabulary word
pub const SOW: &str = "__sow";
/// Closes it
pub const EOW: &str = "__eow";

pub const RESERVED: [&str; 4] = [PAD, UNK, SOW, EOW];

// ─── TokenCounter ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounter {
    counts: BTreeMap<String, u64>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: &str) {
        self.add_n(token, 1);
    }

    pub fn add_n(&mut self, token: &str, n: u64) {
        if let Some(c) = self.counts.get_mut(token) {
            *c += n;
        } else {
            self.counts.insert(token.to_string(), n);
        }
    }

    pub fn update<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for t in tokens {
            self.add(t);
        }
    }

    /// Sum counts in. Commutative and associative.
    pub fn merge(&mut self, other: &TokenCounter) {
        for (token, &n) in &other.counts {
            self.add_n(token, n);
        }
    }

    pub fn get(&self, token: &str) -> u64 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(t, &n)| (t.as_str(), n))
    }

    /// Up to `k` tokens by count descending, ties by token text.
    pub fn most_common(&self, k: usize) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self.counts.iter().map(|(t, &n)| (t.clone(), n)).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(k);
        all
    }
}

/// Whole words with at least `threshold` occurrences, best first, at most
/// `budget` of them. Reserved names never qualify.
pub fn select_words(counter: &TokenCounter, threshold: u64, budget: usize) -> Vec<String> {
    counter
        .most_common(counter.len())
        .into_iter()
        .filter(|(t, n)| *n >= threshold && !RESERVED.contains(&t.as_str()))
        .take(budget)
        .map(|(t, _)| t)
        .collect()
}

// ─── Byte-pair merges ─────────────────────────────────────────────────────────
/// Learned subword inventory plus the merges that produced it, in
/// learning order (earlier merges have higher priority).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpeMerges {
    pub symbols: Vec<String>,
    pub merges:  Vec<(String, String)>,
}

/// Learn at most `budget` subword symbols from the character spellings
/// of the counted words.
pub fn learn_bpe(counter: &TokenCounter, budget: usize) -> BpeMerges {
    if budget == 0 {
        return BpeMerges::default();
    }

    let mut words: Vec<(Vec<String>, u64)> = counter
        .iter()
        .filter(|(t, _)| !RESERVED.contains(t))
        .map(|(t, n)| (t.chars().map(|c| c.to_string()).collect(), n))
        .collect();

    // Single characters first, most frequent first.
    let mut char_counts = TokenCounter::new();
    for (spelling, n) in &words {
        for c in spelling {
            char_counts.add_n(c, *n);
        }
    }
    let mut symbols: Vec<String> = char_counts
        .most_common(char_counts.len())
        .into_iter()
        .map(|(c, _)| c)
        .take(budget)
        .collect();
    let mut known: BTreeSet<String> = symbols.iter().cloned().collect();
    let mut merges = Vec::new();

    while symbols.len() < budget {
        let mut pairs: BTreeMap<(&str, &str), u64> = BTreeMap::new();
        for (spelling, n) in &words {
            for w in spelling.windows(2) {
                if known.contains(&w[0]) && known.contains(&w[1]) {
                    *pairs.entry((w[0].as_str(), w[1].as_str())).or_insert(0) += n;
                }
            }
        }

        // Strictly greater keeps the lexicographically smallest pair on ties.
        let mut best: Option<((&str, &str), u64)> = None;
        for (&pair, &n) in &pairs {
            if best.map_or(true, |(_, b)| n > b) {
                best = Some((pair, n));
            }
        }
        let (left, right) = match best {
            Some(((l, r), n)) if n >= 2 => (l.to_string(), r.to_string()),
            _ => break,
        };

        let merged = format!("{left}{right}");
        for (spelling, _) in words.iter_mut() {
            *spelling = merge_pair(spelling, &left, &right);
        }
        if known.insert(merged.clone()) {
            symbols.push(merged);
        }
        merges.push((left, right));
    }

    BpeMerges { symbols, merges }
}

fn merge_pair(spelling: &[String], left: &str, right: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(spelling.len());
    let mut i = 0;
    while i < spelling.len() {
        if i + 1 < spelling.len() && spelling[i] == left && spelling[i + 1] == right {
            out.push(format!("{left}{right}"));
            i += 2;
        } else {
            out.push(spelling[i].clone());
            i += 1;
        }
    }
    out
}

/// Spell `word` with learned merges, applying the highest-priority
/// adjacent pair until none applies.
pub fn apply_merges(word: &str, ranks: &HashMap<(String, String), usize>) -> Vec<String> {
    let mut spelling: Vec<String> = word.chars().map(|c| c.to_string()).collect();
    loop {
        let best = spelling
            .windows(2)
            .filter_map(|w| ranks.get(&(w[0].clone(), w[1].clone())).map(|&r| (r, w[0].clone(), w[1].clone())))
            .min_by_key(|(r, _, _)| *r);
        match best {
            Some((_, l, r)) => spelling = merge_pair(&spelling, &l, &r),
            None => return spelling,
        }
    }
}

pub fn merge_ranks(merges: &[(String, String)]) -> HashMap<(String, String), usize> {
    merges.iter().cloned().enumerate().map(|(i, m)| (m, i)).collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn counter(words: &[(&str, u64)]) -> TokenCounter {
        let mut c = TokenCounter::new();
        for (w, n) in words {
            c.add_n(w, *n);
        }
        c
    }

    #[test]
    fn test_most_common_breaks_ties_by_text() {
        let c = counter(&[("b", 2), ("a", 2), ("c", 5)]);
        let top = c.most_common(3);
        assert_eq!(top, vec![("c".to_string(), 5), ("a".to_string(), 2), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let shards = [
            counter(&[("foo", 2), ("bar", 1)]),
            counter(&[("foo", 1), ("baz", 4)]),
            counter(&[("qux", 1), ("bar", 3)]),
        ];
        let mut forward = TokenCounter::new();
        for s in &shards {
            forward.merge(s);
        }
        let mut backward = TokenCounter::new();
        for s in shards.iter().rev() {
            backward.merge(s);
        }
        assert_eq!(forward, backward);
        assert_eq!(select_words(&forward, 1, 10), select_words(&backward, 1, 10));
        assert_eq!(learn_bpe(&forward, 20), learn_bpe(&backward, 20));
    }

    #[test]
    fn test_select_words_respects_threshold_and_budget() {
        let c = counter(&[("foo", 5), ("bar", 3), ("baz", 1)]);
        assert_eq!(select_words(&c, 2, 10), vec!["foo", "bar"]);
        assert_eq!(select_words(&c, 1, 1), vec!["foo"]);
    }

    #[test]
    fn test_learn_bpe_merges_frequent_pairs() {
        let c = counter(&[("lower", 5), ("lowest", 3), ("low", 4)]);
        let bpe = learn_bpe(&c, 12);
        assert_eq!(bpe.merges.first(), Some(&("l".to_string(), "o".to_string())));
        assert!(bpe.symbols.contains(&"low".to_string()));
        assert!(bpe.symbols.len() <= 12);
    }

    #[test]
    fn test_apply_merges_rebuilds_known_word() {
        let c = counter(&[("lower", 5), ("low", 4)]);
        let bpe = learn_bpe(&c, 20);
        let ranks = merge_ranks(&bpe.merges);
        assert_eq!(apply_merges("low", &ranks), vec!["low"]);
        assert_eq!(apply_merges("lowx", &ranks).concat(), "lowx");
    }
}

// ============================================================
// Layer 4: Text Preprocessor
// ============================================================
// Normalises raw corpus text before tokenisation.
//
// Corpus lines come from scraped docstrings and source code,
// so they carry tabs, non-breaking spaces, zero-width spaces,
// byte order marks and stray control characters. Left alone
// these become vocabulary entries of their own.
//
//   clean_line       → one line, single spaces, no control
//                      characters
//   split_subtokens  → getFooBar / get_foo_bar → get foo bar
//
// Lowercasing is a tokenizer setting and is not done here.

pub struct Preprocessor;

/// Marks the last subtoken of an identifier when subtoken
/// boundaries must survive in the vocabulary.
pub const SUBTOKEN_END: &str = "</t>";

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Collapse all whitespace (newlines included) into single
    /// spaces and drop invisible characters.
    pub fn clean_line(&self, text: &str) -> String {
        let mapped: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect();

        let mut out = String::with_capacity(mapped.len());
        for word in mapped.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
        out
    }

    /// Split an identifier on underscores, digits/letter edges and
    /// lower→upper case changes.
    pub fn split_subtokens(&self, token: &str, mark_end: bool) -> Vec<String> {
        let mut parts: Vec<String> = Vec::new();
        for chunk in token.split(|c: char| c == '_' || c == '-' || c == '.') {
            let mut current = String::new();
            let mut prev: Option<char> = None;
            for c in chunk.chars() {
                let boundary = match prev {
                    Some(p) => (p.is_lowercase() && c.is_uppercase())
                        || (p.is_alphabetic() && c.is_ascii_digit())
                        || (p.is_ascii_digit() && c.is_alphabetic()),
                    None => false,
                };
                if boundary && !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                current.push(c);
                prev = Some(c);
            }
            if !current.is_empty() {
                parts.push(current);
            }
        }

        if parts.is_empty() {
            parts.push(token.to_string());
        }
        if mark_end {
            if let Some(last) = parts.last_mut() {
                last.push_str(SUBTOKEN_END);
            }
        }
        parts
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Languages of the public code-search corpus. Used to infer a record's
/// language from its directory when the record itself does not say.
pub const KNOWN_LANGUAGES: &[&str] = &["python", "javascript", "java", "go", "php", "ruby"];

/// One line of a corpus `.jsonl(.gz)` file.
///
/// Training files carry `code_tokens`, definition dumps carry
/// `function_tokens`; both land in the same field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(alias = "function_tokens", default)]
    pub code_tokens: Vec<String>,

    #[serde(default)]
    pub docstring_tokens: Vec<String>,

    #[serde(default)]
    pub language: String,

    #[serde(default, alias = "func_name")]
    pub identifier: String,

    #[serde(default)]
    pub url: String,
}

impl CorpusRecord {
    /// The record's language, falling back to the first path component
    /// naming a known language.
    pub fn language_or_infer(&self, source: &Path) -> String {
        if !self.language.is_empty() {
            return self.language.clone();
        }
        infer_language(source).unwrap_or_else(|| "unknown".to_string())
    }
}

pub fn infer_language(path: &Path) -> Option<String> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find(|c| KNOWN_LANGUAGES.contains(c))
        .map(str::to_string)
}

// ============================================================
// Layer 6: Code Embedding Cache
// ============================================================
// Encoding every definition of a language is the slowest step
// of prediction, so the result is kept on disk:
//
//   <pickle_path>/<lang>_<tokenizer_type>_dedupe_definitions_v2_codes_encoded.csv
//
// One row per definition, in definition order, one column per
// embedding component. Floats are written in Rust's shortest
// round-trip form, so a reload is bit-identical.
//
// Existence of the file is the only freshness signal: when
// the corpus or the model changes, delete the file.

use std::path::{Path, PathBuf};

use crate::domain::error::{Result, SiameseError};
use crate::infra::table::{read_csv, write_csv};

pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, language: &str, tokenizer_type: &str) -> PathBuf {
        self.dir.join(format!(
            "{language}_{tokenizer_type}_dedupe_definitions_v2_codes_encoded.csv"
        ))
    }

    /// Cached embeddings for the key, or `None` if nothing is cached.
    pub fn load(&self, language: &str, tokenizer_type: &str) -> Result<Option<Vec<Vec<f32>>>> {
        let path = self.path(language, tokenizer_type);
        if !path.is_file() {
            return Ok(None);
        }
        tracing::warn!(
            "Reusing cached {} embeddings from '{}'; delete it if the corpus or model changed",
            language,
            path.display()
        );
        let table = read_csv(&path)?;
        let dim = table.header.len();
        let mut rows = Vec::with_capacity(table.rows.len());
        for (n, row) in table.rows.iter().enumerate() {
            if row.len() != dim {
                return Err(SiameseError::corrupt(
                    &path,
                    "embedding cache",
                    format!("row {} has {} values, expected {dim}", n + 1, row.len()),
                ));
            }
            let values = row
                .iter()
                .map(|v| v.trim().parse::<f32>())
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| SiameseError::corrupt(&path, "embedding cache", format!("row {}: {e}", n + 1)))?;
            rows.push(values);
        }
        Ok(Some(rows))
    }

    pub fn store(&self, language: &str, tokenizer_type: &str, embeddings: &[Vec<f32>]) -> Result<PathBuf> {
        let path = self.path(language, tokenizer_type);
        let dim = embeddings.first().map_or(0, Vec::len);
        let header: Vec<String> = (0..dim).map(|i| i.to_string()).collect();
        let rows = embeddings
            .iter()
            .map(|e| e.iter().map(|v| v.to_string()).collect::<Vec<String>>());
        write_csv(&path, &header, rows)?;
        tracing::info!("Cached {} {} embeddings to '{}'", embeddings.len(), language, path.display());
        Ok(path)
    }
}

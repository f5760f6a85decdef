use serde::{Deserialize, Serialize};

/// One retrieved (query, code definition) pair. Rows are written in
/// query order, then neighbour rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub query:      String,
    pub language:   String,
    pub identifier: String,
    pub url:        String,
}

impl PredictionRecord {
    pub const HEADER: [&'static str; 4] = ["query", "language", "identifier", "url"];

    pub fn to_row(&self) -> [&str; 4] {
        [&self.query, &self.language, &self.identifier, &self.url]
    }
}

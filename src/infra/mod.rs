// ============================================================
// Layer 6: Infrastructure Layer
// ============================================================
// Persistence and file formats shared by the other layers:
//
//   record.rs          → RecordMapping: several Recordables
//                        saved as one atomic directory, and
//                        the registry that restores them
//   tokenizer_store.rs → trains the context tokenizer from
//                        token files, saves and loads it
//   embedding_cache.rs → per-language code embeddings on disk
//   table.rs           → CSV in and out (queries, predictions)
//   metrics.rs         → per-epoch metrics CSV

/// Atomic multi-record persistence
pub mod record;

/// Tokenizer training, saving, and loading
pub mod tokenizer_store;

/// Cached code embeddings keyed by language and tokenizer type
pub mod embedding_cache;

/// CSV tables
pub mod table;

/// Training metrics CSV logger
pub mod metrics;

// ============================================================
// Layer 4: Data Pipeline
// ============================================================
// Everything from corpus files on disk to tensor batches.
//
//   *.jsonl.gz corpus directories
//       │
//       ▼
//   corpus        → lists and parses CorpusRecords
//       │
//       ▼
//   preprocessor  → cleans lines, splits subtokens
//       │
//       ▼
//   dataset       → encodes (query, code) pairs, caches them
//       │
//       ▼
//   splitter      → seeded train/validation split
//       │
//       ▼
//   batcher       → stacks samples into SiameseBatch tensors
//       │
//       ▼
//   DataLoader    → feeds batches to the training loop

/// Finds and parses jsonl(.gz) corpus files
pub mod corpus;

/// Cleans raw lines and splits identifiers into subtokens
pub mod preprocessor;

/// Implements Burn's Dataset trait for encoded Siamese samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;

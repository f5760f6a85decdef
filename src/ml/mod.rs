// ============================================================
// Layer 5: ML / Model Layer (Burn)
// ============================================================
// Everything that touches model weights lives here.
//
//   model.rs    → shared transformer encoder for queries and
//                 code, in-batch softmax loss, MRR
//   pairing.rs  → module + AdamW state saved and restored
//                 as one unit
//   context.rs  → TrainingContext: tokenizer + pairing +
//                 config, train/eval modes, encode paths
//   index.rs    → nearest-neighbour seam and the hnsw_rs
//                 angular implementation
//   trainer.rs  → epoch loop with validation and metrics

/// Siamese transformer encoder and its loss
pub mod model;

/// Model and optimizer persisted together
pub mod pairing;

/// The training context facade
pub mod context;

/// Approximate nearest-neighbour index
pub mod index;

/// Full training loop with validation and checkpointing
pub mod trainer;

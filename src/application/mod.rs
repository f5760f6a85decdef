// ============================================================
// Layer 2: Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal per CLI subcommand.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No argument parsing here (that's Layer 1)
//   - Workflow coordination and anyhow context only
//
// The backend (CPU ndarray or wgpu) is picked here from the
// configuration; the layers below are generic over it.

/// Vocabulary building and token statistics
pub mod tokenizers_use_case;

/// The training workflow
pub mod train_use_case;

/// Retrieval over a saved context
pub mod predict_use_case;

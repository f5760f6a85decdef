// ============================================================
// Layer 3: Core Traits (Abstractions)
// ============================================================
// Two traits describe how stateful components reach the disk:
//
//   Recordable  → "I can write myself under a directory"
//   LoadRecord  → "given that directory, I can come back"
//
// They are split because saving goes through trait objects
// (a RecordMapping holds &dyn Recordable of mixed types) while
// loading needs a concrete Self. The registry in
// infra::record glues the two together by type tag.
//
// Components that need extra inputs to come back (the model
// and optimizer pairing needs a device) implement Recordable
// only and register a loader closure by hand.

use std::path::Path;

use crate::domain::error::Result;

// ─── Recordable ───────────────────────────────────────────────────────────────
/// Any component whose state is saved as one named unit.
///
/// Implementations:
///   - ContextConfig            → config.json
///   - CommonTokensRecord       → common_tokens.json
///   - BpeVocabularyTokenizer   → vocab.json
///   - HuggingfaceBpeTokenizer  → tokenizer.json
///   - ModelAndAdamW            → model + optimizer records
pub trait Recordable {
    /// Stable, fully qualified name of the concrete type. Used as the
    /// sub-directory name so a generic loader can dispatch on it.
    fn type_tag(&self) -> &'static str;

    /// Write the artifact into `dir`, creating it if needed.
    fn save(&self, dir: &Path) -> Result<()>;
}

// ─── LoadRecord ───────────────────────────────────────────────────────────────
/// The restoring half of [`Recordable`] for types that need nothing
/// but a path.
pub trait LoadRecord: Sized {
    const TYPE_TAG: &'static str;

    /// Fails with `NotFound` when no artifact of this type is present and
    /// `CorruptArtifact` when it cannot be deserialised.
    fn load(dir: &Path) -> Result<Self>;
}

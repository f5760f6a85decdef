// ============================================================
// Layer 3: Domain Layer
// ============================================================
// Plain structs, enums and traits that name the concepts of
// the system. No burn types and no file I/O here; the other
// layers implement these traits and pass these types around.
//
//   error       → the SiameseError taxonomy
//   traits      → Recordable / LoadRecord persistence contract
//   config      → ContextConfig and its sections
//   split       → Train / Val / Test
//   definition  → one corpus record
//   prediction  → one retrieved (query, code) row

pub mod config;
pub mod definition;
pub mod error;
pub mod prediction;
pub mod split;
pub mod traits;

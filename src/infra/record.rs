// ============================================================
// Layer 6: Record Mapping
// ============================================================
// Saves a named set of Recordables as one unit and loads it
// back all-or-nothing.
//
// On-disk layout:
//   <dir>/
//     records.json                 ← { name: type_tag, ... }
//     config/<type_tag>/...        ← one sub-tree per entry
//     tokenizer/<type_tag>/...
//     model_optimizer/<type_tag>/...
//
// Save protocol:
//   1. Write everything into a sibling "<dir>.partial"
//   2. Move the previous <dir> (if any) aside
//   3. Rename "<dir>.partial" → <dir>, drop the old copy
// A crash at any point leaves either the old complete
// mapping or a stale ".partial" that the next save clears.
//
// Load protocol:
//   Read records.json, dispatch every entry through the
//   RecordRegistry by its type tag, and only hand back the
//   restored entries once every one of them succeeded.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::config::ContextConfig;
use crate::domain::error::{Result, SiameseError};
use crate::domain::traits::{LoadRecord, Recordable};

const MANIFEST: &str = "records.json";

type Loader = Box<dyn Fn(&Path) -> Result<Box<dyn Any>>>;

// ─── RecordRegistry ───────────────────────────────────────────────────────────
/// Maps a type tag to the closure able to restore it.
#[derive(Default)]
pub struct RecordRegistry {
    loaders: HashMap<&'static str, Loader>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: &'static str,
        loader: impl Fn(&Path) -> Result<Box<dyn Any>> + 'static,
    ) -> &mut Self {
        self.loaders.insert(tag, Box::new(loader));
        self
    }

    /// Register a type that restores from a path alone.
    pub fn register_loadable<T: LoadRecord + 'static>(&mut self) -> &mut Self {
        self.register(T::TYPE_TAG, |dir| Ok(Box::new(T::load(dir)?) as Box<dyn Any>))
    }

    fn load(&self, tag: &str, dir: &Path) -> Result<Box<dyn Any>> {
        let loader = self.loaders.get(tag).ok_or_else(|| {
            SiameseError::corrupt(dir, tag, "no loader registered for this type tag")
        })?;
        loader(dir)
    }
}

// ─── RecordMapping ────────────────────────────────────────────────────────────
/// Named, borrowed set of records to save together.
#[derive(Default)]
pub struct RecordMapping<'a> {
    entries: Vec<(String, &'a dyn Recordable)>,
}

impl<'a> RecordMapping<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, record: &'a dyn Recordable) -> Self {
        self.entries.push((name.into(), record));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let staging = sibling(dir, "partial");
        let previous = sibling(dir, "old");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(SiameseError::io(&staging))?;
        }
        fs::create_dir_all(&staging).map_err(SiameseError::io(&staging))?;

        let mut manifest = BTreeMap::new();
        for (name, record) in &self.entries {
            let tag = record.type_tag();
            let entry_dir = staging.join(name).join(tag);
            fs::create_dir_all(&entry_dir).map_err(SiameseError::io(&entry_dir))?;
            record.save(&entry_dir)?;
            manifest.insert(name.clone(), tag.to_string());
            tracing::debug!("Saved record '{}' ({})", name, tag);
        }
        write_json(&staging.join(MANIFEST), &manifest)?;

        if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(SiameseError::io(parent))?;
        }
        if previous.exists() {
            fs::remove_dir_all(&previous).map_err(SiameseError::io(&previous))?;
        }
        if dir.exists() {
            fs::rename(dir, &previous).map_err(SiameseError::io(dir))?;
        }
        fs::rename(&staging, dir).map_err(SiameseError::io(dir))?;
        if previous.exists() {
            fs::remove_dir_all(&previous).map_err(SiameseError::io(&previous))?;
        }

        tracing::info!("Saved {} records to '{}'", self.entries.len(), dir.display());
        Ok(())
    }

    /// Restore every entry listed in `dir`. Fails as a whole if any
    /// entry is missing, unknown or unreadable.
    pub fn load(dir: &Path, registry: &RecordRegistry) -> Result<RestoredRecords> {
        if !dir.is_dir() {
            return Err(SiameseError::not_found(dir, "record mapping directory"));
        }
        let manifest_path = dir.join(MANIFEST);
        if !manifest_path.is_file() {
            return Err(SiameseError::not_found(&manifest_path, "record mapping manifest"));
        }
        let manifest: BTreeMap<String, String> = read_json(&manifest_path, "record mapping manifest")?;

        let mut entries = HashMap::with_capacity(manifest.len());
        for (name, tag) in &manifest {
            let entry_dir = dir.join(name).join(tag);
            if !entry_dir.is_dir() {
                return Err(SiameseError::corrupt(&entry_dir, tag.as_str(), "entry listed in manifest is missing"));
            }
            let value = registry.load(tag, &entry_dir)?;
            tracing::debug!("Restored record '{}' ({})", name, tag);
            entries.insert(name.clone(), value);
        }

        Ok(RestoredRecords { dir: dir.to_path_buf(), entries })
    }
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}"));
    dir.with_file_name(name)
}

// ─── RestoredRecords ──────────────────────────────────────────────────────────
/// Result of a successful mapping load. Entries are taken out by name
/// and concrete type.
pub struct RestoredRecords {
    dir: PathBuf,
    entries: HashMap<String, Box<dyn Any>>,
}

impl std::fmt::Debug for RestoredRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoredRecords")
            .field("dir", &self.dir)
            .field("entries", &self.names())
            .finish()
    }
}

impl RestoredRecords {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn take<T: 'static>(&mut self, name: &str) -> Result<T> {
        let value = self.entries.remove(name).ok_or_else(|| {
            SiameseError::corrupt(&self.dir, name, "entry missing from record mapping")
        })?;
        value
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SiameseError::corrupt(
                self.dir.join(name),
                std::any::type_name::<T>(),
                "entry has a different type",
            ))
    }
}

// ─── JSON helpers ─────────────────────────────────────────────────────────────
/// Write pretty JSON through a temporary file and rename it into place.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SiameseError::corrupt(path, "json", e))?;
    write_atomic(path, json.as_bytes())
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(SiameseError::io(parent))?;
    }
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, bytes).map_err(SiameseError::io(&tmp))?;
    fs::rename(&tmp, path).map_err(SiameseError::io(path))
}

pub fn read_json<T: DeserializeOwned>(path: &Path, expected: &str) -> Result<T> {
    if !path.is_file() {
        return Err(SiameseError::not_found(path, expected));
    }
    let text = fs::read_to_string(path).map_err(SiameseError::io(path))?;
    serde_json::from_str(&text).map_err(|e| SiameseError::corrupt(path, expected, e))
}

// ─── JSON-backed records ──────────────────────────────────────────────────────
impl Recordable for ContextConfig {
    fn type_tag(&self) -> &'static str {
        <Self as LoadRecord>::TYPE_TAG
    }

    fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join("config.json"), self)
    }
}

impl LoadRecord for ContextConfig {
    const TYPE_TAG: &'static str = "query_code_siamese.domain.config.ContextConfig";

    fn load(dir: &Path) -> Result<Self> {
        read_json(&dir.join("config.json"), "context configuration")
    }
}

/// Read a user-supplied configuration file.
pub fn read_config_file(path: &Path) -> Result<ContextConfig> {
    read_json(path, "context configuration file")
}

/// Most common tokens per language, as counted by the metadata builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonTokensRecord {
    pub tokens: BTreeMap<String, Vec<(String, u64)>>,
}

impl Recordable for CommonTokensRecord {
    fn type_tag(&self) -> &'static str {
        <Self as LoadRecord>::TYPE_TAG
    }

    fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join("common_tokens.json"), self)
    }
}

impl LoadRecord for CommonTokensRecord {
    const TYPE_TAG: &'static str = "query_code_siamese.infra.record.CommonTokensRecord";

    fn load(dir: &Path) -> Result<Self> {
        read_json(&dir.join("common_tokens.json"), "common tokens table")
    }
}

//! Manifest types for incremental backup restore.
//!
//! A manifest records what changed since the previous backup point: the
//! files carried in the archive (`modified`), files to remove (`deleted`)
//! and files renamed in place (`moved`). Section order in the JSON
//! document is kept, since deletes and moves are applied in that order.

use crate::utils::errors::{RestoreError, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// Parsed manifest. Immutable once loaded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Identifier of the preceding backup, absent in older manifests
    #[serde(default)]
    pub lastbackup: Option<String>,

    /// Files that must be present in the archive, keyed by `/`-rooted path
    #[serde(default, deserialize_with = "ordered_entries")]
    pub modified: Vec<(String, ModifiedEntry)>,

    /// Paths to remove from the restore target
    #[serde(default)]
    pub deleted: Vec<String>,

    /// Renames, keyed by destination path
    #[serde(default, deserialize_with = "ordered_entries")]
    pub moved: Vec<(String, MovedEntry)>,
}

/// Producer-defined attributes of a modified file, kept as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifiedEntry {
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedEntry {
    /// Source path of the rename
    pub original: String,
}

impl Manifest {
    /// Parse a manifest from JSON text
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Load and parse the manifest at `path`.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let data = std::fs::read_to_string(path)?;
    Manifest::from_json(&data).map_err(|e| RestoreError::InvalidManifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Deserialize a JSON object into `(key, value)` pairs in document order.
fn ordered_entries<'de, D, T>(deserializer: D) -> std::result::Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object keyed by path")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}

//! Variable snapshots: persisting a session's variable cache.
//!
//! A snapshot is the mirrored `name → Value` cache of one session plus the
//! interpreter kind it came from. Codecs turn it into bytes; the store
//! keeps one file per snapshot under `$XDG_DATA_HOME/ferry/snapshots`.
//!
//! Restoring replays every variable through `set_variable`, so only values
//! the family can render as literals survive the trip.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ferry_types::Value;
use serde::{Deserialize, Serialize};

use crate::family::InterpreterKind;

/// Captured variable cache of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub kind: InterpreterKind,
    pub taken_at: DateTime<Utc>,
    pub variables: BTreeMap<String, Value>,
}

impl VariableSnapshot {
    pub fn new(kind: InterpreterKind, variables: BTreeMap<String, Value>) -> Self {
        Self {
            kind,
            taken_at: Utc::now(),
            variables,
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Serialization format for snapshots.
pub trait SnapshotCodec: Send + Sync {
    /// Short name, also used as the file extension.
    fn name(&self) -> &'static str;

    fn encode(&self, snapshot: &VariableSnapshot) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<VariableSnapshot>;
}

/// Pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, snapshot: &VariableSnapshot) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(snapshot).context("encoding snapshot as JSON")
    }

    fn decode(&self, bytes: &[u8]) -> Result<VariableSnapshot> {
        serde_json::from_slice(bytes).context("decoding JSON snapshot")
    }
}

/// TOML, with each value stored as a JSON string.
///
/// TOML has no null and no heterogeneous arrays, so values are not mapped
/// onto TOML types directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

#[derive(Serialize, Deserialize)]
struct TomlSnapshot {
    kind: InterpreterKind,
    taken_at: DateTime<Utc>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

impl SnapshotCodec for TomlCodec {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn encode(&self, snapshot: &VariableSnapshot) -> Result<Vec<u8>> {
        let variables = snapshot
            .variables
            .iter()
            .map(|(name, value)| {
                serde_json::to_string(value)
                    .map(|json| (name.clone(), json))
                    .with_context(|| format!("encoding variable {name}"))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let doc = TomlSnapshot {
            kind: snapshot.kind,
            taken_at: snapshot.taken_at,
            variables,
        };
        let text = toml::to_string_pretty(&doc).context("encoding snapshot as TOML")?;
        Ok(text.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<VariableSnapshot> {
        let text = std::str::from_utf8(bytes).context("TOML snapshot is not UTF-8")?;
        let doc: TomlSnapshot = toml::from_str(text).context("decoding TOML snapshot")?;

        let variables = doc
            .variables
            .into_iter()
            .map(|(name, json)| {
                serde_json::from_str::<Value>(&json)
                    .map(|value| (name.clone(), value))
                    .with_context(|| format!("decoding variable {name}"))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(VariableSnapshot {
            kind: doc.kind,
            taken_at: doc.taken_at,
            variables,
        })
    }
}

/// Pick a codec from a file extension, defaulting to JSON.
pub fn codec_for_path(path: &Path) -> Box<dyn SnapshotCodec> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Box::new(TomlCodec),
        _ => Box::new(JsonCodec),
    }
}

/// Snapshot files in one directory.
pub struct SnapshotStore {
    dir: PathBuf,
    codec: Box<dyn SnapshotCodec>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, codec: Box<dyn SnapshotCodec>) -> Self {
        Self {
            dir: dir.into(),
            codec,
        }
    }

    /// JSON files under [`crate::paths::snapshot_dir`].
    pub fn default_location() -> Self {
        Self::new(crate::paths::snapshot_dir(), Box::new(JsonCodec))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a snapshot name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.codec.name()))
    }

    /// Write a snapshot, creating the directory if needed.
    pub fn save(&self, name: &str, snapshot: &VariableSnapshot) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating snapshot directory: {}", self.dir.display()))?;

        let path = self.path_for(name);
        let bytes = self.codec.encode(snapshot)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("writing snapshot: {}", path.display()))?;
        tracing::debug!(path = %path.display(), variables = snapshot.len(), "saved snapshot");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<VariableSnapshot> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading snapshot: {}", path.display()))?;
        self.codec
            .decode(&bytes)
            .with_context(|| format!("in snapshot {}", path.display()))
    }

    /// Names of stored snapshots, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let ext = self.codec.name();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("listing snapshots in {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a snapshot. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing snapshot: {}", path.display())),
        }
    }
}

/// Write a snapshot to an explicit file, codec chosen by extension.
pub fn save_to_file(path: &Path, snapshot: &VariableSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory: {}", parent.display()))?;
    }
    let bytes = codec_for_path(path).encode(snapshot)?;
    std::fs::write(path, bytes).with_context(|| format!("writing snapshot: {}", path.display()))
}

/// Read a snapshot from an explicit file, codec chosen by extension.
pub fn load_from_file(path: &Path) -> Result<VariableSnapshot> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading snapshot: {}", path.display()))?;
    codec_for_path(path)
        .decode(&bytes)
        .with_context(|| format!("in snapshot {}", path.display()))
}

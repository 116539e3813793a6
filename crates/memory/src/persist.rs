//! JSON persistence for the bounded store.
//!
//! The whole store is one pretty-printed document:
//!
//! ```json
//! { "version": 1, "records": { "<id>": { ...record... } } }
//! ```
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash mid-write leaves the previous file intact. Loading decodes each
//! entry on its own; a bad entry costs only itself.

use localmind_core::KnowledgeRecord;
use localmind_core::error::PersistenceWarning;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreFile<'a> {
    version: u32,
    records: BTreeMap<&'a str, &'a KnowledgeRecord>,
}

/// Serialize records into the on-disk document.
pub fn encode(records: &[KnowledgeRecord]) -> Result<Vec<u8>, serde_json::Error> {
    let file = StoreFile {
        version: FORMAT_VERSION,
        records: records.iter().map(|r| (r.id(), r)).collect(),
    };
    serde_json::to_vec_pretty(&file)
}

/// Result of reading a store file.
#[derive(Debug, Default)]
pub struct Loaded {
    /// Valid records, ordered by insertion sequence
    pub records: Vec<KnowledgeRecord>,
    /// Entries that failed to decode
    pub skipped: usize,
}

/// Read a store file. A missing file is an empty store; an unreadable or
/// unparseable file is logged and also treated as empty.
pub fn load(path: &Path) -> Loaded {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No memory file yet, starting empty");
            return Loaded::default();
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Memory file unreadable, starting empty");
            return Loaded::default();
        }
    };
    decode(&content, path)
}

fn decode(content: &str, path: &Path) -> Loaded {
    let document: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Memory file is not valid JSON, starting empty");
            return Loaded::default();
        }
    };

    if let Some(version) = document.get("version").and_then(|v| v.as_u64()) {
        if version != u64::from(FORMAT_VERSION) {
            warn!(version, "Memory file has an unexpected format version, loading anyway");
        }
    }

    let Some(entries) = document.get("records").and_then(|r| r.as_object()) else {
        error!(path = %path.display(), "Memory file has no records map, starting empty");
        return Loaded::default();
    };

    let mut loaded = Loaded::default();
    for (key, value) in entries {
        match serde_json::from_value::<KnowledgeRecord>(value.clone()) {
            Ok(record) if record.id() == key => loaded.records.push(record),
            Ok(record) => {
                warn!(key = %key, id = %record.id(), "Skipping memory entry whose key does not match its id");
                loaded.skipped += 1;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping corrupted memory entry");
                loaded.skipped += 1;
            }
        }
    }

    // Stable sort; ties (e.g. files without sequences) keep id order
    loaded.records.sort_by_key(|r| r.sequence());
    loaded
}

/// Serializes file writes and drops any write older than the last one that
/// reached disk.
#[derive(Debug)]
pub struct Persister {
    path: PathBuf,
    last_written: Mutex<u64>,
}

impl Persister {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `payload` as revision `revision`.
    ///
    /// Returns `Ok(false)` when a newer revision is already on disk.
    pub fn write(&self, revision: u64, payload: &[u8]) -> Result<bool, PersistenceWarning> {
        let mut last = self
            .last_written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if revision <= *last {
            debug!(revision, last = *last, "Skipping superseded memory write");
            return Ok(false);
        }

        self.write_atomic(payload).map_err(|e| PersistenceWarning {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        *last = revision;
        debug!(path = %self.path.display(), revision, bytes = payload.len(), "Memory file written");
        Ok(true)
    }

    fn write_atomic(&self, payload: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

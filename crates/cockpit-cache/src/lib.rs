//! Content-addressed cache for task results.
//!
//! Layout under `<root>/.cockpit/.cache/`:
//!
//! ```text
//! manifest.json                       # task id -> currently active hash
//! results/
//!   <safe task id>/                   # ':' replaced by '__'
//!     registry.json                   # all known entries for the task
//!     <input hash>/
//!       outputs/<workspace-relative files>
//!       output.json                   # captured stdout/stderr chunks
//! ```
//!
//! The registry is the source of truth for what was cached; the manifest
//! records which hash is currently materialized in the workspace. Writes to
//! both are serialized within the process; multi-process use is not
//! supported.

mod store;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use cockpit_task_id::TaskId;
use serde::{Deserialize, Serialize};
pub use store::{CacheStats, CacheStore, StoreRequest};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Walk(#[from] cockpit_globwalk::WalkError),
    #[error("invalid cache metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured slice of console output. The chunk list preserves the
/// interleaving order in which the child produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: String,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub relative_path: Utf8PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub input_hash: String,
    pub timestamp: DateTime<Utc>,
    /// Output globs as declared at store time.
    pub outputs: Vec<String>,
    /// Files captured under `outputs/`. Empty is legal and means the run
    /// succeeded without producing restorable files.
    pub cached_files: Vec<CachedFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRegistry {
    #[serde(default)]
    pub entries: BTreeMap<String, RegistryEntry>,
}

/// Which hash is materialized in the workspace for each task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheManifest {
    pub active: BTreeMap<TaskId, String>,
}

/// Result of probing the cache for a `(task, hash)` pair.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub found: bool,
    pub entry: Option<RegistryEntry>,
    /// Whether the manifest says this hash is the one on disk.
    pub is_active: bool,
}

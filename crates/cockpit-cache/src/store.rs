//! Filesystem cache store operations.

use std::{fs, sync::Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use cockpit_globwalk::BASE_EXCLUSIONS;
use cockpit_task_id::TaskId;
use serde::Serialize;
use tracing::debug;

use crate::{
    CacheError, CacheLookup, CacheManifest, CachedFile, OutputChunk, RegistryEntry, TaskRegistry,
};

const MANIFEST_FILE: &str = "manifest.json";
const REGISTRY_FILE: &str = "registry.json";
const OUTPUT_CHUNKS_FILE: &str = "output.json";
const OUTPUTS_DIR: &str = "outputs";
const RESULTS_DIR: &str = "results";

pub struct CacheStore {
    cache_dir: Utf8PathBuf,
    /// Serializes manifest and registry writes within the process. There is
    /// no cross-process coordination.
    meta_lock: Mutex<()>,
}

#[derive(Debug, Clone)]
pub struct StoreRequest<'a> {
    pub task_id: &'a TaskId,
    pub input_hash: &'a str,
    /// Output globs from the task definition.
    pub outputs: &'a [String],
    pub workspace_path: &'a Utf8Path,
    pub output_chunks: &'a [OutputChunk],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub tasks: usize,
    pub total_entries: usize,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<Utf8PathBuf>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(cache_dir.join(RESULTS_DIR))?;
        Ok(Self {
            cache_dir,
            meta_lock: Mutex::new(()),
        })
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.cache_dir.join(MANIFEST_FILE)
    }

    fn task_dir(&self, task_id: &TaskId) -> Utf8PathBuf {
        self.cache_dir.join(RESULTS_DIR).join(task_id.safe_name())
    }

    fn hash_dir(&self, task_id: &TaskId, input_hash: &str) -> Utf8PathBuf {
        self.task_dir(task_id).join(input_hash)
    }

    /// A missing or corrupt registry reads as empty.
    fn load_registry(&self, task_id: &TaskId) -> TaskRegistry {
        read_json(&self.task_dir(task_id).join(REGISTRY_FILE)).unwrap_or_default()
    }

    fn load_manifest(&self) -> CacheManifest {
        read_json(&self.manifest_path()).unwrap_or_default()
    }

    pub fn lookup(&self, task_id: &TaskId, input_hash: &str) -> CacheLookup {
        let registry = self.load_registry(task_id);
        let mut manifest = self.load_manifest();

        // The manifest must never point at a hash the registry does not know
        if let Some(active) = manifest.active.get(task_id) {
            if !registry.entries.contains_key(active) {
                let _guard = self.meta_lock.lock().expect("cache lock poisoned");
                manifest.active.remove(task_id);
                self.persist_manifest(&manifest);
            }
        }

        let entry = registry.entries.get(input_hash).cloned();
        let is_active = manifest
            .active
            .get(task_id)
            .is_some_and(|active| active == input_hash);
        CacheLookup {
            found: entry.is_some(),
            entry,
            is_active,
        }
    }

    pub fn has(&self, task_id: &TaskId, input_hash: &str) -> bool {
        self.lookup(task_id, input_hash).found
    }

    /// Whether every file recorded for the entry still exists in the
    /// workspace. An entry with no cached files is vacuously present.
    pub fn has_outputs_on_disk(
        &self,
        task_id: &TaskId,
        input_hash: &str,
        workspace_path: &Utf8Path,
    ) -> bool {
        let registry = self.load_registry(task_id);
        let Some(entry) = registry.entries.get(input_hash) else {
            return false;
        };
        entry
            .cached_files
            .iter()
            .all(|file| workspace_path.join(&file.relative_path).as_std_path().exists())
    }

    /// Copy an entry's files back into the workspace. Returns `None` when the
    /// entry carries nothing restorable (no cached files, or the outputs
    /// directory is gone); otherwise the number of files copied. Individual
    /// copy failures are skipped.
    pub fn restore_outputs(
        &self,
        task_id: &TaskId,
        input_hash: &str,
        workspace_path: &Utf8Path,
    ) -> Option<usize> {
        let registry = self.load_registry(task_id);
        let entry = registry.entries.get(input_hash)?;
        if entry.cached_files.is_empty() {
            return None;
        }
        let outputs_dir = self.hash_dir(task_id, input_hash).join(OUTPUTS_DIR);
        if !outputs_dir.as_std_path().is_dir() {
            return None;
        }

        let mut restored = 0;
        for file in &entry.cached_files {
            let source = outputs_dir.join(&file.relative_path);
            let target = workspace_path.join(&file.relative_path);
            if let Err(err) = copy_creating_dirs(&source, &target) {
                debug!("failed to restore {source}: {err}");
                continue;
            }
            restored += 1;
        }

        if restored > 0 {
            let _guard = self.meta_lock.lock().expect("cache lock poisoned");
            let mut manifest = self.load_manifest();
            manifest
                .active
                .insert(task_id.clone(), input_hash.to_string());
            self.persist_manifest(&manifest);
        }
        Some(restored)
    }

    /// Capture a successful run. Replaces any existing entry for the hash,
    /// copies the expanded output files into the cache, records the chunk
    /// log, and marks the hash active. Individual file copy failures are
    /// skipped; tasks with overlapping outputs are not detected and the last
    /// store wins.
    pub fn store(&self, request: StoreRequest<'_>) -> Result<(), CacheError> {
        let StoreRequest {
            task_id,
            input_hash,
            outputs,
            workspace_path,
            output_chunks,
        } = request;

        let matched = cockpit_globwalk::globwalk(workspace_path, outputs, BASE_EXCLUSIONS)?;

        let task_dir = self.task_dir(task_id);
        let hash_dir = self.hash_dir(task_id, input_hash);
        let staging = task_dir.join(format!(".{input_hash}.{}.tmp", std::process::id()));
        let staging_outputs = staging.join(OUTPUTS_DIR);
        fs::create_dir_all(&staging_outputs)?;

        let mut cached_files = Vec::with_capacity(matched.len());
        for relative in matched {
            let source = workspace_path.join(&relative);
            let target = staging_outputs.join(&relative);
            match copy_creating_dirs(&source, &target) {
                Ok(size) => cached_files.push(CachedFile {
                    relative_path: relative,
                    size,
                }),
                Err(err) => debug!("skipping output {source}: {err}"),
            }
        }

        write_json(&staging.join(OUTPUT_CHUNKS_FILE), &output_chunks.to_vec())?;

        // Swap the staged directory in, replacing any previous entry
        if hash_dir.as_std_path().exists() {
            fs::remove_dir_all(&hash_dir)?;
        }
        fs::rename(&staging, &hash_dir)?;

        let _guard = self.meta_lock.lock().expect("cache lock poisoned");
        let mut registry = self.load_registry(task_id);
        registry.entries.insert(
            input_hash.to_string(),
            RegistryEntry {
                input_hash: input_hash.to_string(),
                timestamp: Utc::now(),
                outputs: outputs.to_vec(),
                cached_files,
            },
        );
        self.persist_registry(task_id, &registry);

        let mut manifest = self.load_manifest();
        manifest
            .active
            .insert(task_id.clone(), input_hash.to_string());
        self.persist_manifest(&manifest);
        Ok(())
    }

    /// Drop one entry, or the task's whole cache when no hash is given. The
    /// manifest entry is cleared when it pointed at what was removed.
    pub fn invalidate(&self, task_id: &TaskId, input_hash: Option<&str>) {
        let _guard = self.meta_lock.lock().expect("cache lock poisoned");
        let mut manifest = self.load_manifest();
        match input_hash {
            Some(input_hash) => {
                remove_dir_quietly(&self.hash_dir(task_id, input_hash));
                let mut registry = self.load_registry(task_id);
                registry.entries.remove(input_hash);
                self.persist_registry(task_id, &registry);
                if manifest.active.get(task_id).map(String::as_str) == Some(input_hash) {
                    manifest.active.remove(task_id);
                }
            }
            None => {
                remove_dir_quietly(&self.task_dir(task_id));
                manifest.active.remove(task_id);
            }
        }
        self.persist_manifest(&manifest);
    }

    pub fn get_output_chunks(&self, task_id: &TaskId, input_hash: &str) -> Option<Vec<OutputChunk>> {
        read_json(&self.hash_dir(task_id, input_hash).join(OUTPUT_CHUNKS_FILE))
    }

    pub fn list_entries(&self, task_id: &TaskId) -> Vec<RegistryEntry> {
        self.load_registry(task_id).entries.into_values().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            tasks: 0,
            total_entries: 0,
        };
        let Ok(entries) = fs::read_dir(self.cache_dir.join(RESULTS_DIR).as_std_path()) else {
            return stats;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let registry: TaskRegistry =
                read_json_std(&entry.path().join(REGISTRY_FILE)).unwrap_or_default();
            if registry.entries.is_empty() {
                continue;
            }
            stats.tasks += 1;
            stats.total_entries += registry.entries.len();
        }
        stats
    }

    /// Remove every cached entry and the manifest.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.meta_lock.lock().expect("cache lock poisoned");
        remove_dir_quietly(&self.cache_dir.join(RESULTS_DIR));
        let manifest = self.manifest_path();
        if manifest.as_std_path().exists() {
            fs::remove_file(&manifest)?;
        }
        fs::create_dir_all(self.cache_dir.join(RESULTS_DIR))?;
        Ok(())
    }

    fn persist_registry(&self, task_id: &TaskId, registry: &TaskRegistry) {
        let path = self.task_dir(task_id).join(REGISTRY_FILE);
        if let Err(err) = write_json(&path, registry) {
            debug!("failed to persist registry for {task_id}: {err}");
        }
    }

    fn persist_manifest(&self, manifest: &CacheManifest) {
        if let Err(err) = write_json(&self.manifest_path(), manifest) {
            debug!("failed to persist cache manifest: {err}");
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Option<T> {
    read_json_std(path.as_std_path())
}

fn read_json_std<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Option<T> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("treating corrupt cache file {} as empty: {err}", path.display());
            None
        }
    }
}

/// Write-to-temp-then-rename so readers never observe a partial file.
fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path.file_name().unwrap_or("cache.json");
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    fs::write(&temp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&temp, path)?;
    Ok(())
}

fn copy_creating_dirs(source: &Utf8Path, target: &Utf8Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)
}

fn remove_dir_quietly(dir: &Utf8Path) {
    if dir.as_std_path().exists() {
        if let Err(err) = fs::remove_dir_all(dir) {
            debug!("failed to remove {dir}: {err}");
        }
    }
}

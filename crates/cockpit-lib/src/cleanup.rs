//! Cleanup engine.
//!
//! Expands a task's cleanup patterns (its declared outputs or an explicit
//! glob list), deletes everything they resolve to, and invalidates the
//! task's entire cache entry afterwards so stale hashes cannot replay
//! deleted artifacts. Per-path failures are collected, not fatal.

use std::fs;

use camino::Utf8PathBuf;
use cockpit_cache::CacheStore;
use cockpit_globwalk::BASE_EXCLUSIONS;
use cockpit_task_id::TaskId;
use cockpit_workspaces::{CleanupSpec, WorkspaceModel};
use tracing::debug;

use crate::Error;

#[derive(Debug, Default)]
pub struct CleanupResult {
    /// Workspace-relative paths removed (or, under dry-run, that would be).
    pub deleted: Vec<Utf8PathBuf>,
    pub errors: Vec<(Utf8PathBuf, String)>,
    pub dry_run: bool,
}

pub struct CleanupEngine<'a> {
    model: &'a WorkspaceModel,
    cache: Option<&'a CacheStore>,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(model: &'a WorkspaceModel, cache: Option<&'a CacheStore>) -> Self {
        Self { model, cache }
    }

    pub fn cleanup(&self, task_id: &TaskId, dry_run: bool) -> Result<CleanupResult, Error> {
        let Some(definition) = self.model.task_definition(task_id) else {
            return Err(cockpit_engine::Error::TaskNotFound {
                task: task_id.clone(),
                available: self.model.available_tasks(task_id.workspace()),
            }
            .into());
        };
        let Some(workspace_path) = self.model.workspace_path(task_id.workspace()) else {
            return Err(cockpit_engine::Error::WorkspaceNotFound {
                workspace: task_id.workspace().to_string(),
                available: Vec::new(),
            }
            .into());
        };

        let patterns: Vec<String> = match &definition.cleanup {
            Some(CleanupSpec::Outputs) => definition.outputs.clone().unwrap_or_default(),
            Some(CleanupSpec::Globs(globs)) => globs.clone(),
            None => Vec::new(),
        };
        let mut result = CleanupResult {
            dry_run,
            ..CleanupResult::default()
        };
        if patterns.is_empty() {
            return Ok(result);
        }

        let resolved =
            cockpit_globwalk::globwalk_with_direct_paths(workspace_path, &patterns, BASE_EXCLUSIONS)?;

        for relative in resolved {
            let absolute = workspace_path.join(&relative);
            if dry_run {
                result.deleted.push(relative);
                continue;
            }
            let removal = match absolute.as_std_path().symlink_metadata() {
                Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(absolute.as_std_path()),
                Ok(_) => fs::remove_file(absolute.as_std_path()),
                // Already gone, typically because a parent directory in the
                // same batch was removed first
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{absolute} vanished before cleanup reached it");
                    continue;
                }
                Err(err) => Err(err),
            };
            match removal {
                Ok(()) => result.deleted.push(relative),
                Err(err) => result.errors.push((relative, err.to_string())),
            }
        }

        if !dry_run && !result.deleted.is_empty() {
            if let Some(cache) = self.cache {
                cache.invalidate(task_id, None);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    fn model(root: &Utf8PathBuf, cleanup: serde_json::Value) -> WorkspaceModel {
        serde_json::from_value(serde_json::json!({
            "root": root,
            "workspaces": {},
            "taskConfigs": {
                "": {
                    "tasks": {
                        "build": {
                            "command": "make",
                            "outputs": ["dist/**"],
                            "cleanup": cleanup
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("dist/assets")).unwrap();
        fs::write(root.join("dist/app.js"), "js").unwrap();
        fs::write(root.join("dist/assets/logo.svg"), "svg").unwrap();
        fs::write(root.join("keep.txt"), "keep").unwrap();
        (dir, root)
    }

    #[test]
    fn test_cleanup_outputs_mode_deletes_declared_outputs() {
        let (_dir, root) = scratch();
        let model = model(&root, serde_json::json!("outputs"));
        let task_id = TaskId::new("", "build");

        let result = CleanupEngine::new(&model, None)
            .cleanup(&task_id, false)
            .unwrap();
        assert_eq!(result.deleted.len(), 2);
        assert!(result.errors.is_empty());
        assert!(!root.join("dist/app.js").as_std_path().exists());
        assert!(root.join("keep.txt").as_std_path().exists());
    }

    #[test]
    fn test_cleanup_glob_list_with_direct_directory() {
        let (_dir, root) = scratch();
        let model = model(&root, serde_json::json!(["dist"]));
        let task_id = TaskId::new("", "build");

        let result = CleanupEngine::new(&model, None)
            .cleanup(&task_id, false)
            .unwrap();
        assert_eq!(result.deleted, vec![Utf8PathBuf::from("dist")]);
        assert!(!root.join("dist").as_std_path().exists());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let (_dir, root) = scratch();
        let model = model(&root, serde_json::json!("outputs"));
        let task_id = TaskId::new("", "build");

        let result = CleanupEngine::new(&model, None)
            .cleanup(&task_id, true)
            .unwrap();
        assert!(result.dry_run);
        assert_eq!(result.deleted.len(), 2);
        assert!(root.join("dist/app.js").as_std_path().exists());
    }

    #[test]
    fn test_cleanup_invalidates_cache() {
        let (_dir, root) = scratch();
        let model = model(&root, serde_json::json!("outputs"));
        let task_id = TaskId::new("", "build");
        let store = CacheStore::new(root.join(".cockpit/.cache")).unwrap();
        store
            .store(cockpit_cache::StoreRequest {
                task_id: &task_id,
                input_hash: "abc",
                outputs: &["dist/**".to_string()],
                workspace_path: &root,
                output_chunks: &[],
            })
            .unwrap();
        assert!(store.has(&task_id, "abc"));

        CleanupEngine::new(&model, Some(&store))
            .cleanup(&task_id, false)
            .unwrap();
        assert!(!store.has(&task_id, "abc"));
    }

    #[test]
    fn test_cleanup_without_spec_is_a_no_op() {
        let (_dir, root) = scratch();
        let model: WorkspaceModel = serde_json::from_value(serde_json::json!({
            "root": root,
            "workspaces": {},
            "taskConfigs": {
                "": { "tasks": { "build": { "command": "make" } } }
            }
        }))
        .unwrap();
        let result = CleanupEngine::new(&model, None)
            .cleanup(&TaskId::new("", "build"), false)
            .unwrap();
        assert!(result.deleted.is_empty());
        assert!(root.join("dist/app.js").as_std_path().exists());
    }

    #[test]
    fn test_unknown_task_errors() {
        let (_dir, root) = scratch();
        let model = model(&root, serde_json::json!("outputs"));
        let err = CleanupEngine::new(&model, None)
            .cleanup(&TaskId::new("", "nope"), false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Graph(cockpit_engine::Error::TaskNotFound { .. })
        ));
    }
}

//! Bridge from `.cockpit/config.json` to the workspace model.
//!
//! The full configuration system (with its TypeScript definition files)
//! lives outside this repository; this adapter covers the JSON subset so
//! the binary is usable standalone. Workspace paths in the file are
//! relative to the monorepo root and are resolved here, once.

use std::{collections::HashMap, fs};

use camino::{Utf8Path, Utf8PathBuf};
use cockpit_workspaces::{TaskConfig, WorkspaceInfo, WorkspaceModel, COCKPIT_DIR};
use serde::Deserialize;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no {COCKPIT_DIR} directory found in {start} or any parent")]
    NotFound { start: Utf8PathBuf },
    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    default_workspace: Option<String>,
    #[serde(default)]
    workspaces: HashMap<String, WorkspaceEntry>,
    #[serde(default)]
    task_configs: HashMap<String, TaskConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceEntry {
    /// Relative to the monorepo root.
    path: Utf8PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Walk upward from the starting directory to the first `.cockpit` marker.
pub fn find_root(start: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let mut current = start;
    loop {
        if current.join(COCKPIT_DIR).as_std_path().is_dir() {
            return Ok(current.to_owned());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => {
                return Err(ConfigError::NotFound {
                    start: start.to_owned(),
                })
            }
        }
    }
}

pub fn load_model(root: &Utf8Path) -> Result<WorkspaceModel, ConfigError> {
    let path = root.join(COCKPIT_DIR).join(CONFIG_FILE);
    let contents = fs::read_to_string(path.as_std_path()).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config: ConfigFile =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;

    let workspaces = config
        .workspaces
        .into_iter()
        .map(|(id, entry)| {
            let info = WorkspaceInfo {
                name: entry.name.unwrap_or_else(|| id.clone()),
                abs_path: root.join(&entry.path),
                rel_path: entry.path,
                tags: entry.tags,
                depends_on: entry.depends_on,
                id: id.clone(),
            };
            (id, info)
        })
        .collect();

    Ok(WorkspaceModel {
        root: root.to_owned(),
        workspaces,
        task_configs: config.task_configs,
        default_workspace: config.default_workspace,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join(".cockpit")).unwrap();
        fs::create_dir_all(root.join("packages/web/src")).unwrap();

        let found = find_root(&root.join("packages/web/src")).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn test_find_root_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        assert!(find_root(&root).is_err());
    }

    #[test]
    fn test_load_model_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join(".cockpit")).unwrap();
        fs::write(
            root.join(".cockpit/config.json"),
            serde_json::json!({
                "defaultWorkspace": "web",
                "workspaces": {
                    "web": { "path": "apps/web", "tags": ["app"] }
                },
                "taskConfigs": {
                    "web": { "tasks": { "build": { "command": "vite build" } } }
                }
            })
            .to_string(),
        )
        .unwrap();

        let model = load_model(&root).unwrap();
        assert_eq!(model.default_workspace.as_deref(), Some("web"));
        assert_eq!(
            model.workspaces["web"].abs_path,
            root.join("apps/web")
        );
        assert!(model
            .task_definition(&cockpit_task_id::TaskId::new("web", "build"))
            .is_some());
    }
}

//! The workspace model consumed by the core.
//!
//! The configuration loader that produces these values lives outside this
//! workspace; the types here are the contract it fills in. Workspace ids are
//! plain strings with the empty string denoting the monorepo root, task
//! tables are keyed by task name, and every path is absolute by the time it
//! reaches the core.

mod task_definition;

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use cockpit_task_id::{TaskId, ROOT_WORKSPACE};
use serde::{Deserialize, Serialize};
pub use task_definition::{CleanupSpec, Platform, TaskCommand, TaskDefinition, TaskRef};

pub type WorkspaceId = String;

/// Directory inside the monorepo root that holds user configuration; the
/// cache lives underneath it.
pub const COCKPIT_DIR: &str = ".cockpit";
pub const CACHE_DIR: &str = ".cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: WorkspaceId,
    pub name: String,
    pub abs_path: Utf8PathBuf,
    pub rel_path: Utf8PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<WorkspaceId>,
}

/// Per-workspace task table plus the workspace-level environment overlay
/// applied to every task in it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default)]
    pub tasks: HashMap<String, TaskDefinition>,
    #[serde(default)]
    pub env: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceModel {
    /// Absolute path of the monorepo root.
    pub root: Utf8PathBuf,
    /// All workspaces except the root; the root's id is `""` and is not in
    /// this map.
    #[serde(default)]
    pub workspaces: HashMap<WorkspaceId, WorkspaceInfo>,
    #[serde(default)]
    pub task_configs: HashMap<WorkspaceId, TaskConfig>,
    #[serde(default)]
    pub default_workspace: Option<WorkspaceId>,
}

impl WorkspaceModel {
    /// Absolute path of a workspace; the root workspace resolves to the
    /// monorepo root itself.
    pub fn workspace_path(&self, workspace: &str) -> Option<&Utf8Path> {
        if workspace == ROOT_WORKSPACE {
            return Some(&self.root);
        }
        self.workspaces
            .get(workspace)
            .map(|info| info.abs_path.as_path())
    }

    pub fn has_workspace(&self, workspace: &str) -> bool {
        workspace == ROOT_WORKSPACE || self.workspaces.contains_key(workspace)
    }

    pub fn task_definition(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.task_configs
            .get(id.workspace())
            .and_then(|config| config.tasks.get(id.task()))
    }

    /// Workspace-level env overlay for the workspace a task lives in.
    pub fn workspace_env(
        &self,
        workspace: &str,
    ) -> Option<&std::collections::BTreeMap<String, String>> {
        self.task_configs
            .get(workspace)
            .and_then(|config| config.env.as_ref())
    }

    /// Task names available in a workspace, sorted. Used for not-found error
    /// reporting.
    pub fn available_tasks(&self, workspace: &str) -> Vec<String> {
        let mut names: Vec<_> = self
            .task_configs
            .get(workspace)
            .map(|config| config.tasks.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Workspace ids (root included) that define a task with this name, in
    /// sorted order.
    pub fn workspaces_with_task(&self, task: &str) -> Vec<WorkspaceId> {
        let mut ids: Vec<_> = self
            .task_configs
            .iter()
            .filter(|(_, config)| config.tasks.contains_key(task))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every task id defined anywhere in the model, in sorted order.
    pub fn all_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .task_configs
            .iter()
            .flat_map(|(workspace, config)| {
                config
                    .tasks
                    .keys()
                    .map(|task| TaskId::new(workspace.clone(), task.clone()))
            })
            .collect();
        ids.sort();
        ids
    }

    /// Workspace ids carrying a tag, sorted.
    pub fn workspaces_with_tag(&self, tag: &str) -> Vec<WorkspaceId> {
        let mut ids: Vec<_> = self
            .workspaces
            .values()
            .filter(|info| info.tags.iter().any(|t| t == tag))
            .map(|info| info.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn cockpit_dir(&self) -> Utf8PathBuf {
        self.root.join(COCKPIT_DIR)
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.cockpit_dir().join(CACHE_DIR)
    }
}

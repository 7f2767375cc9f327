//! Graph construction.
//!
//! A breadth-first closure from the requested roots. Each dequeued task is
//! looked up in its workspace's task table, its references are resolved
//! against that workspace, and unvisited dependencies join the frontier.
//! Optional references to missing tasks are dropped; required ones fail the
//! build. The full-graph constructor is lenient instead: with every task
//! already a root, a reference that resolves to nothing is simply filtered
//! so unresolved externals land in level zero.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use cockpit_task_id::TaskId;
use cockpit_workspaces::{WorkspaceId, WorkspaceModel};
use petgraph::Graph;
use tracing::{debug, trace};

use crate::{sort, Error, ResolvedTask, TaskGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingDependency {
    /// A required reference to a missing task fails the build.
    Fail,
    /// Every unresolved reference is dropped.
    Drop,
}

pub struct GraphBuilder<'a> {
    model: &'a WorkspaceModel,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(model: &'a WorkspaceModel) -> Self {
        Self { model }
    }

    /// Graph for one task in one workspace.
    pub fn build_for_task(&self, task: &str, workspace: &str) -> Result<TaskGraph, Error> {
        if !self.model.has_workspace(workspace) {
            return Err(self.workspace_not_found(workspace));
        }
        self.build(vec![TaskId::new(workspace, task)], MissingDependency::Fail)
    }

    /// Graph for the same task name across several workspaces; workspaces
    /// that do not define the task are skipped.
    pub fn build_for_workspaces(
        &self,
        task: &str,
        workspaces: &[WorkspaceId],
    ) -> Result<TaskGraph, Error> {
        let mut roots = Vec::new();
        for workspace in workspaces {
            if !self.model.has_workspace(workspace) {
                return Err(self.workspace_not_found(workspace));
            }
            let id = TaskId::new(workspace.clone(), task);
            if self.model.task_definition(&id).is_some() {
                roots.push(id);
            } else {
                trace!("workspace {workspace} does not define {task}, skipping");
            }
        }
        if roots.is_empty() {
            return Err(Error::TaskNotFound {
                task: TaskId::new("", task),
                available: Vec::new(),
            });
        }
        self.build(roots, MissingDependency::Fail)
    }

    /// Graph over every task in every workspace. Dependency lists are
    /// filtered to tasks that exist, so nothing can fail resolution.
    pub fn build_full(&self) -> Result<TaskGraph, Error> {
        self.build(self.model.all_task_ids(), MissingDependency::Drop)
    }

    fn build(&self, roots: Vec<TaskId>, missing: MissingDependency) -> Result<TaskGraph, Error> {
        let mut tasks: HashMap<TaskId, ResolvedTask> = HashMap::new();
        let mut insertion_order: Vec<TaskId> = Vec::new();
        let mut queue: VecDeque<TaskId> = roots.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            if tasks.contains_key(&id) {
                continue;
            }
            let Some(definition) = self.model.task_definition(&id) else {
                return Err(Error::TaskNotFound {
                    available: self.model.available_tasks(id.workspace()),
                    task: id,
                });
            };

            let mut dependencies = Vec::new();
            for reference in &definition.depends_on {
                let (dependency, optional) = reference.resolve(id.workspace());
                if self.model.task_definition(&dependency).is_none() {
                    if optional || missing == MissingDependency::Drop {
                        debug!("dropping unresolved dependency {dependency} of {id}");
                        continue;
                    }
                    return Err(Error::TaskNotFound {
                        available: self.model.available_tasks(dependency.workspace()),
                        task: dependency,
                    });
                }
                if !dependencies.contains(&dependency) {
                    dependencies.push(dependency.clone());
                }
                queue.push_back(dependency);
            }

            insertion_order.push(id.clone());
            tasks.insert(
                id.clone(),
                ResolvedTask {
                    workspace_id: id.workspace().to_string(),
                    name: id.task().to_string(),
                    definition: Arc::new(definition.clone()),
                    dependencies,
                    id,
                },
            );
        }

        // Materialize the petgraph view in insertion order so downstream
        // ordering is stable
        let mut graph = Graph::new();
        let mut lookup = HashMap::new();
        for id in &insertion_order {
            lookup.insert(id.clone(), graph.add_node(id.clone()));
        }
        for task in tasks.values() {
            let from = lookup[&task.id];
            for dependency in &task.dependencies {
                graph.add_edge(from, lookup[dependency], ());
            }
        }

        let execution_order = sort::topological_order(&graph)?;
        let parallel_levels = sort::parallel_levels(&graph)?;

        let mut root_tasks = Vec::new();
        for root in roots {
            if !root_tasks.contains(&root) {
                root_tasks.push(root);
            }
        }

        Ok(TaskGraph {
            tasks,
            graph,
            lookup,
            execution_order,
            parallel_levels,
            root_tasks,
        })
    }

    fn workspace_not_found(&self, workspace: &str) -> Error {
        let mut available: Vec<String> = self.model.workspaces.keys().cloned().collect();
        available.sort();
        Error::WorkspaceNotFound {
            workspace: workspace.to_string(),
            available,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Three workspaces: web -> {core, utils}, utils -> core.
    fn model() -> WorkspaceModel {
        serde_json::from_value(serde_json::json!({
            "root": "/repo",
            "workspaces": {
                "core": { "id": "core", "name": "core", "absPath": "/repo/core", "relPath": "core" },
                "utils": { "id": "utils", "name": "utils", "absPath": "/repo/utils", "relPath": "utils" },
                "web": { "id": "web", "name": "web", "absPath": "/repo/web", "relPath": "web" }
            },
            "taskConfigs": {
                "core": { "tasks": { "build": { "command": "build core" } } },
                "utils": {
                    "tasks": { "build": { "command": "build utils", "dependsOn": ["core:build"] } }
                },
                "web": {
                    "tasks": {
                        "build": {
                            "command": "build web",
                            "dependsOn": ["core:build", "utils:build"]
                        },
                        "deploy": { "command": "deploy", "dependsOn": ["build"] }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn id(raw: &str) -> TaskId {
        TaskId::from_raw(raw)
    }

    #[test]
    fn test_single_task_closure() {
        let model = model();
        let graph = GraphBuilder::new(&model).build_for_task("build", "web").unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.execution_order(),
            &[id("core:build"), id("utils:build"), id("web:build")]
        );
        assert_eq!(
            graph.parallel_levels(),
            &[
                vec![id("core:build")],
                vec![id("utils:build")],
                vec![id("web:build")],
            ]
        );
        assert_eq!(graph.root_tasks(), &[id("web:build")]);
    }

    #[test]
    fn test_local_reference_resolves_in_own_workspace() {
        let model = model();
        let graph = GraphBuilder::new(&model)
            .build_for_task("deploy", "web")
            .unwrap();
        let deploy = graph.task(&id("web:deploy")).unwrap();
        assert_eq!(deploy.dependencies, vec![id("web:build")]);
    }

    #[test]
    fn test_missing_task_reports_available() {
        let model = model();
        let err = GraphBuilder::new(&model)
            .build_for_task("test", "web")
            .unwrap_err();
        let Error::TaskNotFound { task, available } = err else {
            panic!("expected task not found");
        };
        assert_eq!(task, id("web:test"));
        assert_eq!(available, vec!["build", "deploy"]);
    }

    #[test]
    fn test_missing_workspace() {
        let model = model();
        let err = GraphBuilder::new(&model)
            .build_for_task("build", "nope")
            .unwrap_err();
        let Error::WorkspaceNotFound { workspace, available } = err else {
            panic!("expected workspace not found");
        };
        assert_eq!(workspace, "nope");
        assert_eq!(available, vec!["core", "utils", "web"]);
    }

    #[test]
    fn test_missing_required_dependency_fails() {
        let mut model = model();
        model
            .task_configs
            .get_mut("web")
            .unwrap()
            .tasks
            .insert(
                "bad".to_string(),
                serde_json::from_value(serde_json::json!({
                    "command": "x",
                    "dependsOn": ["core:nonexistent"]
                }))
                .unwrap(),
            );
        let err = GraphBuilder::new(&model).build_for_task("bad", "web").unwrap_err();
        assert!(matches!(
            err,
            Error::TaskNotFound { task, .. } if task == id("core:nonexistent")
        ));
    }

    #[test]
    fn test_optional_missing_dependency_is_dropped() {
        let mut model = model();
        model
            .task_configs
            .get_mut("web")
            .unwrap()
            .tasks
            .insert(
                "tolerant".to_string(),
                serde_json::from_value(serde_json::json!({
                    "command": "x",
                    "dependsOn": [
                        { "task": "core:nonexistent", "optional": true },
                        "core:build"
                    ]
                }))
                .unwrap(),
            );
        let graph = GraphBuilder::new(&model)
            .build_for_task("tolerant", "web")
            .unwrap();
        let task = graph.task(&id("web:tolerant")).unwrap();
        assert_eq!(task.dependencies, vec![id("core:build")]);
    }

    #[test]
    fn test_multi_workspace_roots_skip_absent_tasks() {
        let model = model();
        let graph = GraphBuilder::new(&model)
            .build_for_workspaces(
                "deploy",
                &["core".to_string(), "web".to_string()],
            )
            .unwrap();
        assert_eq!(graph.root_tasks(), &[id("web:deploy")]);
        // closure pulls the build chain in
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_multi_workspace_unknown_task_everywhere() {
        let model = model();
        let err = GraphBuilder::new(&model)
            .build_for_workspaces("publish", &["core".to_string(), "web".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound { .. }));
    }

    #[test]
    fn test_full_graph_includes_everything() {
        let model = model();
        let graph = GraphBuilder::new(&model).build_full().unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.root_tasks().len(), 4);
        // core:build has no dependencies, so it sits in level zero
        assert!(graph.parallel_levels()[0].contains(&id("core:build")));
    }

    #[test]
    fn test_full_graph_drops_unresolved_externals() {
        let mut model = model();
        model
            .task_configs
            .get_mut("core")
            .unwrap()
            .tasks
            .insert(
                "codegen".to_string(),
                serde_json::from_value(serde_json::json!({
                    "command": "x",
                    "dependsOn": ["vendor:generate"]
                }))
                .unwrap(),
            );
        let graph = GraphBuilder::new(&model).build_full().unwrap();
        let codegen = graph.task(&id("core:codegen")).unwrap();
        assert!(codegen.dependencies.is_empty());
        assert!(graph.parallel_levels()[0].contains(&id("core:codegen")));
    }

    #[test]
    fn test_cycle_detection_with_witness() {
        let mut model = model();
        let tasks = &mut model.task_configs.get_mut("core").unwrap().tasks;
        tasks.insert(
            "a".to_string(),
            serde_json::from_value(serde_json::json!({ "command": "x", "dependsOn": ["b"] }))
                .unwrap(),
        );
        tasks.insert(
            "b".to_string(),
            serde_json::from_value(serde_json::json!({ "command": "x", "dependsOn": ["a"] }))
                .unwrap(),
        );
        let err = GraphBuilder::new(&model).build_for_task("a", "core").unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle");
        };
        assert!(cycle.contains(&id("core:a")));
        assert!(cycle.contains(&id("core:b")));
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_transitive_closures() {
        let model = model();
        let graph = GraphBuilder::new(&model).build_for_task("build", "web").unwrap();
        let deps = graph.transitive_dependencies(&id("web:build"));
        assert_eq!(deps.len(), 2);
        let dependents = graph.transitive_dependents(&id("core:build"));
        assert!(dependents.contains(&id("web:build")));
        assert!(dependents.contains(&id("utils:build")));
    }
}

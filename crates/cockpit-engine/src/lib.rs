//! Task graph resolution.
//!
//! The builder closes over the requested roots breadth-first, resolving each
//! task's references against its own workspace, and produces a [`TaskGraph`]:
//! the resolved task map, a topological execution order, the parallel level
//! partition, and the roots the request named. Cycles are reported with a
//! concrete witness walk.

mod builder;
mod sort;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

pub use builder::GraphBuilder;
use cockpit_task_id::TaskId;
use cockpit_workspaces::TaskDefinition;
use petgraph::{graph::NodeIndex, visit::depth_first_search, Direction, Graph};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cyclic dependency detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskId> },
    #[error("task {task} not found{}", format_available(.available))]
    TaskNotFound {
        task: TaskId,
        available: Vec<String>,
    },
    #[error("workspace {workspace} not found{}", format_available(.available))]
    WorkspaceNotFound {
        workspace: String,
        available: Vec<String>,
    },
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(TaskId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", available.join(", "))
    }
}

/// A task instance with its references resolved to canonical ids.
/// Immutable once the builder created it.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub id: TaskId,
    pub workspace_id: String,
    pub name: String,
    pub definition: Arc<TaskDefinition>,
    pub dependencies: Vec<TaskId>,
}

#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) tasks: HashMap<TaskId, ResolvedTask>,
    /// Edges point from a task to each of its dependencies.
    pub(crate) graph: Graph<TaskId, ()>,
    pub(crate) lookup: HashMap<TaskId, NodeIndex>,
    pub(crate) execution_order: Vec<TaskId>,
    pub(crate) parallel_levels: Vec<Vec<TaskId>>,
    pub(crate) root_tasks: Vec<TaskId>,
}

impl TaskGraph {
    pub fn tasks(&self) -> &HashMap<TaskId, ResolvedTask> {
        &self.tasks
    }

    pub fn task(&self, id: &TaskId) -> Option<&ResolvedTask> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn execution_order(&self) -> &[TaskId] {
        &self.execution_order
    }

    pub fn parallel_levels(&self) -> &[Vec<TaskId>] {
        &self.parallel_levels
    }

    pub fn root_tasks(&self) -> &[TaskId] {
        &self.root_tasks
    }

    /// Every task reachable from `id` via dependency edges, `id` excluded.
    pub fn transitive_dependencies(&self, id: &TaskId) -> HashSet<TaskId> {
        self.closure(id, Direction::Outgoing)
    }

    /// Every task that transitively depends on `id`, `id` excluded.
    pub fn transitive_dependents(&self, id: &TaskId) -> HashSet<TaskId> {
        self.closure(id, Direction::Incoming)
    }

    fn closure(&self, id: &TaskId, direction: Direction) -> HashSet<TaskId> {
        let Some(&start) = self.lookup.get(id) else {
            return HashSet::new();
        };
        let mut visited = HashSet::new();
        let visitor = |event| {
            if let petgraph::visit::DfsEvent::Discover(node, _) = event {
                let weight = self
                    .graph
                    .node_weight(node)
                    .expect("node index found during dfs doesn't exist");
                visited.insert(weight.clone());
            }
        };
        match direction {
            Direction::Outgoing => depth_first_search(&self.graph, Some(start), visitor),
            Direction::Incoming => depth_first_search(
                petgraph::visit::Reversed(&self.graph),
                Some(start),
                visitor,
            ),
        }
        visited.remove(id);
        visited
    }

    /// Serializable structure for the `graph.json` the external watcher
    /// persists.
    pub fn export(&self) -> GraphExport {
        let mut tasks: Vec<ExportedTask> = self
            .tasks
            .values()
            .map(|task| ExportedTask {
                id: task.id.clone(),
                dependencies: task.dependencies.clone(),
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        GraphExport {
            tasks,
            execution_order: self.execution_order.clone(),
            parallel_levels: self.parallel_levels.clone(),
            root_tasks: self.root_tasks.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphExport {
    pub tasks: Vec<ExportedTask>,
    pub execution_order: Vec<TaskId>,
    pub parallel_levels: Vec<Vec<TaskId>>,
    pub root_tasks: Vec<TaskId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTask {
    pub id: TaskId,
    pub dependencies: Vec<TaskId>,
}

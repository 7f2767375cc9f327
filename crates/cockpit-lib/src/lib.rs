//! Cockpit's run engine.
//!
//! Ties the resolver, scheduler, runner, cache, and cleanup together behind
//! one entry point: [`Cockpit::run`] maps a request onto a graph
//! construction choice, drives the graph with bounded parallelism, and
//! aggregates a summary. Task-level failures become results, never errors;
//! only graph construction aborts a run.

mod cleanup;
mod runner;
mod scheduler;

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Instant,
};

pub use cleanup::{CleanupEngine, CleanupResult};
use cockpit_cache::CacheStore;
use cockpit_engine::GraphBuilder;
use cockpit_task_id::TaskId;
use cockpit_ui::{RunSummary, TaskLogger};
use cockpit_workspaces::{WorkspaceId, WorkspaceModel};
pub use runner::{ExecutionStatus, RunnerConfig, TaskFailure, TaskResult, TaskRunner};
pub use scheduler::{execute, execute_sequential};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] cockpit_engine::Error),
    #[error(transparent)]
    Cache(#[from] cockpit_cache::CacheError),
    #[error(transparent)]
    Walk(#[from] cockpit_globwalk::WalkError),
    #[error("no workspaces carry tag {0}")]
    UnknownTag(String),
}

/// Which workspaces a run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// One explicit workspace.
    Workspace(WorkspaceId),
    /// The configured default workspace, falling back to the root.
    Default,
    /// Every workspace that defines the task.
    All,
    /// Workspaces carrying a tag.
    Tag(String),
}

#[derive(Debug, Clone)]
pub struct RunOpts {
    pub concurrency: usize,
    pub continue_on_error: bool,
    pub force: bool,
    pub dry_run: bool,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            continue_on_error: false,
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task: String,
    pub scope: Scope,
    /// Arguments after `--`, forwarded to the tasks the request named.
    pub extra_args: Vec<String>,
    pub opts: RunOpts,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// False iff at least one task failed.
    pub success: bool,
    pub results: Vec<TaskResult>,
    pub summary: RunSummary,
}

pub struct Cockpit {
    model: WorkspaceModel,
    cache: Option<Arc<CacheStore>>,
    logger: Arc<dyn TaskLogger>,
}

impl Cockpit {
    /// A cache store that cannot be opened disables caching rather than
    /// failing the engine.
    pub fn new(model: WorkspaceModel, logger: Arc<dyn TaskLogger>) -> Self {
        let cache = match CacheStore::new(model.cache_dir()) {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!("cache disabled: {err}");
                None
            }
        };
        Self {
            model,
            cache,
            logger,
        }
    }

    pub fn model(&self) -> &WorkspaceModel {
        &self.model
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, Error> {
        let builder = GraphBuilder::new(&self.model);
        let graph = match &request.scope {
            Scope::Workspace(workspace) => builder.build_for_task(&request.task, workspace)?,
            Scope::Default => {
                let workspace = self.model.default_workspace.clone().unwrap_or_default();
                builder.build_for_task(&request.task, &workspace)?
            }
            Scope::All => {
                let workspaces: Vec<WorkspaceId> = self
                    .model
                    .workspaces_with_task(&request.task)
                    .into_iter()
                    .filter(|workspace| self.model.has_workspace(workspace))
                    .collect();
                builder.build_for_workspaces(&request.task, &workspaces)?
            }
            Scope::Tag(tag) => {
                let workspaces = self.model.workspaces_with_tag(tag);
                if workspaces.is_empty() {
                    return Err(Error::UnknownTag(tag.clone()));
                }
                builder.build_for_workspaces(&request.task, &workspaces)?
            }
        };
        debug!(
            "resolved {} tasks in {} levels",
            graph.len(),
            graph.parallel_levels().len()
        );

        let main_task_ids: HashSet<TaskId> = graph.root_tasks().iter().cloned().collect();
        let runner = TaskRunner::new(
            &self.model,
            self.cache.clone(),
            self.logger.clone(),
            runner::RunnerConfig {
                force: request.opts.force,
                dry_run: request.opts.dry_run,
                extra_args: request.extra_args.clone(),
                main_task_ids,
                base_env: BTreeMap::new(),
            },
        );

        let started = Instant::now();
        let results = scheduler::execute(
            &graph,
            &runner,
            request.opts.concurrency,
            request.opts.continue_on_error,
        )
        .await;
        let summary = summarize(&results, started.elapsed());
        self.logger.summary(&summary);

        Ok(RunOutcome {
            success: summary.failed == 0,
            results,
            summary,
        })
    }

    pub fn cleanup(&self, task_id: &TaskId, dry_run: bool) -> Result<CleanupResult, Error> {
        CleanupEngine::new(&self.model, self.cache.as_deref()).cleanup(task_id, dry_run)
    }
}

pub fn summarize(results: &[TaskResult], duration: std::time::Duration) -> RunSummary {
    let mut summary = RunSummary {
        duration,
        ..RunSummary::default()
    };
    for result in results {
        match result.status {
            ExecutionStatus::Success => summary.success += 1,
            ExecutionStatus::Failed => summary.failed += 1,
            ExecutionStatus::Cached => summary.cached += 1,
            ExecutionStatus::Skipped => summary.skipped += 1,
        }
    }
    summary
}

//! Level-walking scheduler.
//!
//! Walks the graph's parallel levels in order and dispatches each level's
//! runnable tasks concurrently under a counting semaphore. After a failure
//! (without `continue_on_error`) every remaining task drains as a skip, so
//! the scheduler always returns exactly one result per task in the graph.
//! No task starts before all of its dependencies have terminated.

use std::{collections::HashSet, sync::Arc};

use cockpit_engine::TaskGraph;
use cockpit_task_id::TaskId;
use tokio::sync::Semaphore;

use crate::runner::{ExecutionStatus, TaskResult, TaskRunner};

pub async fn execute(
    graph: &TaskGraph,
    runner: &TaskRunner<'_>,
    concurrency: usize,
    continue_on_error: bool,
) -> Vec<TaskResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut failed: HashSet<TaskId> = HashSet::new();
    let mut results: Vec<TaskResult> = Vec::with_capacity(graph.len());

    for level in graph.parallel_levels() {
        let mut runnable = Vec::new();
        for task_id in level {
            let task = graph
                .task(task_id)
                .expect("level task exists in the graph");
            if !continue_on_error {
                // A direct dependency failure is reported as such; anything
                // else draining after a failure is a plain cascade skip
                if task
                    .dependencies
                    .iter()
                    .any(|dependency| failed.contains(dependency))
                {
                    results.push(runner.skip_task(task_id, "dependency failed"));
                    continue;
                }
                if !failed.is_empty() {
                    results.push(runner.skip_task(task_id, "earlier task failed"));
                    continue;
                }
            }
            runnable.push(task);
        }

        let level_results = futures::future::join_all(runnable.into_iter().map(|task| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("scheduler semaphore closed mid-run");
                runner.run_task(task).await
            }
        }))
        .await;

        for result in level_results {
            if result.status == ExecutionStatus::Failed {
                failed.insert(result.task_id.clone());
            }
            results.push(result);
        }
    }

    results
}

/// Deterministic one-at-a-time variant; not on the default path.
pub async fn execute_sequential(
    graph: &TaskGraph,
    runner: &TaskRunner<'_>,
    continue_on_error: bool,
) -> Vec<TaskResult> {
    let mut failed: HashSet<TaskId> = HashSet::new();
    let mut results: Vec<TaskResult> = Vec::with_capacity(graph.len());

    for task_id in graph.execution_order() {
        let task = graph
            .task(task_id)
            .expect("ordered task exists in the graph");
        if !continue_on_error {
            if task
                .dependencies
                .iter()
                .any(|dependency| failed.contains(dependency))
            {
                results.push(runner.skip_task(task_id, "dependency failed"));
                continue;
            }
            if !failed.is_empty() {
                results.push(runner.skip_task(task_id, "earlier task failed"));
                continue;
            }
        }
        let result = runner.run_task(task).await;
        if result.status == ExecutionStatus::Failed {
            failed.insert(result.task_id.clone());
        }
        results.push(result);
    }

    results
}

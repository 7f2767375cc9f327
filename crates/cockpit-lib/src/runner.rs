//! Task execution.
//!
//! One state machine per task: resolve the working directory, compose the
//! environment, probe the cache (replaying or restoring on a hit), then
//! execute under supervision, capture the output chunks, and commit the
//! result back to the cache. The runner converts every outcome into a
//! [`TaskResult`] and never propagates an error to the scheduler.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use camino::Utf8PathBuf;
use cockpit_cache::{CacheStore, OutputChunk, OutputStream, StoreRequest};
use cockpit_engine::ResolvedTask;
use cockpit_process::{OutputSink, SpawnOptions};
use cockpit_task_id::TaskId;
use cockpit_ui::{format_duration, TaskLogger, TaskStatus};
use cockpit_workspaces::WorkspaceModel;
use tracing::debug;

/// How much trailing stderr a failure carries for error reporting.
const STDERR_TAIL_LEN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    Cached,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskFailure {
    #[error("task {task_id} failed with exit code {exit_code}")]
    Execution {
        task_id: TaskId,
        exit_code: i32,
        stderr_tail: String,
    },
    #[error("task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: TaskId, timeout_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub error: Option<TaskFailure>,
}

impl TaskResult {
    fn new(task_id: TaskId, status: ExecutionStatus, duration: Duration) -> Self {
        Self {
            task_id,
            status,
            duration,
            error: None,
        }
    }
}

/// Per-run configuration the engine hands the runner.
pub struct RunnerConfig {
    pub force: bool,
    pub dry_run: bool,
    pub extra_args: Vec<String>,
    /// Tasks the user named; only these receive the extra args.
    pub main_task_ids: HashSet<TaskId>,
    /// Context-level environment, below workspace and task overlays.
    pub base_env: BTreeMap<String, String>,
}

pub struct TaskRunner<'a> {
    model: &'a WorkspaceModel,
    cache: Option<Arc<CacheStore>>,
    logger: Arc<dyn TaskLogger>,
    config: RunnerConfig,
}

impl<'a> TaskRunner<'a> {
    pub fn new(
        model: &'a WorkspaceModel,
        cache: Option<Arc<CacheStore>>,
        logger: Arc<dyn TaskLogger>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            model,
            cache,
            logger,
            config,
        }
    }

    /// Emit and record a skip without touching the task.
    pub fn skip_task(&self, task_id: &TaskId, reason: &str) -> TaskResult {
        self.logger
            .task(task_id, TaskStatus::Skipped, Some(reason));
        TaskResult::new(task_id.clone(), ExecutionStatus::Skipped, Duration::ZERO)
    }

    pub async fn run_task(&self, task: &ResolvedTask) -> TaskResult {
        let started = Instant::now();
        let task_id = &task.id;
        let definition = &task.definition;

        if !definition.platform.matches_host() {
            return self.skip_task(task_id, "platform mismatch");
        }

        let Some(workspace_path) = self.model.workspace_path(task.workspace_id.as_str()) else {
            self.logger
                .task(task_id, TaskStatus::Failed, Some("workspace path unknown"));
            return TaskResult {
                error: Some(TaskFailure::Execution {
                    task_id: task_id.clone(),
                    exit_code: 1,
                    stderr_tail: format!("no path for workspace {}", task.workspace_id),
                }),
                ..TaskResult::new(task_id.clone(), ExecutionStatus::Failed, started.elapsed())
            };
        };
        let cwd: Utf8PathBuf = match &definition.cwd {
            Some(relative) => workspace_path.join(relative),
            None => workspace_path.to_owned(),
        };

        // Environment composition order: context, then workspace, then task
        let mut env = self.config.base_env.clone();
        if let Some(workspace_env) = self.model.workspace_env(&task.workspace_id) {
            env.extend(workspace_env.clone());
        }
        if let Some(task_env) = &definition.env {
            env.extend(task_env.clone());
        }

        let extra_args: &[String] = if self.config.main_task_ids.contains(task_id) {
            &self.config.extra_args
        } else {
            &[]
        };

        let cache = self.cache.as_ref().filter(|_| definition.cache_enabled());
        let input_hash = match cache {
            Some(_) => match cockpit_hash::input_hash(definition, workspace_path, extra_args) {
                Ok(hash) => Some(hash),
                Err(err) => {
                    debug!("hashing {task_id} failed, treating as uncacheable: {err}");
                    None
                }
            },
            None => None,
        };

        if let (Some(store), Some(hash), false) = (cache, input_hash.as_deref(), self.config.force)
        {
            if store.has(task_id, hash) {
                if store.has_outputs_on_disk(task_id, hash, workspace_path) {
                    self.logger.task(task_id, TaskStatus::Cached, None);
                    self.replay(store, task_id, hash);
                    return TaskResult::new(
                        task_id.clone(),
                        ExecutionStatus::Cached,
                        started.elapsed(),
                    );
                }
                match store.restore_outputs(task_id, hash, workspace_path) {
                    Some(restored) if restored > 0 => {
                        self.logger.task(
                            task_id,
                            TaskStatus::Restored,
                            Some(&format!("{restored} files")),
                        );
                        self.replay(store, task_id, hash);
                        return TaskResult::new(
                            task_id.clone(),
                            ExecutionStatus::Cached,
                            started.elapsed(),
                        );
                    }
                    _ => debug!("{task_id}: cache hit but outputs missing, rebuilding"),
                }
            }
        }

        if self.config.dry_run {
            return self.skip_task(task_id, "dry run");
        }

        self.logger.task(task_id, TaskStatus::Starting, None);

        let chunks: Arc<Mutex<Vec<OutputChunk>>> = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_sink = CaptureSink {
            stream: OutputStream::Stdout,
            chunks: chunks.clone(),
            logger: self.logger.clone(),
            task_id: task_id.clone(),
        };
        let mut stderr_sink = CaptureSink {
            stream: OutputStream::Stderr,
            chunks: chunks.clone(),
            logger: self.logger.clone(),
            task_id: task_id.clone(),
        };

        let result = cockpit_process::supervise(
            &definition.command,
            SpawnOptions {
                cwd: &cwd,
                env: &env,
                timeout: Some(definition.timeout()),
                extra_args,
            },
            &mut stdout_sink,
            &mut stderr_sink,
        )
        .await;
        let duration = started.elapsed();

        if result.killed {
            self.logger
                .task(task_id, TaskStatus::Failed, Some("timeout"));
            return TaskResult {
                error: Some(TaskFailure::Timeout {
                    task_id: task_id.clone(),
                    timeout_ms: definition.timeout().as_millis() as u64,
                }),
                ..TaskResult::new(task_id.clone(), ExecutionStatus::Failed, duration)
            };
        }

        if result.exit_code != 0 {
            if definition.allow_failure {
                self.logger.task(
                    task_id,
                    TaskStatus::Success,
                    Some(&format!("exit {}, allowed", result.exit_code)),
                );
                return TaskResult::new(task_id.clone(), ExecutionStatus::Success, duration);
            }
            self.logger.task(
                task_id,
                TaskStatus::Failed,
                Some(&format!("exit {}", result.exit_code)),
            );
            return TaskResult {
                error: Some(TaskFailure::Execution {
                    task_id: task_id.clone(),
                    exit_code: result.exit_code,
                    stderr_tail: tail(&result.stderr),
                }),
                ..TaskResult::new(task_id.clone(), ExecutionStatus::Failed, duration)
            };
        }

        self.logger.task(
            task_id,
            TaskStatus::Success,
            Some(&format!("in {}", format_duration(duration))),
        );

        if let (Some(store), Some(hash)) = (cache, input_hash.as_deref()) {
            let chunks = chunks.lock().expect("chunk buffer poisoned");
            let request = StoreRequest {
                task_id,
                input_hash: hash,
                outputs: definition.outputs.as_deref().unwrap_or(&[]),
                workspace_path,
                output_chunks: chunks.as_slice(),
            };
            if let Err(err) = store.store(request) {
                debug!("failed to cache {task_id}: {err}");
            }
        }

        TaskResult::new(task_id.clone(), ExecutionStatus::Success, duration)
    }

    /// Re-emit a cached run's console output so a hit reads like a fresh run.
    fn replay(&self, store: &CacheStore, task_id: &TaskId, input_hash: &str) {
        let Some(chunks) = store.get_output_chunks(task_id, input_hash) else {
            return;
        };
        for chunk in chunks {
            match chunk.stream {
                OutputStream::Stdout => self.logger.task_stdout(task_id, chunk.data.as_bytes()),
                OutputStream::Stderr => self.logger.task_stderr(task_id, chunk.data.as_bytes()),
            }
        }
    }
}

fn tail(stderr: &str) -> String {
    if stderr.len() <= STDERR_TAIL_LEN {
        return stderr.to_string();
    }
    let mut start = stderr.len() - STDERR_TAIL_LEN;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    stderr[start..].to_string()
}

/// Captures chunks for the cache while forwarding them to the logger.
struct CaptureSink {
    stream: OutputStream,
    chunks: Arc<Mutex<Vec<OutputChunk>>>,
    logger: Arc<dyn TaskLogger>,
    task_id: TaskId,
}

impl OutputSink for CaptureSink {
    fn write(&mut self, bytes: &[u8]) {
        let data = String::from_utf8_lossy(bytes).into_owned();
        self.chunks
            .lock()
            .expect("chunk buffer poisoned")
            .push(OutputChunk {
                stream: self.stream,
                data,
            });
        match self.stream {
            OutputStream::Stdout => self.logger.task_stdout(&self.task_id, bytes),
            OutputStream::Stderr => self.logger.task_stderr(&self.task_id, bytes),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stderr_tail_truncates_long_output() {
        let long = "x".repeat(1000);
        assert_eq!(tail(&long).len(), STDERR_TAIL_LEN);
        assert_eq!(tail("short"), "short");
    }
}

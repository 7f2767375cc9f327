//! Logger implementations.

use std::sync::Mutex;

use cockpit_task_id::TaskId;
use console::style;
use owo_colors::OwoColorize;

use crate::{format_duration, ColorSelector, RunSummary, TaskLogger, TaskStatus};

/// Writes task-prefixed lines to the terminal.
pub struct ConsoleLogger {
    colors: ColorSelector,
    /// Keeps concurrently finishing tasks from interleaving partial lines.
    write_lock: Mutex<()>,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            colors: ColorSelector::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn prefix(&self, id: &TaskId) -> String {
        let (r, g, b) = self.colors.color_for(&id.to_string());
        format!("{}", id.truecolor(r, g, b))
    }

    fn styled_status(status: TaskStatus) -> String {
        let text = status.to_string();
        match status {
            TaskStatus::Success => style(text).green().to_string(),
            TaskStatus::Failed => style(text).red().to_string(),
            TaskStatus::Cached | TaskStatus::Restored => style(text).cyan().to_string(),
            TaskStatus::Skipped => style(text).yellow().to_string(),
            TaskStatus::Starting | TaskStatus::Running => style(text).dim().to_string(),
        }
    }

    fn write_stream(&self, id: &TaskId, bytes: &[u8]) {
        let prefix = self.prefix(id);
        let text = String::from_utf8_lossy(bytes);
        let _guard = self.write_lock.lock().expect("logger lock poisoned");
        for line in text.split_inclusive('\n') {
            print!("{prefix} {line}");
        }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLogger for ConsoleLogger {
    fn task(&self, id: &TaskId, status: TaskStatus, message: Option<&str>) {
        let prefix = self.prefix(id);
        let status = Self::styled_status(status);
        let _guard = self.write_lock.lock().expect("logger lock poisoned");
        match message {
            Some(message) => println!("{prefix} {status} {message}"),
            None => println!("{prefix} {status}"),
        }
    }

    fn task_stdout(&self, id: &TaskId, bytes: &[u8]) {
        self.write_stream(id, bytes);
    }

    fn task_stderr(&self, id: &TaskId, bytes: &[u8]) {
        self.write_stream(id, bytes);
    }

    fn summary(&self, summary: &RunSummary) {
        let _guard = self.write_lock.lock().expect("logger lock poisoned");
        println!(
            "\n{}  {} success, {} cached, {} failed, {} skipped in {}",
            style("Tasks:").bold(),
            style(summary.success).green(),
            style(summary.cached).cyan(),
            style(summary.failed).red(),
            style(summary.skipped).yellow(),
            format_duration(summary.duration),
        );
    }
}

/// Every call a logger received, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Task {
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    },
    Stdout {
        id: TaskId,
        data: String,
    },
    Stderr {
        id: TaskId,
        data: String,
    },
    Summary(RunSummary),
}

/// Captures logger calls in order; the test double for [`TaskLogger`].
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("logger lock poisoned").clone()
    }

    /// The stdout data captured for one task, concatenated.
    pub fn stdout_for(&self, task: &TaskId) -> String {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LogEvent::Stdout { id, data } if &id == task => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn statuses_for(&self, task: &TaskId) -> Vec<TaskStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LogEvent::Task { id, status, .. } if &id == task => Some(status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: LogEvent) {
        self.events.lock().expect("logger lock poisoned").push(event);
    }
}

impl TaskLogger for MemoryLogger {
    fn task(&self, id: &TaskId, status: TaskStatus, message: Option<&str>) {
        self.push(LogEvent::Task {
            id: id.clone(),
            status,
            message: message.map(str::to_string),
        });
    }

    fn task_stdout(&self, id: &TaskId, bytes: &[u8]) {
        self.push(LogEvent::Stdout {
            id: id.clone(),
            data: String::from_utf8_lossy(bytes).into_owned(),
        });
    }

    fn task_stderr(&self, id: &TaskId, bytes: &[u8]) {
        self.push(LogEvent::Stderr {
            id: id.clone(),
            data: String::from_utf8_lossy(bytes).into_owned(),
        });
    }

    fn summary(&self, summary: &RunSummary) {
        self.push(LogEvent::Summary(*summary));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_memory_logger_preserves_order() {
        let logger = MemoryLogger::new();
        let id = TaskId::new("web", "build");
        logger.task(&id, TaskStatus::Starting, None);
        logger.task_stdout(&id, b"building\n");
        logger.task_stderr(&id, b"warning\n");
        logger.task_stdout(&id, b"done\n");
        logger.task(&id, TaskStatus::Success, Some("in 1.2s"));

        let events = logger.events();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], LogEvent::Task { status: TaskStatus::Starting, .. }));
        assert!(matches!(events[2], LogEvent::Stderr { .. }));
        assert_eq!(logger.stdout_for(&id), "building\ndone\n");
    }

    #[test]
    fn test_statuses_for_filters_by_task() {
        let logger = MemoryLogger::new();
        let web = TaskId::new("web", "build");
        let core = TaskId::new("core", "build");
        logger.task(&core, TaskStatus::Success, None);
        logger.task(&web, TaskStatus::Cached, None);
        assert_eq!(logger.statuses_for(&web), vec![TaskStatus::Cached]);
        assert_eq!(logger.statuses_for(&core), vec![TaskStatus::Success]);
    }
}

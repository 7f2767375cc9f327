//! The logger contract the runner and scheduler emit through.
//!
//! Everything user-facing flows through [`TaskLogger`]: task status lines,
//! prefixed child output, and the final summary. The console implementation
//! prefixes each line with the task id in a color derived deterministically
//! from the id, so a task keeps its color across runs and replays are
//! indistinguishable from live output.

mod color;
mod logger;

use std::{fmt, time::Duration};

use cockpit_task_id::TaskId;
pub use color::ColorSelector;
pub use logger::{ConsoleLogger, LogEvent, MemoryLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Starting,
    Running,
    Success,
    Failed,
    Skipped,
    Cached,
    Restored,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cached => "cached",
            Self::Restored => "restored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub success: usize,
    pub failed: usize,
    pub cached: usize,
    pub skipped: usize,
    pub duration: Duration,
}

pub trait TaskLogger: Send + Sync {
    fn task(&self, id: &TaskId, status: TaskStatus, message: Option<&str>);
    fn task_stdout(&self, id: &TaskId, bytes: &[u8]);
    fn task_stderr(&self, id: &TaskId, bytes: &[u8]);
    fn summary(&self, summary: &RunSummary);
}

/// Render a duration the way task lines do: millisecond precision under a
/// second, tenths of a second above.
pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Cached.to_string(), "cached");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }
}

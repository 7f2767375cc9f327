//! Canonical task identifiers.
//!
//! A task id is the pair of a workspace id and a task name rendered as
//! `workspace:task`. The first `:` separates the two components; any further
//! colons belong to the task name. The empty workspace id denotes the
//! monorepo root.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Workspace id of the monorepo root.
pub const ROOT_WORKSPACE: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    workspace: String,
    task: String,
}

impl TaskId {
    pub fn new(workspace: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            task: task.into(),
        }
    }

    /// Parse a canonical id string. The first `:` splits workspace from task
    /// name; an id without a colon belongs to the root workspace.
    pub fn from_raw(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((workspace, task)) => Self::new(workspace, task),
            None => Self::new(ROOT_WORKSPACE, raw),
        }
    }

    /// Resolve a reference string against the workspace it appears in.
    ///
    /// `"name"` stays in `current_workspace`, `"ws:name"` crosses into `ws`,
    /// and `":name"` targets the root workspace.
    pub fn from_reference(reference: &str, current_workspace: &str) -> Self {
        match reference.split_once(':') {
            Some((workspace, task)) => Self::new(workspace, task),
            None => Self::new(current_workspace, reference),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn in_root_workspace(&self) -> bool {
        self.workspace.is_empty()
    }

    /// Filesystem-safe rendering used for cache directories.
    pub fn safe_name(&self) -> String {
        self.to_string().replace(':', "__")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace, self.task)
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = TaskId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a task id of the form `workspace:task`")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<TaskId, E> {
                Ok(TaskId::from_raw(value))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

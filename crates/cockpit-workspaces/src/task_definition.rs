//! Task definitions as the configuration layer hands them to the core.
//!
//! The polymorphic shapes of the user-facing format (string-or-list-or-struct
//! commands, string-or-struct dependency references, `"outputs"`-or-globs
//! cleanup) are expressed as tagged unions here and normalized at the
//! boundary rather than inspected downstream.

use std::{collections::BTreeMap, fmt, time::Duration};

use camino::Utf8PathBuf;
use cockpit_task_id::TaskId;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Timeout applied when a definition does not carry its own.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub command: TaskCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupSpec>,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<Utf8PathBuf>,
    #[serde(default)]
    pub allow_failure: bool,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub depends_on: Vec<TaskRef>,
}

fn default_cache() -> bool {
    true
}

impl TaskDefinition {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }
}

/// The three user-facing command shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskCommand {
    /// A single shell string.
    Shell(String),
    /// Shell strings joined by logical AND.
    Sequence(Vec<String>),
    /// An explicit program invocation.
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<Utf8PathBuf>,
        #[serde(default)]
        shell: bool,
    },
}

impl TaskCommand {
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }
}

impl fmt::Display for TaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => f.write_str(command),
            Self::Sequence(commands) => f.write_str(&commands.join(" && ")),
            Self::Exec { program, args, .. } => {
                write!(f, "{program} {}", args.join(" "))
            }
        }
    }
}

/// A dependency reference: either a raw string or a struct carrying an
/// optional flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Raw(String),
    Struct {
        task: String,
        #[serde(default)]
        optional: bool,
    },
}

impl TaskRef {
    /// Normalize against the workspace the reference appears in, yielding the
    /// canonical id and whether a missing target may be dropped.
    pub fn resolve(&self, current_workspace: &str) -> (TaskId, bool) {
        match self {
            Self::Raw(reference) => (TaskId::from_reference(reference, current_workspace), false),
            Self::Struct { task, optional } => {
                (TaskId::from_reference(task, current_workspace), *optional)
            }
        }
    }
}

/// What cleanup should delete: the task's declared outputs, or an explicit
/// glob list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupSpec {
    Outputs,
    Globs(Vec<String>),
}

impl Serialize for CleanupSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Outputs => serializer.serialize_str("outputs"),
            Self::Globs(globs) => globs.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CleanupSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = CleanupSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("the string \"outputs\" or a list of glob patterns")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CleanupSpec, E> {
                if value == "outputs" {
                    Ok(CleanupSpec::Outputs)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(value), &self))
                }
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<CleanupSpec, A::Error> {
                let mut globs = Vec::new();
                while let Some(glob) = seq.next_element::<String>()? {
                    globs.push(glob);
                }
                Ok(CleanupSpec::Globs(globs))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Win32,
    #[default]
    All,
}

impl Platform {
    pub fn matches_host(self) -> bool {
        match self {
            Self::All => true,
            Self::Linux => cfg!(target_os = "linux"),
            Self::Darwin => cfg!(target_os = "macos"),
            Self::Win32 => cfg!(target_os = "windows"),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_shell_command_from_string() {
        let def: TaskDefinition = serde_json::from_value(serde_json::json!({
            "command": "cargo build"
        }))
        .unwrap();
        assert!(matches!(def.command, TaskCommand::Shell(ref c) if c == "cargo build"));
        assert!(def.cache);
        assert!(!def.allow_failure);
        assert_eq!(def.platform, Platform::All);
    }

    #[test]
    fn test_sequence_command_from_list() {
        let def: TaskDefinition = serde_json::from_value(serde_json::json!({
            "command": ["npm ci", "npm run build"]
        }))
        .unwrap();
        assert!(matches!(def.command, TaskCommand::Sequence(ref c) if c.len() == 2));
    }

    #[test]
    fn test_exec_command_from_struct() {
        let def: TaskDefinition = serde_json::from_value(serde_json::json!({
            "command": { "program": "cargo", "args": ["build", "--release"] }
        }))
        .unwrap();
        match def.command {
            TaskCommand::Exec { program, args, cwd, shell } => {
                assert_eq!(program, "cargo");
                assert_eq!(args, vec!["build", "--release"]);
                assert_eq!(cwd, None);
                assert!(!shell);
            }
            other => panic!("expected exec command, got {other:?}"),
        }
    }

    #[test]
    fn test_full_definition() {
        let def: TaskDefinition = serde_json::from_value(serde_json::json!({
            "command": "vite build",
            "env": { "NODE_ENV": "production" },
            "inputs": ["src/**"],
            "outputs": ["dist/**"],
            "cleanup": "outputs",
            "cache": false,
            "allowFailure": true,
            "timeout": 1000,
            "platform": "linux",
            "dependsOn": ["core:build", { "task": ":lint", "optional": true }]
        }))
        .unwrap();
        assert!(!def.cache);
        assert!(def.allow_failure);
        assert_eq!(def.timeout(), Duration::from_millis(1000));
        assert_eq!(def.cleanup, Some(CleanupSpec::Outputs));
        assert_eq!(def.platform, Platform::Linux);
        assert_eq!(def.depends_on.len(), 2);
    }

    #[test]
    fn test_cleanup_glob_list() {
        let def: TaskDefinition = serde_json::from_value(serde_json::json!({
            "command": "make",
            "cleanup": ["build/**", "*.o"]
        }))
        .unwrap();
        assert_eq!(
            def.cleanup,
            Some(CleanupSpec::Globs(vec![
                "build/**".to_string(),
                "*.o".to_string()
            ]))
        );
    }

    #[test]
    fn test_cleanup_rejects_other_strings() {
        let result = serde_json::from_value::<TaskDefinition>(serde_json::json!({
            "command": "make",
            "cleanup": "everything"
        }));
        assert!(result.is_err());
    }

    #[test_case("build", "web", "web", "build", false ; "raw ref")]
    #[test_case("core:build", "web", "core", "build", false ; "qualified raw ref")]
    fn test_raw_ref_resolution(
        reference: &str,
        current: &str,
        workspace: &str,
        task: &str,
        optional: bool,
    ) {
        let (id, opt) = TaskRef::Raw(reference.to_string()).resolve(current);
        assert_eq!(id, TaskId::new(workspace, task));
        assert_eq!(opt, optional);
    }

    #[test]
    fn test_struct_ref_resolution() {
        let reference = TaskRef::Struct {
            task: ":lint".to_string(),
            optional: true,
        };
        let (id, optional) = reference.resolve("web");
        assert_eq!(id, TaskId::new("", "lint"));
        assert!(optional);
    }

    #[test]
    fn test_default_timeout() {
        let def: TaskDefinition =
            serde_json::from_value(serde_json::json!({ "command": "true" })).unwrap();
        assert_eq!(def.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }
}

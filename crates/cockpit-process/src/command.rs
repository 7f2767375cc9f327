//! Command normalization.
//!
//! The three user-facing command shapes collapse here into a single
//! spawnable invocation. Shell strings run through the platform shell;
//! sequences are joined with logical AND first. Extra arguments from the
//! invocation land at the tail of the final command.

use camino::Utf8PathBuf;
use cockpit_workspaces::TaskCommand;

/// A fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working-directory override from an explicit command record, relative
    /// to the directory the caller resolves.
    pub cwd: Option<Utf8PathBuf>,
}

#[cfg(unix)]
fn shell_invocation(command_line: String, cwd: Option<Utf8PathBuf>) -> Invocation {
    Invocation {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), command_line],
        cwd,
    }
}

#[cfg(windows)]
fn shell_invocation(command_line: String, cwd: Option<Utf8PathBuf>) -> Invocation {
    Invocation {
        program: "cmd".to_string(),
        args: vec!["/C".to_string(), command_line],
        cwd,
    }
}

fn append_extra(command_line: &str, extra_args: &[String]) -> String {
    if extra_args.is_empty() {
        command_line.to_string()
    } else {
        format!("{command_line} {}", extra_args.join(" "))
    }
}

pub fn normalize(command: &TaskCommand, extra_args: &[String]) -> Invocation {
    match command {
        TaskCommand::Shell(command_line) => {
            shell_invocation(append_extra(command_line, extra_args), None)
        }
        TaskCommand::Sequence(commands) => {
            let mut commands = commands.clone();
            // extra args attach to the final element only
            if let Some(last) = commands.last_mut() {
                *last = append_extra(last, extra_args);
            }
            shell_invocation(commands.join(" && "), None)
        }
        TaskCommand::Exec {
            program,
            args,
            cwd,
            shell,
        } => {
            let mut args: Vec<String> = args.clone();
            args.extend(extra_args.iter().cloned());
            if *shell {
                let mut command_line = program.clone();
                for arg in &args {
                    command_line.push(' ');
                    command_line.push_str(arg);
                }
                shell_invocation(command_line, cwd.clone())
            } else {
                Invocation {
                    program: program.clone(),
                    args,
                    cwd: cwd.clone(),
                }
            }
        }
    }
}

//! Process supervision.
//!
//! Spawns a task's child process in its own process group, streams its
//! stdout and stderr to a pair of sinks in arrival order, and enforces an
//! optional timeout: the group first receives the graceful termination
//! signal, then the forceful one five seconds later. Supervision never
//! fails; spawn errors surface as an exit code 1 result.

mod command;

use std::{collections::BTreeMap, process::Stdio, time::Duration};

pub use command::{normalize, Invocation};

use camino::Utf8Path;
use cockpit_workspaces::TaskCommand;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// How long a graceful shutdown may take before escalating to a kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

const READ_BUF_SIZE: usize = 4096;

/// Receives output chunks as the child produces them.
pub trait OutputSink: Send {
    fn write(&mut self, bytes: &[u8]);
}

/// Sink that drops everything.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&mut self, _bytes: &[u8]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the process was terminated by the timeout.
    pub killed: bool,
}

#[derive(Debug, Clone)]
pub struct SpawnOptions<'a> {
    /// Resolved working directory; nothing here consults the process cwd.
    pub cwd: &'a Utf8Path,
    /// Caller-composed environment overlay, applied on top of the inherited
    /// environment and the terminal defaults.
    pub env: &'a BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub extra_args: &'a [String],
}

/// Run a command to completion, forwarding each output chunk synchronously
/// to the matching sink in the order it arrives.
pub async fn supervise(
    task_command: &TaskCommand,
    options: SpawnOptions<'_>,
    stdout_sink: &mut dyn OutputSink,
    stderr_sink: &mut dyn OutputSink,
) -> ProcessResult {
    let invocation = command::normalize(task_command, options.extra_args);
    let cwd = match &invocation.cwd {
        Some(relative) => options.cwd.join(relative),
        None => options.cwd.to_owned(),
    };

    let mut cmd = tokio::process::Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(cwd.as_std_path())
        .env("FORCE_COLOR", "1")
        .env("CLICOLOR_FORCE", "1")
        .env(
            "TERM",
            std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
        )
        .envs(options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Give the child its own process group so termination signals reach the
    // whole tree
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let message = format!("failed to spawn {}: {err}", invocation.program);
            stderr_sink.write(message.as_bytes());
            return ProcessResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: message,
                killed: false,
            };
        }
    };
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take().expect("child stdout is piped");
    let mut stderr_pipe = child.stderr.take().expect("child stderr is piped");

    let mut stdout_acc = String::new();
    let mut stderr_acc = String::new();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut killed = false;

    let timeout_fut = async {
        match options.timeout {
            Some(timeout) if !timeout.is_zero() => tokio::time::sleep(timeout).await,
            _ => std::future::pending().await,
        }
    };
    tokio::pin!(timeout_fut);
    let mut force_kill: Option<tokio::task::JoinHandle<()>> = None;

    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout_pipe.read(&mut stdout_buf), if stdout_open => match read {
                Ok(0) | Err(_) => stdout_open = false,
                Ok(n) => {
                    let chunk = &stdout_buf[..n];
                    stdout_acc.push_str(&String::from_utf8_lossy(chunk));
                    stdout_sink.write(chunk);
                }
            },
            read = stderr_pipe.read(&mut stderr_buf), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(n) => {
                    let chunk = &stderr_buf[..n];
                    stderr_acc.push_str(&String::from_utf8_lossy(chunk));
                    stderr_sink.write(chunk);
                }
            },
            _ = &mut timeout_fut, if !killed => {
                debug!("timeout elapsed, terminating process group");
                killed = true;
                force_kill = terminate(&mut child, pid);
            },
        }
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            debug!("failed to wait on child: {err}");
            1
        }
    };

    // The child exited one way or another, so the escalation is moot
    if let Some(force_kill) = force_kill {
        force_kill.abort();
    }

    ProcessResult {
        exit_code,
        stdout: stdout_acc,
        stderr: stderr_acc,
        killed,
    }
}

/// Send the graceful termination signal and arm the forceful follow-up.
#[cfg(unix)]
fn terminate(
    _child: &mut tokio::process::Child,
    pid: Option<u32>,
) -> Option<tokio::task::JoinHandle<()>> {
    let pid = pid?;
    // negative pid addresses the whole process group
    let pgid = -(pid as i32);
    if unsafe { libc::kill(pgid, libc::SIGTERM) } == -1 {
        debug!("failed to send SIGTERM to {pgid}");
    }
    Some(tokio::spawn(async move {
        tokio::time::sleep(KILL_GRACE).await;
        debug!("graceful shutdown timed out, killing process group");
        if unsafe { libc::kill(pgid, libc::SIGKILL) } == -1 {
            debug!("failed to send SIGKILL to {pgid}");
        }
    }))
}

/// Windows has no graceful signal, so the timeout kills immediately.
#[cfg(windows)]
fn terminate(
    child: &mut tokio::process::Child,
    _pid: Option<u32>,
) -> Option<tokio::task::JoinHandle<()>> {
    if let Err(err) = child.start_kill() {
        debug!("failed to kill child: {err}");
    }
    None
}

#[cfg(all(test, unix))]
mod test {
    use std::time::Instant;

    use camino::Utf8PathBuf;

    use super::*;

    struct VecSink(Vec<u8>);

    impl OutputSink for VecSink {
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
    }

    fn options<'a>(
        cwd: &'a Utf8Path,
        env: &'a BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> SpawnOptions<'a> {
        SpawnOptions {
            cwd,
            env,
            timeout,
            extra_args: &[],
        }
    }

    fn cwd() -> Utf8PathBuf {
        Utf8PathBuf::from("/tmp")
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let env = BTreeMap::new();
        let mut out = VecSink(Vec::new());
        let mut err = VecSink(Vec::new());
        let result = supervise(
            &TaskCommand::shell("echo hi"),
            options(&cwd(), &env, None),
            &mut out,
            &mut err,
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(!result.killed);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(out.0, b"hi\n");
        assert!(err.0.is_empty());
    }

    #[tokio::test]
    async fn test_captures_stderr() {
        let env = BTreeMap::new();
        let mut out = VecSink(Vec::new());
        let mut err = VecSink(Vec::new());
        let result = supervise(
            &TaskCommand::shell("echo oops >&2"),
            options(&cwd(), &env, None),
            &mut out,
            &mut err,
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(err.0, b"oops\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let env = BTreeMap::new();
        let result = supervise(
            &TaskCommand::shell("exit 3"),
            options(&cwd(), &env, None),
            &mut NullSink,
            &mut NullSink,
        )
        .await;
        assert_eq!(result.exit_code, 3);
        assert!(!result.killed);
    }

    #[tokio::test]
    async fn test_sequence_stops_on_failure() {
        let env = BTreeMap::new();
        let mut out = VecSink(Vec::new());
        let command = TaskCommand::Sequence(vec![
            "echo first".to_string(),
            "false".to_string(),
            "echo second".to_string(),
        ]);
        let result = supervise(
            &command,
            options(&cwd(), &env, None),
            &mut out,
            &mut NullSink,
        )
        .await;
        assert_ne!(result.exit_code, 0);
        assert_eq!(result.stdout, "first\n");
    }

    #[tokio::test]
    async fn test_env_overlay_reaches_child() {
        let mut env = BTreeMap::new();
        env.insert("COCKPIT_TEST_VALUE".to_string(), "42".to_string());
        let result = supervise(
            &TaskCommand::shell("echo $COCKPIT_TEST_VALUE:$FORCE_COLOR"),
            options(&cwd(), &env, None),
            &mut NullSink,
            &mut NullSink,
        )
        .await;
        assert_eq!(result.stdout, "42:1\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let env = BTreeMap::new();
        let started = Instant::now();
        let result = supervise(
            &TaskCommand::shell("sleep 10"),
            options(&cwd(), &env, Some(Duration::from_millis(50))),
            &mut NullSink,
            &mut NullSink,
        )
        .await;
        assert!(result.killed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_failure_resolves_instead_of_erroring() {
        let env = BTreeMap::new();
        let mut err = VecSink(Vec::new());
        let command = TaskCommand::Exec {
            program: "definitely-not-a-real-program".to_string(),
            args: vec![],
            cwd: None,
            shell: false,
        };
        let result = supervise(
            &command,
            options(&cwd(), &env, None),
            &mut NullSink,
            &mut err,
        )
        .await;
        assert_eq!(result.exit_code, 1);
        assert!(!result.killed);
        assert!(result.stderr.contains("definitely-not-a-real-program"));
        assert!(!err.0.is_empty());
    }

    #[tokio::test]
    async fn test_extra_args_forwarded() {
        let env = BTreeMap::new();
        let extra = vec!["world".to_string()];
        let result = supervise(
            &TaskCommand::shell("echo hello"),
            SpawnOptions {
                cwd: &cwd(),
                env: &env,
                timeout: None,
                extra_args: &extra,
            },
            &mut NullSink,
            &mut NullSink,
        )
        .await;
        assert_eq!(result.stdout, "hello world\n");
    }
}

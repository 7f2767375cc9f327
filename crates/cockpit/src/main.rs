//! The `cockpit` binary: a thin command layer over the run engine.

mod config;

use std::{process::ExitCode, sync::Arc};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use cockpit_lib::{Cockpit, RunOpts, RunRequest, Scope};
use cockpit_task_id::TaskId;
use cockpit_ui::ConsoleLogger;
use console::style;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cockpit", about = "Monorepo task runner", version)]
struct Cli {
    /// Verbose diagnostics on stderr.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve and execute a task graph.
    Run {
        task: String,
        /// Run in one workspace instead of the default.
        #[arg(long, conflicts_with_all = ["all", "tag"])]
        workspace: Option<String>,
        /// Run in every workspace that defines the task.
        #[arg(long, conflicts_with = "tag")]
        all: bool,
        /// Run in workspaces carrying this tag.
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        continue_on_error: bool,
        /// Ignore the cache and re-execute.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        /// Arguments after `--`, forwarded to the named task.
        #[arg(last = true)]
        extra_args: Vec<String>,
    },
    /// Delete a task's cleanup targets and invalidate its cache.
    Cleanup {
        task: String,
        #[arg(long)]
        workspace: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// List every task across the monorepo.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "cockpit=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{} {message}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    let cwd = std::env::current_dir()
        .map_err(|err| err.to_string())
        .and_then(|dir| {
            Utf8PathBuf::from_path_buf(dir).map_err(|_| "non-utf8 working directory".to_string())
        })?;
    let root = config::find_root(&cwd).map_err(|err| err.to_string())?;
    let model = config::load_model(&root).map_err(|err| err.to_string())?;

    match cli.command {
        Command::Run {
            task,
            workspace,
            all,
            tag,
            concurrency,
            continue_on_error,
            force,
            dry_run,
            extra_args,
        } => {
            let scope = if let Some(workspace) = workspace {
                Scope::Workspace(workspace)
            } else if let Some(tag) = tag {
                Scope::Tag(tag)
            } else if all {
                Scope::All
            } else {
                Scope::Default
            };
            let mut opts = RunOpts {
                continue_on_error,
                force,
                dry_run,
                ..RunOpts::default()
            };
            if let Some(concurrency) = concurrency {
                opts.concurrency = concurrency;
            }

            let engine = Cockpit::new(model, Arc::new(ConsoleLogger::new()));
            let outcome = engine
                .run(RunRequest {
                    task,
                    scope,
                    extra_args,
                    opts,
                })
                .await
                .map_err(|err| err.to_string())?;
            Ok(if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Cleanup {
            task,
            workspace,
            dry_run,
        } => {
            let workspace = workspace
                .or_else(|| model.default_workspace.clone())
                .unwrap_or_default();
            let task_id = TaskId::new(workspace, task);
            let engine = Cockpit::new(model, Arc::new(ConsoleLogger::new()));
            let result = engine
                .cleanup(&task_id, dry_run)
                .map_err(|err| err.to_string())?;

            let verb = if result.dry_run { "would delete" } else { "deleted" };
            for path in &result.deleted {
                println!("{verb} {path}");
            }
            for (path, error) in &result.errors {
                eprintln!("{} {path}: {error}", style("failed:").red());
            }
            Ok(if result.errors.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List => {
            for id in model.all_task_ids() {
                match model
                    .task_definition(&id)
                    .and_then(|definition| definition.description.as_deref())
                {
                    Some(description) => println!("{id}  {}", style(description).dim()),
                    None => println!("{id}"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

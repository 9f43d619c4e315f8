use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskmerge::config::AppConfig;
use taskmerge::evolution::EvolutionStore;
use taskmerge::model::intent::TaskIntent;
use taskmerge::model::types::TaskId;
use taskmerge::orchestrator::{self, MergeOptions};
use taskmerge::transport::{ModelTransport, TransportError};
use taskmerge::vcs::GitCli;
use taskmerge::MergeError;

/// Intent-aware merge engine for parallel AI coding agents sharing a
/// project via git worktrees.
#[derive(Parser)]
#[command(name = "taskmerge")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a task's worktree into the base branch.
    Merge {
        /// The task to merge.
        task_id: String,

        /// Leave the merge staged in the index instead of committing it.
        #[arg(long)]
        no_commit: bool,
    },

    /// Print a summary of a task's recorded history (delegated externally
    /// in full; this prints what the evolution store knows).
    Review {
        /// The task to review.
        task_id: String,
    },

    /// Remove a task's worktree and branch. Requires typing `delete` to
    /// confirm.
    Discard {
        /// The task to discard.
        task_id: String,

        /// Must be the literal string `delete`.
        confirm: String,
    },

    /// List every task worktree under `.worktrees/`.
    List,

    /// Remove every task worktree under `.worktrees/`.
    Cleanup,
}

/// A transport that reports the model as unavailable, forcing the worker's
/// heuristic fallback. The real network client (driven by
/// `CLAUDE_CODE_OAUTH_TOKEN`) is out of scope for this core; production
/// callers inject their own [`ModelTransport`] implementation here.
struct UnconfiguredTransport;

impl ModelTransport for UnconfiguredTransport {
    fn call(&self, _system: &str, _user: &str) -> Result<String, TransportError> {
        Err(TransportError::Unavailable(
            "no model transport configured in this build".to_owned(),
        ))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project = cli
        .project
        .unwrap_or_else(|| std::env::current_dir().expect("current directory is accessible"));

    match cli.command {
        Commands::Merge { task_id, no_commit } => run_merge(&project, &task_id, no_commit),
        Commands::Review { task_id } => run_review(&project, &task_id),
        Commands::Discard { task_id, confirm } => run_discard(&project, &task_id, &confirm),
        Commands::List => run_list(&project),
        Commands::Cleanup => run_cleanup(&project),
    }
}

fn run_merge(project: &std::path::Path, task_id: &str, no_commit: bool) -> ExitCode {
    let task_id = match TaskId::new(task_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid task id: {e}");
            return ExitCode::from(1);
        }
    };

    if std::env::var("CLAUDE_CODE_OAUTH_TOKEN").is_err() {
        tracing::warn!("CLAUDE_CODE_OAUTH_TOKEN not set; model-assisted merges are disabled");
    }

    let config = match AppConfig::load(&project.join(".auto-claude/config.toml")) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };
    let vcs = GitCli::new(project.to_owned());
    let transport = UnconfiguredTransport;
    let store = EvolutionStore::new(project);
    let intent = read_task_intent(project, &task_id);

    match orchestrator::merge_task(
        project,
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config.merge,
        MergeOptions {
            no_commit,
            ..Default::default()
        },
    ) {
        Ok(summary) => {
            if let Some(commit) = &summary.commit {
                println!("merged {task_id} as {commit}");
            } else {
                println!("merged {task_id}; left staged (--no-commit)");
            }
            ExitCode::SUCCESS
        }
        Err(MergeError::NoSuchBuild { .. }) => {
            eprintln!("no worktree found for task '{task_id}'");
            ExitCode::from(2)
        }
        Err(MergeError::Busy { .. }) => {
            eprintln!("a merge for task '{task_id}' is already in progress");
            ExitCode::from(3)
        }
        Err(err @ MergeError::DivergenceUnresolved { .. }) => {
            eprintln!("{err}");
            ExitCode::from(4)
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

fn read_task_intent(project: &std::path::Path, task_id: &TaskId) -> TaskIntent {
    let path = project
        .join(".auto-claude/specs")
        .join(task_id.as_str())
        .join("implementation_plan.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => TaskIntent::default(),
    }
}

fn run_review(project: &std::path::Path, task_id: &str) -> ExitCode {
    let task_id = match TaskId::new(task_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid task id: {e}");
            return ExitCode::from(1);
        }
    };
    let store = EvolutionStore::new(project);
    let intent = read_task_intent(project, &task_id);
    println!("task: {task_id}");
    println!("goal: {}", intent.goal_text());
    for path in &intent.planned_paths {
        match store.get_file_evolution(path) {
            Ok(evolution) => {
                println!("  {}: {} recorded snapshot(s)", path.display(), evolution.snapshots.len());
            }
            Err(e) => println!("  {}: could not read history ({e})", path.display()),
        }
    }
    ExitCode::SUCCESS
}

fn run_discard(project: &std::path::Path, task_id: &str, confirm: &str) -> ExitCode {
    if confirm != "delete" {
        eprintln!("refusing to discard '{task_id}': pass the literal confirmation string `delete`");
        return ExitCode::from(1);
    }
    let task_id = match TaskId::new(task_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid task id: {e}");
            return ExitCode::from(1);
        }
    };
    let worktree = project.join(task_id.worktree_rel_path());
    if !worktree.exists() {
        eprintln!("no worktree found for task '{task_id}'");
        return ExitCode::from(2);
    }
    if let Err(e) = std::fs::remove_dir_all(&worktree) {
        eprintln!("failed to remove worktree for '{task_id}': {e}");
        return ExitCode::from(1);
    }
    println!("discarded {task_id}");
    ExitCode::SUCCESS
}

fn run_list(project: &std::path::Path) -> ExitCode {
    let worktrees_dir = project.join(".worktrees");
    let entries = match std::fs::read_dir(&worktrees_dir) {
        Ok(entries) => entries,
        Err(_) => {
            println!("no task worktrees");
            return ExitCode::SUCCESS;
        }
    };
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            println!("{}", entry.file_name().to_string_lossy());
        }
    }
    ExitCode::SUCCESS
}

fn run_cleanup(project: &std::path::Path) -> ExitCode {
    let worktrees_dir = project.join(".worktrees");
    let entries = match std::fs::read_dir(&worktrees_dir) {
        Ok(entries) => entries,
        Err(_) => return ExitCode::SUCCESS,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                eprintln!("failed to remove {}: {e}", path.display());
            }
        }
    }
    println!("removed all task worktrees");
    ExitCode::SUCCESS
}

//! Shared test harness for merge-engine integration tests.
//!
//! Every test gets its own real git repository in a temp directory, with a
//! `main` branch and, per task, a branch plus a linked worktree under
//! `.worktrees/<task_id>/` — matching the layout the orchestrator consumes
//! but never creates itself.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Run `git` with `args` in `dir`, panicking with stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// Create a fresh repository with an initial commit on `main`.
pub fn init_repo() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    git(dir.path(), &["init", "--quiet", "--initial-branch=main"]);
    git(dir.path(), &["config", "user.email", "agent@example.com"]);
    git(dir.path(), &["config", "user.name", "Agent"]);
    std::fs::write(dir.path().join(".gitkeep"), "").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "--quiet", "-m", "initial commit"]);
    dir
}

/// Write `content` to `relpath` under `dir`, creating parent directories.
pub fn write_file(dir: &Path, relpath: &str, content: &str) {
    let full = dir.join(relpath);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

/// Stage and commit everything currently in `dir`'s working tree.
pub fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
}

/// Create `auto-claude/<task_id>` branching from `main`'s current tip and
/// check it out into a linked worktree at `<repo>/.worktrees/<task_id>/`.
/// Returns the worktree's path.
pub fn create_task_worktree(repo: &Path, task_id: &str) -> PathBuf {
    let branch = format!("auto-claude/{task_id}");
    git(repo, &["branch", &branch, "main"]);
    let worktree_rel = format!(".worktrees/{task_id}");
    git(repo, &["worktree", "add", "--quiet", &worktree_rel, &branch]);
    repo.join(worktree_rel)
}

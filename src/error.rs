//! Unified error type for the merge engine.
//!
//! Every variant is meant to be self-explanatory to an agent or operator
//! reading stderr: what happened, and — where there's a sensible next
//! step — how to fix it. No VCS-specific jargon leaks past the adapter
//! boundary; everything here is expressed in terms of tasks, merges, and
//! locks.

use std::fmt;
use std::path::PathBuf;

use crate::model::types::TaskId;
use crate::vcs::GitError;

/// Unified error type returned by orchestrator-level operations.
#[derive(Debug)]
pub enum MergeError {
    /// No worktree exists for the given task.
    NoSuchBuild {
        /// The task that was requested.
        task_id: TaskId,
        /// The worktree path that was expected to exist.
        worktree: PathBuf,
    },

    /// Another merge is already running for this task.
    Busy {
        /// The task whose lock is held.
        task_id: TaskId,
    },

    /// A VCS adapter call failed in a way the orchestrator cannot recover
    /// from (as opposed to a per-file failure, which becomes a
    /// [`crate::model::types::MergeResult`]).
    VcsFailure {
        /// What the orchestrator was trying to do.
        context: String,
        /// The underlying git error.
        source: GitError,
    },

    /// One or more files could not be resolved; the merge was left
    /// partially staged.
    DivergenceUnresolved {
        /// Paths that failed, with their reasons.
        failed: Vec<(PathBuf, String)>,
    },

    /// The merge was cancelled before completion.
    Cancelled {
        /// The task being merged when cancellation was observed.
        task_id: TaskId,
    },

    /// A configuration file could not be loaded or parsed.
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error occurred during an orchestrator-level operation.
    Io(std::io::Error),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchBuild { task_id, worktree } => write!(
                f,
                "no worktree found for task '{task_id}' at {}.\n  To fix: create the worktree first, then retry the merge.",
                worktree.display()
            ),
            Self::Busy { task_id } => write!(
                f,
                "a merge for task '{task_id}' is already in progress.\n  To fix: wait for it to finish, or remove the stale lock if the owning process is gone."
            ),
            Self::VcsFailure { context, source } => {
                write!(f, "git operation failed while {context}: {source}")
            }
            Self::DivergenceUnresolved { failed } => {
                write!(f, "{} file(s) could not be merged:", failed.len())?;
                for (path, reason) in failed {
                    write!(f, "\n  - {}: {reason}", path.display())?;
                }
                write!(
                    f,
                    "\n  To fix: resolve these files manually in the worktree, then re-run the merge."
                )
            }
            Self::Cancelled { task_id } => {
                write!(f, "merge for task '{task_id}' was cancelled")
            }
            Self::ConfigError { path, detail } => write!(
                f,
                "configuration error in '{}': {detail}\n  To fix: edit the config file and correct the issue.",
                path.display()
            ),
            Self::Io(err) => write!(
                f,
                "I/O error: {err}\n  To fix: check file permissions and disk space."
            ),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::VcsFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn display_no_such_build() {
        let err = MergeError::NoSuchBuild {
            task_id: tid("t1"),
            worktree: PathBuf::from("/proj/.worktrees/t1"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("t1"));
        assert!(msg.contains("no worktree found"));
    }

    #[test]
    fn display_busy() {
        let err = MergeError::Busy { task_id: tid("t2") };
        assert!(format!("{err}").contains("already in progress"));
    }

    #[test]
    fn display_divergence_unresolved_lists_files() {
        let err = MergeError::DivergenceUnresolved {
            failed: vec![
                (PathBuf::from("a.rs"), "model unavailable".to_owned()),
                (PathBuf::from("b.rs"), "validator failed".to_owned()),
            ],
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.rs"));
        assert!(msg.contains("b.rs"));
    }

    #[test]
    fn io_error_source_present() {
        let err: MergeError = std::io::Error::other("disk full").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}

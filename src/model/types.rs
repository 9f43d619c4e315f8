//! Core vocabulary shared across the merge engine: task identity, refs,
//! file status, and the data that flows through the collect → resolve →
//! apply pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Branch prefix every task branch is derived under.
pub const TASK_BRANCH_PREFIX: &str = "auto-claude/";

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Opaque task identifier (a non-empty token with no path separators).
///
/// Derives the task's branch name (`auto-claude/<id>`) and worktree path
/// (`<project>/.worktrees/<id>/`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new `TaskId`, validating that it is non-empty and
    /// filesystem/ref-safe.
    ///
    /// # Errors
    /// Returns an error if `value` is empty, contains `/`, or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TaskIdError {
                value,
                reason: "task id must not be empty".to_owned(),
            });
        }
        if value.contains('/') || value.chars().any(char::is_whitespace) {
            return Err(TaskIdError {
                value,
                reason: "task id must not contain '/' or whitespace".to_owned(),
            });
        }
        Ok(Self(value))
    }

    /// Return the task id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The branch name this task's changes live on: `auto-claude/<id>`.
    #[must_use]
    pub fn branch_name(&self) -> String {
        format!("{TASK_BRANCH_PREFIX}{}", self.0)
    }

    /// The worktree path for this task, relative to the project root.
    #[must_use]
    pub fn worktree_rel_path(&self) -> PathBuf {
        PathBuf::from(".worktrees").join(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a [`TaskId`] fails validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskIdError {
    /// The invalid value that was supplied.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for TaskIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task id {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for TaskIdError {}

// ---------------------------------------------------------------------------
// Ref
// ---------------------------------------------------------------------------

/// A branch name, commit identifier, or symbolic ref understood by the VCS.
///
/// Intentionally just a newtype over `String` — the adapter is responsible
/// for resolving whatever shape of ref the caller hands it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ref(String);

impl Ref {
    /// Wrap an arbitrary ref string (branch, commit, `HEAD~1`, etc.).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Return the ref as a string slice, suitable for passing to git.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Ref {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Ref {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ---------------------------------------------------------------------------
// FileStatus
// ---------------------------------------------------------------------------

/// The kind of change a path underwent between two refs.
///
/// Renames are reported as `Deleted` + `Added` by the adapter (spec.md §3):
/// this type carries no `Renamed` payload distinct from that pair, but the
/// variant is kept so callers that consult raw `git diff --name-status`
/// output can round-trip an `R###` status line before it gets split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileStatus {
    /// File did not exist at the merge base, exists at the tip.
    Added,
    /// File exists at both base and tip with different content.
    Modified,
    /// File existed at the base, does not exist at the tip.
    Deleted,
    /// File was renamed; treated as `Deleted` + `Added` for merge purposes.
    Renamed,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// DivergenceReport
// ---------------------------------------------------------------------------

/// The result of comparing a task branch against the base branch: which
/// paths changed on both sides (candidates for an AI-assisted merge) and
/// which changed only on the task side (safe to apply directly).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DivergenceReport {
    /// The mainline ref the task is being integrated into.
    pub base_ref: Ref,
    /// The task's own ref (its branch tip).
    pub task_ref: Ref,
    /// The merge-base commit, if one could be found.
    pub merge_base_commit: Option<String>,
    /// Paths changed on both sides since the merge base — real candidates
    /// for conflict.
    pub conflicting_paths: BTreeSet<PathBuf>,
    /// Every path the task branch changed relative to the merge base,
    /// together with its status.
    pub changed_paths: Vec<(PathBuf, FileStatus)>,
}

impl DivergenceReport {
    /// `true` when the merge base could not be determined (unrelated
    /// histories) — in that case the caller must treat every changed path
    /// as potentially conflicting.
    #[must_use]
    pub fn has_missing_base(&self) -> bool {
        self.merge_base_commit.is_none()
    }

    /// `true` when no path changed on both sides.
    #[must_use]
    pub fn is_disjoint(&self) -> bool {
        self.conflicting_paths.is_empty()
    }
}

// ---------------------------------------------------------------------------
// MergeTask / MergeResult
// ---------------------------------------------------------------------------

/// One file's unit of merge work: the three candidate texts plus which task
/// it belongs to.
///
/// Invariant: at least one of `ours_text`/`theirs_text` is `Some` — a task
/// with both sides absent has nothing to merge and should never be
/// constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTask {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Content on the task's branch (`None` if the task deleted the file
    /// or never had it).
    pub ours_text: Option<Vec<u8>>,
    /// Content on the mainline branch (`None` if the mainline doesn't have
    /// the file).
    pub theirs_text: Option<Vec<u8>>,
    /// Content at the merge-base commit (`None` if unavailable — unrelated
    /// histories, or the path didn't exist at the base).
    pub base_text: Option<Vec<u8>>,
    /// The task this merge is being performed for.
    pub task_id: TaskId,
}

impl MergeTask {
    /// Construct a `MergeTask`.
    ///
    /// # Panics
    /// Panics in debug builds if both `ours_text` and `theirs_text` are
    /// `None` — callers should filter those out before scheduling.
    #[must_use]
    pub fn new(
        path: PathBuf,
        ours_text: Option<Vec<u8>>,
        theirs_text: Option<Vec<u8>>,
        base_text: Option<Vec<u8>>,
        task_id: TaskId,
    ) -> Self {
        debug_assert!(
            ours_text.is_some() || theirs_text.is_some(),
            "MergeTask for {path:?} has neither ours_text nor theirs_text"
        );
        Self {
            path,
            ours_text,
            theirs_text,
            base_text,
            task_id,
        }
    }
}

/// The outcome of attempting to merge one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Native or trivial merge succeeded with no model call.
    Clean,
    /// The model resolved the conflict (conflict-only or full-file pass).
    AiMerged,
    /// A deterministic heuristic (diff-emptiness) picked a side.
    Heuristic,
    /// The file was deleted as part of this merge.
    Deleted,
    /// The file was intentionally not processed (binary, too large).
    Skipped(String),
    /// No strategy produced a valid result.
    Failed,
}

/// The result of merging one file, produced by the AI Merge Worker.
///
/// Invariant: `merged_text` is `Some` iff `outcome` is one of
/// `Clean`/`AiMerged`/`Heuristic`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// The merged body, when one was produced.
    pub merged_text: Option<Vec<u8>>,
    /// What happened.
    pub outcome: MergeOutcome,
    /// A human-readable explanation, populated for `Skipped`/`Failed`.
    pub error: Option<String>,
}

impl MergeResult {
    /// Build a `Clean` result.
    #[must_use]
    pub fn clean(path: PathBuf, text: Vec<u8>) -> Self {
        Self {
            path,
            merged_text: Some(text),
            outcome: MergeOutcome::Clean,
            error: None,
        }
    }

    /// Build an `AiMerged` result.
    #[must_use]
    pub fn ai_merged(path: PathBuf, text: Vec<u8>) -> Self {
        Self {
            path,
            merged_text: Some(text),
            outcome: MergeOutcome::AiMerged,
            error: None,
        }
    }

    /// Build a `Heuristic` result.
    #[must_use]
    pub fn heuristic(path: PathBuf, text: Vec<u8>) -> Self {
        Self {
            path,
            merged_text: Some(text),
            outcome: MergeOutcome::Heuristic,
            error: None,
        }
    }

    /// Build a `Deleted` result.
    #[must_use]
    pub fn deleted(path: PathBuf) -> Self {
        Self {
            path,
            merged_text: None,
            outcome: MergeOutcome::Deleted,
            error: None,
        }
    }

    /// Build a `Skipped` result with a reason.
    #[must_use]
    pub fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            path,
            merged_text: None,
            outcome: MergeOutcome::Skipped(reason.clone()),
            error: Some(reason),
        }
    }

    /// Build a `Failed` result with an explanation.
    #[must_use]
    pub fn failed(path: PathBuf, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            path,
            merged_text: None,
            outcome: MergeOutcome::Failed,
            error: Some(reason),
        }
    }

    /// `true` if this result should be written to disk and staged.
    #[must_use]
    pub const fn is_applicable(&self) -> bool {
        matches!(
            self.outcome,
            MergeOutcome::Clean | MergeOutcome::AiMerged | MergeOutcome::Heuristic
        )
    }
}

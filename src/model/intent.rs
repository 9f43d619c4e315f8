//! Task intent, file evolution, and timeline entities (spec.md §3).
//!
//! These types record what a task set out to do, what it actually touched,
//! and how the mainline moved while the task was in flight — the context
//! fed to the Prompt Builder for the timeline-aware prompt shape.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::TaskId;

// ---------------------------------------------------------------------------
// TaskIntent
// ---------------------------------------------------------------------------

/// One subtask within a task's implementation plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Free-form status string (e.g. `"done"`, `"in_progress"`).
    pub status: String,
}

/// A task's declared purpose, read from its implementation plan
/// (`.auto-claude/specs/<task_id>/implementation_plan.json`, owned by a
/// component outside this core — read-only here).
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskIntent {
    /// Short title of the task.
    #[serde(default)]
    pub title: String,
    /// Longer description of what the task is meant to accomplish.
    #[serde(default)]
    pub description: String,
    /// Paths the task's plan declares it intends to touch.
    #[serde(default)]
    pub planned_paths: Vec<PathBuf>,
    /// The task's subtasks.
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// An optional free-text summary, preferred over `description` when
    /// present and shorter.
    #[serde(default)]
    pub summary_paragraph: Option<String>,
}

impl TaskIntent {
    /// The text shown to the model for "what is this task trying to do":
    /// prefers `summary_paragraph`, falls back to `description`, falls back
    /// to `title`.
    #[must_use]
    pub fn goal_text(&self) -> &str {
        if let Some(summary) = self.summary_paragraph.as_deref() {
            if !summary.is_empty() {
                return summary;
            }
        }
        if !self.description.is_empty() {
            return &self.description;
        }
        &self.title
    }
}

// ---------------------------------------------------------------------------
// ChangeSummary
// ---------------------------------------------------------------------------

/// A short, model-produced summary of one semantic change to a file
/// (produced by the semantic analyser, out of scope here — this is just
/// the shape it returns).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// One-line description of the change (e.g. `"renamed fn foo to bar"`).
    pub description: String,
    /// Line range in the *new* file this change covers, if known.
    pub line_range: Option<(usize, usize)>,
}

// ---------------------------------------------------------------------------
// TaskSnapshot / FileEvolution
// ---------------------------------------------------------------------------

/// One task's recorded touch of a single path, as tracked by the Evolution
/// Store. Created the first time a refresh observes the task touching the
/// path; mutated only to set `completed_at`, `task_intent`, `merge_commit`,
/// and `semantic_changes` — never deleted (append-only per path).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// The task that touched this path.
    pub task_id: TaskId,
    /// When this snapshot was first recorded.
    pub started_at: DateTime<Utc>,
    /// When the task was marked complete, if it has been.
    pub completed_at: Option<DateTime<Utc>>,
    /// The task's declared intent at the time of the most recent refresh.
    pub task_intent: Option<TaskIntent>,
    /// Semantic change summaries for this path, if a semantic analyser was
    /// available.
    pub semantic_changes: Vec<ChangeSummary>,
    /// The commit this task's changes to this path were merged in, once
    /// merged.
    pub merge_commit: Option<String>,
}

impl TaskSnapshot {
    /// Start a new snapshot for `task_id` at the current time.
    #[must_use]
    pub fn new(task_id: TaskId, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            started_at,
            completed_at: None,
            task_intent: None,
            semantic_changes: Vec::new(),
            merge_commit: None,
        }
    }

    /// `true` once this task has been merged.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merge_commit.is_some()
    }
}

/// The append-only history of every task that has touched one path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvolution {
    /// Path this history is for, relative to the repository root.
    pub path: PathBuf,
    /// Snapshots in the order they were first recorded.
    pub snapshots: Vec<TaskSnapshot>,
}

impl FileEvolution {
    /// Create an empty evolution record for `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            snapshots: Vec::new(),
        }
    }

    /// Find (or create) the snapshot for `task_id`, returning a mutable
    /// reference.
    pub fn snapshot_for(&mut self, task_id: &TaskId, now: DateTime<Utc>) -> &mut TaskSnapshot {
        if let Some(idx) = self.snapshots.iter().position(|s| &s.task_id == task_id) {
            return &mut self.snapshots[idx];
        }
        self.snapshots.push(TaskSnapshot::new(task_id.clone(), now));
        self.snapshots.last_mut().expect("just pushed")
    }

    /// Completed task intents for this path, most recent first, excluding
    /// `exclude`.
    #[must_use]
    pub fn recent_completed(&self, exclude: &TaskId, limit: usize) -> Vec<&TaskSnapshot> {
        let mut completed: Vec<&TaskSnapshot> = self
            .snapshots
            .iter()
            .filter(|s| &s.task_id != exclude && s.completed_at.is_some())
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(limit);
        completed
    }

    /// Tasks that have touched this path but are not yet merged, excluding
    /// `exclude`.
    #[must_use]
    pub fn pending_siblings(&self, exclude: &TaskId) -> Vec<&TaskSnapshot> {
        self.snapshots
            .iter()
            .filter(|s| &s.task_id != exclude && !s.is_merged())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Timeline entities
// ---------------------------------------------------------------------------

/// The commit on the base branch the task branch diverged from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPoint {
    /// The merge-base commit OID (hex).
    pub commit: String,
    /// When the branch point was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// One commit on the mainline after the branch point, touching the path in
/// question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainBranchEvent {
    /// Commit OID (hex).
    pub commit: String,
    /// Commit summary (first line of the message).
    pub summary: String,
    /// When the commit was made.
    pub committed_at: DateTime<Utc>,
}

/// The state of a task's worktree at the moment a merge began, captured so
/// the orchestrator can tell what changed underneath a long-running merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeState {
    /// The task this snapshot belongs to.
    pub task_id: TaskId,
    /// The task branch's tip commit at capture time.
    pub head_commit: String,
    /// When this state was captured.
    pub captured_at: DateTime<Utc>,
}

/// Everything the Prompt Builder's timeline shape needs for one
/// (task, path) pair: what the mainline did after the branch point, who
/// else is still working on the same path, and what recently-completed
/// tasks did to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeContext {
    /// Where the task branched from.
    pub branch_point: BranchPoint,
    /// Mainline commits after the branch point touching this path.
    pub main_events: Vec<MainBranchEvent>,
    /// Other tasks with pending (unmerged) changes to this path.
    pub pending_siblings: Vec<TaskId>,
    /// Recently completed task intents for this path.
    pub recent_completed: Vec<TaskIntent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn task_intent_goal_text_prefers_summary() {
        let intent = TaskIntent {
            title: "t".into(),
            description: "d".into(),
            summary_paragraph: Some("s".into()),
            ..Default::default()
        };
        assert_eq!(intent.goal_text(), "s");
    }

    #[test]
    fn task_intent_goal_text_falls_back_to_description() {
        let intent = TaskIntent {
            title: "t".into(),
            description: "d".into(),
            ..Default::default()
        };
        assert_eq!(intent.goal_text(), "d");
    }

    #[test]
    fn task_intent_goal_text_falls_back_to_title() {
        let intent = TaskIntent {
            title: "t".into(),
            ..Default::default()
        };
        assert_eq!(intent.goal_text(), "t");
    }

    #[test]
    fn file_evolution_snapshot_for_creates_once() {
        let mut evo = FileEvolution::new(PathBuf::from("a.rs"));
        let now = Utc::now();
        evo.snapshot_for(&tid("t1"), now);
        evo.snapshot_for(&tid("t1"), now);
        assert_eq!(evo.snapshots.len(), 1);
    }

    #[test]
    fn pending_siblings_excludes_merged_and_self() {
        let mut evo = FileEvolution::new(PathBuf::from("a.rs"));
        let now = Utc::now();
        evo.snapshot_for(&tid("self"), now);
        let other = evo.snapshot_for(&tid("other"), now);
        other.merge_commit = None;
        let merged = evo.snapshot_for(&tid("merged"), now);
        merged.merge_commit = Some("deadbeef".into());

        let siblings = evo.pending_siblings(&tid("self"));
        let ids: Vec<_> = siblings.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(ids, vec!["other"]);
    }

    #[test]
    fn recent_completed_sorted_newest_first() {
        let mut evo = FileEvolution::new(PathBuf::from("a.rs"));
        let t0 = Utc::now();
        let older = t0 - chrono::Duration::hours(2);
        let newer = t0 - chrono::Duration::hours(1);

        let a = evo.snapshot_for(&tid("a"), t0);
        a.completed_at = Some(older);
        let b = evo.snapshot_for(&tid("b"), t0);
        b.completed_at = Some(newer);

        let recent = evo.recent_completed(&tid("nobody"), 10);
        assert_eq!(recent[0].task_id.as_str(), "b");
        assert_eq!(recent[1].task_id.as_str(), "a");
    }
}

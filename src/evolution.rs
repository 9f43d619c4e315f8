//! Evolution & Timeline Store (spec.md §4.6).
//!
//! Two independent JSON-file-backed stores under `<project>/.auto-claude/`:
//! `evolution/<hash>.json` holds one [`FileEvolution`] per source path, and
//! `timeline/<hash>.json` holds the mainline-event/branch-point records a
//! merge needs for its timeline-aware prompt. Neither store is
//! authoritative over the other (see DESIGN.md, Open Question 1) — both are
//! always refreshed and both are handed to the Prompt Builder.
//!
//! Every write goes through a temp-file-then-rename so a crash mid-write
//! never leaves a torn JSON file behind.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::model::intent::{BranchPoint, FileEvolution, MainBranchEvent, MergeContext, TaskIntent};
use crate::model::types::{Ref, TaskId};
use crate::vcs::{GitError, VcsAdapter};

/// Errors from reading or writing the evolution/timeline stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk JSON didn't parse.
    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        /// Path to the bad file.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A VCS query failed while refreshing the timeline.
    #[error("git query failed while refreshing timeline: {0}")]
    Vcs(#[from] GitError),
}

/// File-backed history and timeline tracker.
pub struct EvolutionStore {
    evolution_dir: PathBuf,
    timeline_dir: PathBuf,
}

fn path_key(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_owned(),
            source,
        })
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().expect("store path always has a parent");
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), value).map_err(|source| StoreError::Corrupt {
        path: path.to_owned(),
        source,
    })?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl EvolutionStore {
    /// Open (or lazily create, on first write) the stores rooted under
    /// `project_dir/.auto-claude/`.
    #[must_use]
    pub fn new(project_dir: &Path) -> Self {
        let base = project_dir.join(".auto-claude");
        Self {
            evolution_dir: base.join("evolution"),
            timeline_dir: base.join("timeline"),
        }
    }

    fn evolution_path(&self, path: &Path) -> PathBuf {
        self.evolution_dir.join(format!("{}.json", path_key(path)))
    }

    /// Load the recorded history for `path`, or an empty one if none exists.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the file exists but is not valid JSON.
    pub fn get_file_evolution(&self, path: &Path) -> Result<FileEvolution, StoreError> {
        Ok(read_json(&self.evolution_path(path))?.unwrap_or_else(|| FileEvolution::new(path.to_owned())))
    }

    fn save_file_evolution(&self, evolution: &FileEvolution) -> Result<(), StoreError> {
        write_json_atomic(&self.evolution_path(&evolution.path), evolution)
    }

    /// Record that `task_id` has touched `path`, merging its intent and
    /// semantic changes into the stored history.
    ///
    /// # Errors
    /// Returns [`StoreError`] on read or write failure.
    pub fn refresh_from_git(
        &self,
        path: &Path,
        task_id: &TaskId,
        intent: Option<TaskIntent>,
    ) -> Result<(), StoreError> {
        let mut evolution = self.get_file_evolution(path)?;
        let now = Utc::now();
        let snapshot = evolution.snapshot_for(task_id, now);
        if let Some(intent) = intent {
            snapshot.task_intent = Some(intent);
        }
        self.save_file_evolution(&evolution)
    }

    /// Mark `task_id`'s touch of `path` as complete.
    ///
    /// # Errors
    /// Returns [`StoreError`] on read or write failure.
    pub fn mark_task_completed(&self, path: &Path, task_id: &TaskId) -> Result<(), StoreError> {
        let mut evolution = self.get_file_evolution(path)?;
        let now = Utc::now();
        evolution.snapshot_for(task_id, now).completed_at = Some(now);
        self.save_file_evolution(&evolution)
    }

    /// Record that `task_id`'s changes to `path` were merged as
    /// `merge_commit`.
    ///
    /// # Errors
    /// Returns [`StoreError`] on read or write failure.
    pub fn on_task_merged(
        &self,
        path: &Path,
        task_id: &TaskId,
        merge_commit: &str,
    ) -> Result<(), StoreError> {
        let mut evolution = self.get_file_evolution(path)?;
        let now = Utc::now();
        evolution.snapshot_for(task_id, now).merge_commit = Some(merge_commit.to_owned());
        self.save_file_evolution(&evolution)
    }

    fn timeline_path(&self, path: &Path) -> PathBuf {
        self.timeline_dir.join(format!("{}.json", path_key(path)))
    }

    /// Capture (and persist) the current worktree head commit for
    /// `task_id`, for later comparison against what the task branch looked
    /// like when a merge began.
    ///
    /// # Errors
    /// Returns [`StoreError`] on I/O failure or [`StoreError::Vcs`] if the
    /// ref can't be resolved.
    pub fn capture_worktree_state(
        &self,
        vcs: &dyn VcsAdapter,
        task_ref: &Ref,
    ) -> Result<String, StoreError> {
        Ok(vcs.rev_parse(task_ref.as_str())?)
    }

    /// Build the full [`MergeContext`] for `path` as seen from `task_id`:
    /// where it branched from, what the mainline did to it since, who else
    /// is still mid-flight on it, and what recently-completed tasks did.
    ///
    /// # Errors
    /// Returns [`StoreError::Vcs`] if the underlying git queries fail.
    pub fn get_merge_context(
        &self,
        vcs: &dyn VcsAdapter,
        base_ref: &Ref,
        task_ref: &Ref,
        task_id: &TaskId,
        path: &Path,
    ) -> Result<MergeContext, StoreError> {
        let merge_base = vcs.merge_base(base_ref, task_ref)?;
        let branch_point_commit = merge_base.unwrap_or_else(|| base_ref.as_str().to_owned());
        let branch_point = BranchPoint {
            commit: branch_point_commit.clone(),
            recorded_at: Utc::now(),
        };

        let main_events = vcs
            .log_touching(&branch_point_commit, base_ref.as_str(), path)?
            .into_iter()
            .map(|c| MainBranchEvent {
                commit: c.oid,
                summary: c.summary,
                committed_at: chrono::DateTime::parse_from_rfc3339(&c.date_rfc3339)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect();

        let evolution = self.get_file_evolution(path)?;
        let pending_siblings = evolution
            .pending_siblings(task_id)
            .into_iter()
            .map(|s| s.task_id.clone())
            .collect();
        let recent_completed = evolution
            .recent_completed(task_id, 5)
            .into_iter()
            .filter_map(|s| s.task_intent.clone())
            .collect();

        Ok(MergeContext {
            branch_point,
            main_events,
            pending_siblings,
            recent_completed,
        })
    }
}

//! Merge Orchestrator (spec.md §4.9) — the `merge_task` entry point that
//! ties every other component together.

use std::path::{Path, PathBuf};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::evolution::EvolutionStore;
use crate::lock::MergeLock;
use crate::model::intent::{MergeContext, TaskIntent};
use crate::model::types::{MergeOutcome, MergeResult, MergeTask, Ref, TaskId};
use crate::scheduler::{run_parallel_merge, CancellationToken};
use crate::transport::ModelTransport;
use crate::vcs::VcsAdapter;

/// Options controlling one `merge_task` invocation.
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    /// Leave the merge staged in the index rather than committing it.
    pub no_commit: bool,
    /// Cooperative cancellation signal for the scheduler's model calls.
    /// Defaults to a token that is never cancelled.
    pub cancel: CancellationToken,
}

/// The outcome of a successful (possibly partial) merge.
#[derive(Clone, Debug)]
pub struct MergeSummary {
    /// Per-file results, in the order they were processed.
    pub results: Vec<MergeResult>,
    /// The commit produced, if one was made (`None` when `no_commit` was set).
    pub commit: Option<String>,
}

/// Run the task-merge pipeline described in spec.md §4.9.
///
/// # Errors
/// Returns [`MergeError::NoSuchBuild`] if the task's worktree doesn't
/// exist, [`MergeError::Busy`] if another merge is in flight,
/// [`MergeError::VcsFailure`] on unrecoverable git errors, and
/// [`MergeError::DivergenceUnresolved`] when one or more files could not
/// be merged (the merge is left partially staged, uncommitted).
#[allow(clippy::too_many_arguments)]
pub fn merge_task(
    project_dir: &Path,
    task_id: &TaskId,
    intent: &TaskIntent,
    vcs: &dyn VcsAdapter,
    transport: &dyn ModelTransport,
    store: &EvolutionStore,
    config: &MergeConfig,
    options: MergeOptions,
) -> Result<MergeSummary, MergeError> {
    let worktree = project_dir.join(task_id.worktree_rel_path());
    if !worktree.exists() {
        return Err(MergeError::NoSuchBuild {
            task_id: task_id.clone(),
            worktree,
        });
    }

    let _lock = MergeLock::acquire(project_dir, task_id).map_err(|_| MergeError::Busy {
        task_id: task_id.clone(),
    })?;

    let base_ref = Ref::new(config.base_branch.clone());
    let task_ref = Ref::new(task_id.branch_name());

    store
        .capture_worktree_state(vcs, &task_ref)
        .map_err(|e| store_failure("capturing worktree state", e))?;

    let report = vcs
        .divergence(&base_ref, &task_ref)
        .map_err(|e| MergeError::VcsFailure {
            context: "computing branch divergence".to_owned(),
            source: e,
        })?;

    for (path, _status) in &report.changed_paths {
        let _ = store.refresh_from_git(path, task_id, Some(intent.clone()));
    }

    let mut simple_paths: Vec<(PathBuf, crate::model::types::FileStatus)> = Vec::new();
    let mut merge_tasks = Vec::new();
    let mut contexts = Vec::new();

    for (path, status) in &report.changed_paths {
        if report.conflicting_paths.contains(path) {
            let ours = vcs
                .show(task_ref.as_str(), path)
                .map_err(|e| vcs_failure("reading task-side content", e))?;
            let theirs = vcs
                .show(base_ref.as_str(), path)
                .map_err(|e| vcs_failure("reading mainline content", e))?;
            let base_text = match &report.merge_base_commit {
                Some(commit) => vcs
                    .show(commit, path)
                    .map_err(|e| vcs_failure("reading merge-base content", e))?,
                None => None,
            };
            let context = store
                .get_merge_context(vcs, &base_ref, &task_ref, task_id, path)
                .ok();
            merge_tasks.push(MergeTask::new(
                path.clone(),
                ours,
                theirs,
                base_text,
                task_id.clone(),
            ));
            contexts.push(context);
        } else {
            simple_paths.push((path.clone(), *status));
        }
    }

    // Non-overlapping paths: apply the task's own version directly. Added
    // paths are written before modified ones (so a modification that
    // imports a newly added file never runs ahead of it); deletions are
    // collected to apply last of all, after the overlapping-merge results.
    simple_paths.sort_by_key(|(_, status)| match status {
        crate::model::types::FileStatus::Added => 0,
        crate::model::types::FileStatus::Modified | crate::model::types::FileStatus::Renamed => 1,
        crate::model::types::FileStatus::Deleted => 2,
    });

    let mut pending_deletions = Vec::new();
    for (path, _status) in &simple_paths {
        match vcs
            .show(task_ref.as_str(), path)
            .map_err(|e| vcs_failure("reading task-side content for direct apply", e))?
        {
            Some(contents) => {
                vcs.write_and_stage(&worktree, path, &contents)
                    .map_err(|e| vcs_failure("staging a non-conflicting change", e))?;
            }
            None => pending_deletions.push(path.clone()),
        }
    }

    let intents: Vec<TaskIntent> = merge_tasks.iter().map(|_| intent.clone()).collect();
    let contexts_owned: Vec<Option<MergeContext>> = contexts;
    let results = run_parallel_merge(
        &merge_tasks,
        &intents,
        vcs,
        transport,
        &contexts_owned,
        config,
        &options.cancel,
    );

    let mut failed: Vec<(PathBuf, String)> = Vec::new();
    let mut merged_paths: Vec<PathBuf> = Vec::new();
    for result in &results {
        match &result.outcome {
            MergeOutcome::Clean | MergeOutcome::AiMerged | MergeOutcome::Heuristic => {
                if let Some(text) = &result.merged_text {
                    vcs.write_and_stage(&worktree, &result.path, text)
                        .map_err(|e| vcs_failure("staging a merged file", e))?;
                }
                merged_paths.push(result.path.clone());
            }
            MergeOutcome::Deleted => {
                vcs.stage_deletion(&worktree, &result.path)
                    .map_err(|e| vcs_failure("staging a deletion", e))?;
            }
            MergeOutcome::Skipped(_) => {
                // Left untouched, matching the mainline's existing content.
            }
            MergeOutcome::Failed => {
                failed.push((
                    result.path.clone(),
                    result.error.clone().unwrap_or_else(|| "unknown failure".to_owned()),
                ));
            }
        }
    }

    for path in &pending_deletions {
        vcs.stage_deletion(&worktree, path)
            .map_err(|e| vcs_failure("staging a non-conflicting deletion", e))?;
    }

    // Cancellation takes priority over a failure tally: the scheduler may
    // have produced `Failed` results only because the model calls backing
    // them were cut off, not because the merge was genuinely unresolvable.
    // Per-path work already staged above is left in place; only the commit
    // (and the evolution-store bookkeeping tied to it) is skipped.
    if options.cancel.is_cancelled() {
        return Err(MergeError::Cancelled {
            task_id: task_id.clone(),
        });
    }

    if !failed.is_empty() {
        return Err(MergeError::DivergenceUnresolved { failed });
    }

    // `on_task_merged`/`mark_task_completed` record the real merge commit,
    // so they only make sense once that commit actually exists: with
    // `no_commit` set the merge is left staged and nothing is recorded yet.
    let commit = if options.no_commit {
        None
    } else {
        let message = format!("merge {task_id}");
        let oid = vcs
            .commit(&worktree, &message)
            .map_err(|e| vcs_failure("committing the merge", e))?;
        for path in &merged_paths {
            let _ = store.on_task_merged(path, task_id, &oid);
            let _ = store.mark_task_completed(path, task_id);
        }
        Some(oid)
    };

    Ok(MergeSummary { results, commit })
}

fn vcs_failure(context: &str, source: crate::vcs::GitError) -> MergeError {
    MergeError::VcsFailure {
        context: context.to_owned(),
        source,
    }
}

fn store_failure(context: &str, source: crate::evolution::StoreError) -> MergeError {
    MergeError::Io(std::io::Error::other(format!(
        "{context}: {source}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::FileStatus;
    use crate::transport::fakes::FailingTransport;
    use crate::vcs::{CommitInfo, GitError, MergeFileOutput};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct FakeVcs {
        staged: Mutex<Vec<PathBuf>>,
        deleted: Mutex<Vec<PathBuf>>,
        committed: Mutex<bool>,
    }

    impl FakeVcs {
        fn new() -> Self {
            Self {
                staged: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                committed: Mutex::new(false),
            }
        }
    }

    impl VcsAdapter for FakeVcs {
        fn merge_base(&self, _base: &Ref, _task: &Ref) -> Result<Option<String>, GitError> {
            Ok(Some("base-commit".to_owned()))
        }

        fn current_branch(&self) -> Result<String, GitError> {
            Ok("main".to_owned())
        }

        fn show(&self, rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError> {
            if path == Path::new("added.rs") {
                return Ok(if rev.contains("task") {
                    Some(b"new file".to_vec())
                } else {
                    None
                });
            }
            Ok(Some(format!("{rev}:{}", path.display()).into_bytes()))
        }

        fn diff_name_status(
            &self,
            _from: &str,
            _to: &str,
        ) -> Result<Vec<(PathBuf, FileStatus)>, GitError> {
            Ok(vec![(PathBuf::from("added.rs"), FileStatus::Added)])
        }

        fn divergence(
            &self,
            base: &Ref,
            task: &Ref,
        ) -> Result<crate::model::types::DivergenceReport, GitError> {
            Ok(crate::model::types::DivergenceReport {
                base_ref: base.clone(),
                task_ref: task.clone(),
                merge_base_commit: Some("base-commit".to_owned()),
                conflicting_paths: BTreeSet::new(),
                changed_paths: vec![(PathBuf::from("added.rs"), FileStatus::Added)],
            })
        }

        fn merge_tree(&self, base: &Ref, ours: &Ref, theirs: &Ref) -> Result<crate::vcs::MergeTreeOutput, GitError> {
            let _ = (base, ours, theirs);
            Ok(crate::vcs::MergeTreeOutput {
                clean: true,
                paths_with_conflicts: BTreeSet::new(),
                output_text: String::new(),
            })
        }

        fn merge_file(&self, ours: &[u8], _base: &[u8], _theirs: &[u8]) -> Result<MergeFileOutput, GitError> {
            Ok(MergeFileOutput {
                text: ours.to_vec(),
                is_clean: true,
            })
        }

        fn write_and_stage(&self, _worktree: &Path, path: &Path, _contents: &[u8]) -> Result<(), GitError> {
            self.staged.lock().unwrap().push(path.to_owned());
            Ok(())
        }

        fn stage_deletion(&self, _worktree: &Path, path: &Path) -> Result<(), GitError> {
            self.deleted.lock().unwrap().push(path.to_owned());
            Ok(())
        }

        fn commit(&self, _worktree: &Path, _message: &str) -> Result<String, GitError> {
            *self.committed.lock().unwrap() = true;
            Ok("new-commit".to_owned())
        }

        fn rev_parse(&self, _rev: &str) -> Result<String, GitError> {
            Ok("head-commit".to_owned())
        }

        fn log_touching(&self, _from: &str, _to: &str, _path: &Path) -> Result<Vec<CommitInfo>, GitError> {
            Ok(vec![])
        }
    }

    #[test]
    fn missing_worktree_errors() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        let vcs = FakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();

        let result = merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions::default(),
        );
        assert!(matches!(result, Err(MergeError::NoSuchBuild { .. })));
    }

    #[test]
    fn disjoint_changes_apply_directly_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        std::fs::create_dir_all(dir.path().join(".worktrees/t1")).unwrap();
        let vcs = FakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();

        let summary = merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions::default(),
        )
        .unwrap();

        assert!(summary.commit.is_some());
        assert!(vcs.staged.lock().unwrap().contains(&PathBuf::from("added.rs")));
        assert!(*vcs.committed.lock().unwrap());
    }

    /// Reports its changed paths in an order that is deliberately hostile
    /// to the ordering invariant (modified before added), to prove the
    /// orchestrator re-sorts rather than trusting the adapter's order.
    struct OrderingFakeVcs {
        staged: Mutex<Vec<PathBuf>>,
    }

    impl OrderingFakeVcs {
        fn new() -> Self {
            Self {
                staged: Mutex::new(Vec::new()),
            }
        }
    }

    impl VcsAdapter for OrderingFakeVcs {
        fn merge_base(&self, _base: &Ref, _task: &Ref) -> Result<Option<String>, GitError> {
            Ok(Some("base-commit".to_owned()))
        }

        fn current_branch(&self) -> Result<String, GitError> {
            Ok("main".to_owned())
        }

        fn show(&self, _rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError> {
            Ok(Some(path.to_string_lossy().into_owned().into_bytes()))
        }

        fn diff_name_status(
            &self,
            _from: &str,
            _to: &str,
        ) -> Result<Vec<(PathBuf, FileStatus)>, GitError> {
            Ok(vec![
                (PathBuf::from("main.py"), FileStatus::Modified),
                (PathBuf::from("helper.py"), FileStatus::Added),
            ])
        }

        fn divergence(
            &self,
            base: &Ref,
            task: &Ref,
        ) -> Result<crate::model::types::DivergenceReport, GitError> {
            Ok(crate::model::types::DivergenceReport {
                base_ref: base.clone(),
                task_ref: task.clone(),
                merge_base_commit: Some("base-commit".to_owned()),
                conflicting_paths: BTreeSet::new(),
                changed_paths: vec![
                    (PathBuf::from("main.py"), FileStatus::Modified),
                    (PathBuf::from("helper.py"), FileStatus::Added),
                ],
            })
        }

        fn merge_tree(&self, base: &Ref, ours: &Ref, theirs: &Ref) -> Result<crate::vcs::MergeTreeOutput, GitError> {
            let _ = (base, ours, theirs);
            Ok(crate::vcs::MergeTreeOutput {
                clean: true,
                paths_with_conflicts: BTreeSet::new(),
                output_text: String::new(),
            })
        }

        fn merge_file(&self, ours: &[u8], _base: &[u8], _theirs: &[u8]) -> Result<MergeFileOutput, GitError> {
            Ok(MergeFileOutput {
                text: ours.to_vec(),
                is_clean: true,
            })
        }

        fn write_and_stage(&self, _worktree: &Path, path: &Path, _contents: &[u8]) -> Result<(), GitError> {
            self.staged.lock().unwrap().push(path.to_owned());
            Ok(())
        }

        fn stage_deletion(&self, _worktree: &Path, _path: &Path) -> Result<(), GitError> {
            Ok(())
        }

        fn commit(&self, _worktree: &Path, _message: &str) -> Result<String, GitError> {
            Ok("new-commit".to_owned())
        }

        fn rev_parse(&self, _rev: &str) -> Result<String, GitError> {
            Ok("head-commit".to_owned())
        }

        fn log_touching(&self, _from: &str, _to: &str, _path: &Path) -> Result<Vec<CommitInfo>, GitError> {
            Ok(vec![])
        }
    }

    #[test]
    fn added_paths_are_applied_before_modified_paths_regardless_of_diff_order() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        std::fs::create_dir_all(dir.path().join(".worktrees/t1")).unwrap();
        let vcs = OrderingFakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();

        merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions::default(),
        )
        .unwrap();

        let staged = vcs.staged.lock().unwrap();
        assert_eq!(
            *staged,
            vec![PathBuf::from("helper.py"), PathBuf::from("main.py")],
            "added paths must be staged before modified paths even though the adapter reported them in the opposite order"
        );
    }

    #[test]
    fn successful_merge_records_the_real_commit_oid_in_the_evolution_store() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        std::fs::create_dir_all(dir.path().join(".worktrees/t1")).unwrap();
        let vcs = FakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();

        let summary = merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions::default(),
        )
        .unwrap();

        let commit = summary.commit.expect("merge committed");
        assert_eq!(commit, "new-commit");

        let evolution = store.get_file_evolution(Path::new("added.rs")).unwrap();
        let snapshot = evolution
            .snapshots
            .iter()
            .find(|s| s.task_id == task_id)
            .expect("snapshot recorded for this task");
        assert_eq!(snapshot.merge_commit.as_deref(), Some(commit.as_str()));
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn pre_cancelled_token_reports_cancelled_instead_of_committing() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        std::fs::create_dir_all(dir.path().join(".worktrees/t1")).unwrap();
        let vcs = FakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();
        let cancel = crate::scheduler::CancellationToken::new();
        cancel.cancel();

        let err = merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions {
                cancel,
                ..Default::default()
            },
        )
        .expect_err("a pre-cancelled merge must not succeed");

        assert!(matches!(err, MergeError::Cancelled { .. }));
        assert!(!*vcs.committed.lock().unwrap());
    }

    #[test]
    fn no_commit_option_leaves_merge_staged() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = TaskId::new("t1").unwrap();
        std::fs::create_dir_all(dir.path().join(".worktrees/t1")).unwrap();
        let vcs = FakeVcs::new();
        let transport = FailingTransport;
        let store = EvolutionStore::new(dir.path());
        let config = MergeConfig::default();
        let intent = TaskIntent::default();

        let summary = merge_task(
            dir.path(),
            &task_id,
            &intent,
            &vcs,
            &transport,
            &store,
            &config,
            MergeOptions {
                no_commit: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(summary.commit.is_none());
        assert!(!*vcs.committed.lock().unwrap());
    }
}

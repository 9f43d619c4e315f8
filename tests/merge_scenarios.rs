//! End-to-end scenarios for `merge_task`, driven against real git
//! repositories rather than fakes (see `tests/common/mod.rs`).

mod common;

use std::path::{Path, PathBuf};

use taskmerge::config::MergeConfig;
use taskmerge::evolution::EvolutionStore;
use taskmerge::lock::MergeLock;
use taskmerge::model::intent::TaskIntent;
use taskmerge::model::types::{MergeOutcome, TaskId};
use taskmerge::orchestrator::{self, MergeOptions};
use taskmerge::transport::{ModelTransport, TransportError};
use taskmerge::vcs::GitCli;
use taskmerge::MergeError;

use common::{commit_all, create_task_worktree, git, init_repo, write_file};

struct FailingTransport;

impl ModelTransport for FailingTransport {
    fn call(&self, _system: &str, _user: &str) -> Result<String, TransportError> {
        Err(TransportError::Unavailable("no model in this test".to_owned()))
    }
}

struct EchoTransport {
    response: String,
}

impl ModelTransport for EchoTransport {
    fn call(&self, _system: &str, _user: &str) -> Result<String, TransportError> {
        Ok(self.response.clone())
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

/// Scenario 1: the mainline hasn't moved; the task's own change applies
/// directly with no model call and a commit lands in the task's worktree.
#[test]
fn clean_fast_path_applies_without_model_call() {
    let repo = init_repo();
    write_file(repo.path(), "a.txt", "x\n");
    commit_all(repo.path(), "add a.txt");

    let worktree = create_task_worktree(repo.path(), "t1");
    write_file(&worktree, "a.txt", "x\ny\n");
    commit_all(&worktree, "task edits a.txt");

    let vcs = GitCli::new(repo.path().to_owned());
    let task_id = TaskId::new("t1").unwrap();
    let intent = TaskIntent::default();
    let transport = FailingTransport;
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let summary = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect("merge should succeed with no model call needed");

    assert!(summary.commit.is_some());
    assert_eq!(read(&worktree.join("a.txt")), "x\ny\n");
}

/// Scenario 2: both sides touch the same file but different lines. Git's
/// own three-way merge resolves it cleanly, so a transport that always
/// fails still results in success.
#[test]
fn disjoint_hunks_merge_natively_without_model_call() {
    let repo = init_repo();
    let base: String = (1..=10).map(|i| format!("L{i}\n")).collect();
    write_file(repo.path(), "f.txt", &base);
    commit_all(repo.path(), "add f.txt");

    let worktree = create_task_worktree(repo.path(), "t2");
    let task_version = base.replace("L3\n", "L3-task\n");
    write_file(&worktree, "f.txt", &task_version);
    commit_all(&worktree, "task edits line 3");

    // Main repo checkout is still on `main`; edit a different line there.
    let main_version = base.replace("L8\n", "L8-main\n");
    write_file(repo.path(), "f.txt", &main_version);
    commit_all(repo.path(), "main edits line 8");

    let vcs = GitCli::new(repo.path().to_owned());
    let task_id = TaskId::new("t2").unwrap();
    let intent = TaskIntent::default();
    let transport = FailingTransport;
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let summary = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect("disjoint hunks should merge without a model call");

    assert!(summary.commit.is_some());
    let merged = read(&worktree.join("f.txt"));
    assert!(merged.contains("L3-task"));
    assert!(merged.contains("L8-main"));
}

/// Scenario 3: both sides change the same line. The native merge conflicts
/// and a model resolves it; the worktree ends up with the model's answer.
#[test]
fn overlapping_hunk_is_resolved_by_the_model() {
    let repo = init_repo();
    write_file(repo.path(), "s.txt", "v1\n");
    commit_all(repo.path(), "add s.txt");

    let worktree = create_task_worktree(repo.path(), "t3");
    write_file(&worktree, "s.txt", "v-task\n");
    commit_all(&worktree, "task edits s.txt");

    write_file(repo.path(), "s.txt", "v-main\n");
    commit_all(repo.path(), "main edits s.txt");

    let vcs = GitCli::new(repo.path().to_owned());
    let task_id = TaskId::new("t3").unwrap();
    let intent = TaskIntent::default();
    let transport = EchoTransport {
        response: "v-resolved\n".to_owned(),
    };
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let summary = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect("model resolution should let the merge succeed");

    assert!(summary.commit.is_some());
    assert!(summary
        .results
        .iter()
        .any(|r| r.path == Path::new("s.txt") && r.outcome == MergeOutcome::AiMerged));
    assert_eq!(read(&worktree.join("s.txt")), "v-resolved\n");
}

/// Scenario 4: same overlapping conflict as above, but the model is
/// unavailable. Both sides differ from the base, so the heuristic can't
/// pick a winner either; the merge reports the file as unresolved and
/// leaves the mainline version intact in the worktree rather than guessing.
#[test]
fn model_unavailable_and_no_heuristic_leaves_conflict_unresolved() {
    let repo = init_repo();
    write_file(repo.path(), "s.txt", "v1\n");
    commit_all(repo.path(), "add s.txt");

    let worktree = create_task_worktree(repo.path(), "t4");
    write_file(&worktree, "s.txt", "v-task\n");
    commit_all(&worktree, "task edits s.txt");

    write_file(repo.path(), "s.txt", "v-main\n");
    commit_all(repo.path(), "main edits s.txt");

    let vcs = GitCli::new(repo.path().to_owned());
    let task_id = TaskId::new("t4").unwrap();
    let intent = TaskIntent::default();
    let transport = FailingTransport;
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let err = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect_err("neither a model nor a heuristic can resolve this");

    match err {
        MergeError::DivergenceUnresolved { failed } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, PathBuf::from("s.txt"));
        }
        other => panic!("expected DivergenceUnresolved, got {other:?}"),
    }
}

/// Scenario 5: the task both adds a new file and modifies an existing one
/// that doesn't overlap with any mainline change. Both apply directly; the
/// new file and its dependent modification both land regardless of the
/// order `git diff --name-status` happened to report them in.
#[test]
fn added_file_and_dependent_modification_both_apply() {
    let repo = init_repo();
    write_file(repo.path(), "main.py", "print('start')\n");
    commit_all(repo.path(), "add main.py");

    let worktree = create_task_worktree(repo.path(), "t5");
    write_file(&worktree, "helper.py", "VALUE = 42\n");
    write_file(
        &worktree,
        "main.py",
        "import helper\nprint(helper.VALUE)\n",
    );
    commit_all(&worktree, "task adds helper and wires it up");

    let vcs = GitCli::new(repo.path().to_owned());
    let task_id = TaskId::new("t5").unwrap();
    let intent = TaskIntent::default();
    let transport = FailingTransport;
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let summary = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect("disjoint additions and modifications should apply directly");

    assert!(summary.commit.is_some());
    assert_eq!(read(&worktree.join("helper.py")), "VALUE = 42\n");
    assert_eq!(
        read(&worktree.join("main.py")),
        "import helper\nprint(helper.VALUE)\n"
    );
}

/// Scenario 6: a merge already in progress for a task makes a second
/// attempt fail with `Busy` rather than racing it; once the first attempt
/// releases its lock, a later attempt succeeds.
#[test]
fn concurrent_merge_attempts_yield_exactly_one_success() {
    let repo = init_repo();
    write_file(repo.path(), "a.txt", "x\n");
    commit_all(repo.path(), "add a.txt");

    let worktree = create_task_worktree(repo.path(), "t6");
    write_file(&worktree, "a.txt", "x\ny\n");
    commit_all(&worktree, "task edits a.txt");

    let task_id = TaskId::new("t6").unwrap();
    let vcs = GitCli::new(repo.path().to_owned());
    let intent = TaskIntent::default();
    let transport = FailingTransport;
    let store = EvolutionStore::new(repo.path());
    let config = MergeConfig::default();

    let held = MergeLock::acquire(repo.path(), &task_id).expect("first attempt holds the lock");

    let second_attempt = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    );
    assert!(matches!(second_attempt, Err(MergeError::Busy { .. })));

    drop(held);

    let retry = orchestrator::merge_task(
        repo.path(),
        &task_id,
        &intent,
        &vcs,
        &transport,
        &store,
        &config,
        MergeOptions::default(),
    )
    .expect("merge should succeed once the lock is released");
    assert!(retry.commit.is_some());
}

/// Sanity check on the harness itself: the worktree's branch really is
/// distinct from `main` and carries the task's own commit.
#[test]
fn harness_creates_a_real_linked_worktree() {
    let repo = init_repo();
    let worktree = create_task_worktree(repo.path(), "t7");
    write_file(&worktree, "only_in_task.txt", "hi\n");
    commit_all(&worktree, "task-only commit");

    let branches = git(repo.path(), &["branch", "--list", "auto-claude/t7"]);
    assert!(branches.contains("auto-claude/t7"));
    assert!(worktree.join("only_in_task.txt").exists());
}

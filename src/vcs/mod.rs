//! Thin, synchronous wrapper over the repository's command-line interface.
//!
//! Every operation here shells out to `git` directly rather than linking a
//! git library: the merge engine only ever needs the handful of plumbing
//! commands below, and subprocessing keeps it trivially compatible with
//! whatever git the host has installed, including any clean/smudge filters
//! or hooks configured on the repository.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::model::types::{DivergenceReport, FileStatus, Ref};

/// Errors surfaced by [`GitCli`] operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// The `git` binary could not be executed at all (not found, not
    /// executable, etc).
    #[error("failed to launch git: {0}")]
    Spawn(#[source] std::io::Error),

    /// `git` ran and exited non-zero.
    #[error("git {args} failed (exit {code}): {stderr}")]
    CommandFailed {
        /// The arguments passed to git, joined with spaces, for diagnostics.
        args: String,
        /// The process exit code, or -1 if terminated by a signal.
        code: i32,
        /// Captured stderr.
        stderr: String,
    },

    /// Output that was expected to be valid UTF-8 (a ref name, an OID)
    /// wasn't.
    #[error("git produced non-UTF-8 output for {context}")]
    InvalidUtf8 {
        /// What the output was supposed to represent.
        context: String,
    },

    /// A `git diff --name-status` line didn't parse.
    #[error("unrecognised diff status line: {0:?}")]
    UnrecognisedStatusLine(String),
}

/// The repository-interaction surface the merge engine depends on.
///
/// A trait so tests can substitute a fake without touching a real
/// repository; [`GitCli`] is the only production implementation.
pub trait VcsAdapter {
    /// The commit both `base` and `task` share as their most recent common
    /// ancestor, or `None` if the histories are unrelated.
    fn merge_base(&self, base: &Ref, task: &Ref) -> Result<Option<String>, GitError>;

    /// The branch `HEAD` currently points to in the main repository
    /// checkout (not a linked worktree).
    fn current_branch(&self) -> Result<String, GitError>;

    /// The file contents of `path` at `rev`, or `None` if the path doesn't
    /// exist there.
    fn show(&self, rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError>;

    /// Every path that differs between `from` and `to`, with its status.
    fn diff_name_status(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<(PathBuf, FileStatus)>, GitError>;

    /// Compute the full divergence report between `base` and `task`.
    fn divergence(&self, base: &Ref, task: &Ref) -> Result<DivergenceReport, GitError>;

    /// Merge `ours` and `theirs` against `base` entirely inside the object
    /// database. Never touches the working tree or index, so callers can
    /// probe for conflicts without disturbing a checked-out worktree.
    fn merge_tree(&self, base: &Ref, ours: &Ref, theirs: &Ref) -> Result<MergeTreeOutput, GitError>;

    /// Run git's own three-way line merge on already-extracted texts,
    /// writing conflict markers into the result on overlap. Returns the
    /// merged body and whether it is clean (no markers).
    fn merge_file(&self, ours: &[u8], base: &[u8], theirs: &[u8]) -> Result<MergeFileOutput, GitError>;

    /// Stage `path` with `contents` in the worktree at `worktree_root`.
    fn write_and_stage(&self, worktree_root: &Path, path: &Path, contents: &[u8]) -> Result<(), GitError>;

    /// Stage the deletion of `path` in the worktree at `worktree_root`.
    fn stage_deletion(&self, worktree_root: &Path, path: &Path) -> Result<(), GitError>;

    /// Commit whatever is currently staged in `worktree_root`.
    fn commit(&self, worktree_root: &Path, message: &str) -> Result<String, GitError>;

    /// The commit OID `rev` resolves to.
    fn rev_parse(&self, rev: &str) -> Result<String, GitError>;

    /// Commits reachable from `to` but not from `from`, touching `path`,
    /// oldest first.
    fn log_touching(
        &self,
        from: &str,
        to: &str,
        path: &Path,
    ) -> Result<Vec<CommitInfo>, GitError>;
}

/// One commit as returned by [`VcsAdapter::log_touching`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit OID (hex).
    pub oid: String,
    /// First line of the commit message.
    pub summary: String,
    /// Author date, as an RFC 3339 string (parsed by the caller into a
    /// `chrono::DateTime` where needed).
    pub date_rfc3339: String,
}

/// The result of a `git merge-tree --write-tree` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTreeOutput {
    /// `true` if the merge produced no conflicts.
    pub clean: bool,
    /// Paths that ended up with a conflict, per the tool's own report.
    pub paths_with_conflicts: BTreeSet<PathBuf>,
    /// Full stdout, kept for diagnostics and for forwarding to a model
    /// prompt if a caller wants the raw conflict description.
    pub output_text: String,
}

/// The result of a `git merge-file` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeFileOutput {
    /// The merged text, with conflict markers present if `is_clean` is
    /// `false`.
    pub text: Vec<u8>,
    /// `true` if git merged with no conflicts.
    pub is_clean: bool,
}

/// A [`VcsAdapter`] that shells out to the `git` binary found on `PATH`.
#[derive(Clone, Debug)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    /// Wrap the repository rooted at `repo_root`.
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(GitError::Spawn)
    }

    fn run_ok(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(dir, args)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8 {
            context: args.join(" "),
        })
    }

    fn parse_status_line(line: &str) -> Result<(PathBuf, FileStatus), GitError> {
        let mut parts = line.splitn(2, '\t');
        let code = parts.next().unwrap_or("");
        let rest = parts.next().ok_or_else(|| GitError::UnrecognisedStatusLine(line.to_owned()))?;
        let status = match code.as_bytes().first() {
            Some(b'A') => FileStatus::Added,
            Some(b'M') => FileStatus::Modified,
            Some(b'D') => FileStatus::Deleted,
            Some(b'R') => FileStatus::Renamed,
            _ => return Err(GitError::UnrecognisedStatusLine(line.to_owned())),
        };
        // Renames report "old\tnew"; the new path is what matters to us.
        let path = rest.rsplit('\t').next().unwrap_or(rest);
        Ok((PathBuf::from(path), status))
    }

    /// Pull conflicted paths out of `git merge-tree --write-tree`'s
    /// conflict output. After the leading tree-OID line, both the
    /// "Conflicted file info" and "Informational messages" sections
    /// consist of lines ending in a tab-separated path, whatever stage
    /// metadata or message text precedes it, so taking the text after the
    /// last tab on every non-empty line is format-tolerant without having
    /// to model each section's internal structure.
    fn parse_merge_tree_conflicts(text: &str) -> BTreeSet<PathBuf> {
        text.lines()
            .skip(1)
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.rsplit('\t').next())
            .map(PathBuf::from)
            .collect()
    }
}

impl VcsAdapter for GitCli {
    fn merge_base(&self, base: &Ref, task: &Ref) -> Result<Option<String>, GitError> {
        let output = self.run(&self.repo_root, &["merge-base", base.as_str(), task.as_str()])?;
        if output.status.success() {
            let oid = String::from_utf8(output.stdout)
                .map_err(|_| GitError::InvalidUtf8 {
                    context: "merge-base".to_owned(),
                })?
                .trim()
                .to_owned();
            Ok(Some(oid))
        } else {
            // Exit code 1 means no common ancestor; anything else is real.
            match output.status.code() {
                Some(1) => Ok(None),
                code => Err(GitError::CommandFailed {
                    args: format!("merge-base {} {}", base, task),
                    code: code.unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }),
            }
        }
    }

    fn current_branch(&self) -> Result<String, GitError> {
        Ok(self
            .run_ok(&self.repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_owned())
    }

    fn show(&self, rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError> {
        let spec = format!("{rev}:{}", path.display());
        let output = self.run(&self.repo_root, &["show", &spec])?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") {
                Ok(None)
            } else {
                Err(GitError::CommandFailed {
                    args: format!("show {spec}"),
                    code: output.status.code().unwrap_or(-1),
                    stderr: stderr.into_owned(),
                })
            }
        }
    }

    fn diff_name_status(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<(PathBuf, FileStatus)>, GitError> {
        let spec = format!("{from}...{to}");
        let out = self.run_ok(&self.repo_root, &["diff", "--name-status", &spec])?;
        out.lines()
            .filter(|l| !l.is_empty())
            .map(Self::parse_status_line)
            .collect()
    }

    fn divergence(&self, base: &Ref, task: &Ref) -> Result<DivergenceReport, GitError> {
        let merge_base_commit = self.merge_base(base, task)?;
        let changed_paths = self.diff_name_status(base.as_str(), task.as_str())?;

        // An object-database merge against the actual merge-base is the
        // authoritative source of which paths conflict: two files can both
        // appear in `changed_paths` and still merge cleanly if their edits
        // don't overlap, and `merge_tree` is the only primitive that knows
        // that without writing anything to the working tree.
        let conflicting_paths = match &merge_base_commit {
            Some(merge_base_oid) => {
                let merge_base_ref = Ref::new(merge_base_oid.clone());
                let result = self.merge_tree(&merge_base_ref, base, task)?;
                result.paths_with_conflicts
            }
            None => changed_paths.iter().map(|(p, _)| p.clone()).collect(),
        };

        Ok(DivergenceReport {
            base_ref: base.clone(),
            task_ref: task.clone(),
            merge_base_commit,
            conflicting_paths,
            changed_paths,
        })
    }

    fn merge_tree(&self, base: &Ref, ours: &Ref, theirs: &Ref) -> Result<MergeTreeOutput, GitError> {
        let merge_base_arg = format!("--merge-base={base}");
        let output = self.run(
            &self.repo_root,
            &[
                "merge-tree",
                "--write-tree",
                &merge_base_arg,
                ours.as_str(),
                theirs.as_str(),
            ],
        )?;
        let text = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8 {
            context: "merge-tree".to_owned(),
        })?;

        match output.status.code() {
            Some(0) => Ok(MergeTreeOutput {
                clean: true,
                paths_with_conflicts: BTreeSet::new(),
                output_text: text,
            }),
            Some(1) => {
                let paths_with_conflicts = Self::parse_merge_tree_conflicts(&text);
                Ok(MergeTreeOutput {
                    clean: false,
                    paths_with_conflicts,
                    output_text: text,
                })
            }
            code => Err(GitError::CommandFailed {
                args: format!("merge-tree --write-tree {merge_base_arg} {ours} {theirs}"),
                code: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }

    fn merge_file(&self, ours: &[u8], base: &[u8], theirs: &[u8]) -> Result<MergeFileOutput, GitError> {
        let dir = tempfile::tempdir().map_err(GitError::Spawn)?;
        let ours_path = dir.path().join("ours");
        let base_path = dir.path().join("base");
        let theirs_path = dir.path().join("theirs");
        std::fs::write(&ours_path, ours).map_err(GitError::Spawn)?;
        std::fs::write(&base_path, base).map_err(GitError::Spawn)?;
        std::fs::write(&theirs_path, theirs).map_err(GitError::Spawn)?;

        let output = Command::new("git")
            .arg("merge-file")
            .arg("-p")
            .arg(&ours_path)
            .arg(&base_path)
            .arg(&theirs_path)
            .output()
            .map_err(GitError::Spawn)?;

        match output.status.code() {
            Some(0) => Ok(MergeFileOutput {
                text: output.stdout,
                is_clean: true,
            }),
            Some(1) => Ok(MergeFileOutput {
                text: output.stdout,
                is_clean: false,
            }),
            code => Err(GitError::CommandFailed {
                args: "merge-file -p ours base theirs".to_owned(),
                code: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }

    fn write_and_stage(&self, worktree_root: &Path, path: &Path, contents: &[u8]) -> Result<(), GitError> {
        let full = worktree_root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(GitError::Spawn)?;
        }
        std::fs::write(&full, contents).map_err(GitError::Spawn)?;
        self.run_ok(worktree_root, &["add", "--", &path.to_string_lossy()])?;
        Ok(())
    }

    fn stage_deletion(&self, worktree_root: &Path, path: &Path) -> Result<(), GitError> {
        self.run_ok(worktree_root, &["rm", "-f", "--", &path.to_string_lossy()])?;
        Ok(())
    }

    fn commit(&self, worktree_root: &Path, message: &str) -> Result<String, GitError> {
        self.run_ok(worktree_root, &["commit", "-m", message, "--no-verify"])?;
        self.rev_parse("HEAD")
    }

    fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.run_ok(&self.repo_root, &["rev-parse", rev])?.trim().to_owned())
    }

    fn log_touching(
        &self,
        from: &str,
        to: &str,
        path: &Path,
    ) -> Result<Vec<CommitInfo>, GitError> {
        const SEP: &str = "\x1f";
        let range = format!("{from}..{to}");
        let format_arg = format!("--format=%H{SEP}%s{SEP}%aI");
        let path_str = path.to_string_lossy();
        let out = self.run_ok(
            &self.repo_root,
            &[
                "log",
                "--reverse",
                &format_arg,
                &range,
                "--",
                path_str.as_ref(),
            ],
        )?;
        let mut commits = Vec::new();
        for line in out.lines().filter(|l| !l.is_empty()) {
            let mut fields = line.split(SEP);
            let oid = fields.next().unwrap_or_default().to_owned();
            let summary = fields.next().unwrap_or_default().to_owned();
            let date_rfc3339 = fields.next().unwrap_or_default().to_owned();
            commits.push(CommitInfo {
                oid,
                summary,
                date_rfc3339,
            });
        }
        Ok(commits)
    }
}

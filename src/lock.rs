//! Durable, file-scoped merge lock (spec.md §4.5).
//!
//! One lock file per task under `<project>/.auto-claude/.locks/`, acquired
//! as an RAII guard so the lock is released even if the merge panics or
//! returns early. A stale lock — either past its age threshold or owned by
//! a process that's no longer running — is treated as free and reclaimed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::model::types::TaskId;

/// Seconds after which an uncontested lock is considered stale, re-exported
/// from [`crate::config`] for convenience at call sites that don't already
/// have a loaded config.
pub use crate::config::MERGE_LOCK_TIMEOUT_SECS;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process currently holds a live lock for this task.
    #[error(
        "a merge for task '{task_id}' is already in progress (lock held by pid {pid}); \
         if this is wrong, delete {path}",
        path = path.display(),
    )]
    Busy {
        /// The contested task.
        task_id: TaskId,
        /// The pid recorded in the lock file.
        pid: u32,
        /// Path to the lock file.
        path: PathBuf,
    },

    /// Filesystem operation failed.
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockData {
    task_id: String,
    timestamp: u64,
    pid: u32,
}

/// A held merge lock. Dropping this releases it.
pub struct MergeLock {
    path: PathBuf,
}

impl MergeLock {
    /// Acquire the merge lock for `task_id` under `project_dir`, reclaiming
    /// a stale or corrupted lock file if one is found.
    ///
    /// # Errors
    /// Returns [`LockError::Busy`] if a live lock is already held, or
    /// [`LockError::Io`] on filesystem failure.
    pub fn acquire(project_dir: &Path, task_id: &TaskId) -> Result<Self, LockError> {
        use std::io::Write;

        let lock_dir = project_dir.join(".auto-claude").join(".locks");
        fs::create_dir_all(&lock_dir)?;
        let path = lock_dir.join(format!("merge-{task_id}.lock"));

        let data = LockData {
            task_id: task_id.as_str().to_owned(),
            timestamp: now_secs(),
            pid: std::process::id(),
        };
        let contents = serde_json::to_string(&data).expect("LockData always serializes");

        // `create_new` makes the creation itself the exclusivity check: two
        // processes racing to create the same path can't both succeed, unlike
        // a separate read-then-write which leaves a window where both see no
        // lock and both proceed. A lost race here falls through to the
        // staleness check below rather than failing outright, so a lock left
        // behind by a dead process still gets reclaimed.
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(contents.as_bytes())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_lock(&path)? {
                        Some(existing) if !is_stale(&existing) => {
                            return Err(LockError::Busy {
                                task_id: task_id.clone(),
                                pid: existing.pid,
                                path,
                            });
                        }
                        _ => {
                            // Stale, corrupted, or raced away entirely: reclaim and
                            // retry the atomic create once more.
                            fs::remove_file(&path).or_else(|e| {
                                if e.kind() == std::io::ErrorKind::NotFound {
                                    Ok(())
                                } else {
                                    Err(e)
                                }
                            })?;
                        }
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }

        Err(LockError::Io(std::io::Error::other(
            "lock file repeatedly recreated by another process",
        )))
    }
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        // Best-effort cleanup, matching the original's "ignore failures" release.
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock(path: &Path) -> Result<Option<LockData>, std::io::Error> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    // A corrupted lock file is treated the same as a stale one: reclaimable.
    Ok(serde_json::from_str(&contents).ok())
}

fn is_stale(lock: &LockData) -> bool {
    let age = now_secs().saturating_sub(lock.timestamp);
    if age > MERGE_LOCK_TIMEOUT_SECS {
        return true;
    }
    lock.pid != 0 && !pid_is_running(lock.pid)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

#[cfg(unix)]
fn pid_is_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_running(_pid: u32) -> bool {
    true
}

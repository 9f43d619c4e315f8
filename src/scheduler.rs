//! Parallel Merge Scheduler (spec.md §4.8).
//!
//! File-level work runs on plain OS threads via [`std::thread::scope`];
//! concurrency is bounded only around the model-call section of each
//! file's merge, using a `crossbeam-channel` bounded channel of unit
//! tokens as a semaphore. A file whose merge never calls the model (clean
//! native merge, heuristic fallback) never touches the semaphore at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::MergeConfig;
use crate::model::intent::MergeContext;
use crate::model::types::{MergeResult, MergeTask};
use crate::transport::{ModelTransport, TransportError};
use crate::vcs::VcsAdapter;
use crate::worker::merge_file;

/// How often a blocked model-call permit wait re-checks cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation signal shared across one [`run_parallel_merge`]
/// call.
///
/// Cloning shares the underlying flag: cancelling any clone is observed by
/// every other clone, including a worker already blocked waiting for a
/// model-call permit. Cancellation never kills a worker thread outright
/// (there's no safe way to do that); instead a permit wait that observes
/// cancellation returns `None`, the model call it was guarding fails, and
/// the worker falls through to its own heuristic/failure handling exactly
/// as it would for any other model outage.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that starts out not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A bounded pool of permits gating concurrent model calls.
///
/// Cloning shares the same underlying channel; each [`ModelPermit`] token
/// taken out of it is returned to the channel when dropped.
#[derive(Clone)]
pub struct ModelSemaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl ModelSemaphore {
    /// Create a semaphore with `capacity` permits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        for _ in 0..capacity.max(1) {
            let _ = tx.send(());
        }
        Self { tx, rx }
    }

    /// Block until a permit is available, returning a guard that releases
    /// it on drop.
    fn acquire(&self) -> ModelPermit<'_> {
        self.rx.recv().expect("semaphore channel never closes while self is alive");
        ModelPermit { sem: self }
    }

    /// Like [`acquire`](Self::acquire), but polls `cancel` between waits so
    /// a cancelled caller doesn't block forever behind a full semaphore.
    /// Returns `None` if cancellation was observed before a permit freed up.
    fn acquire_cancellable(&self, cancel: &CancellationToken) -> Option<ModelPermit<'_>> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(()) => return Some(ModelPermit { sem: self }),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

struct ModelPermit<'a> {
    sem: &'a ModelSemaphore,
}

impl Drop for ModelPermit<'_> {
    fn drop(&mut self) {
        let _ = self.sem.tx.send(());
    }
}

/// A [`ModelTransport`] wrapper that acquires a [`ModelSemaphore`] permit
/// for the duration of each call, gating concurrency at the model-call
/// boundary rather than around the whole worker.
pub struct GatedTransport<'a> {
    inner: &'a dyn ModelTransport,
    semaphore: &'a ModelSemaphore,
    cancel: &'a CancellationToken,
}

impl<'a> GatedTransport<'a> {
    /// Wrap `inner`, gating its calls through `semaphore` and aborting the
    /// wait for a permit if `cancel` fires first.
    #[must_use]
    pub fn new(inner: &'a dyn ModelTransport, semaphore: &'a ModelSemaphore, cancel: &'a CancellationToken) -> Self {
        Self { inner, semaphore, cancel }
    }
}

impl ModelTransport for GatedTransport<'_> {
    fn call(&self, system: &str, user: &str) -> Result<String, TransportError> {
        let Some(_permit) = self.semaphore.acquire_cancellable(self.cancel) else {
            return Err(TransportError::Unavailable("merge cancelled".to_owned()));
        };
        self.inner.call(system, user)
    }
}

/// Run every file's merge in parallel, preserving `tasks`' input order in
/// the returned results.
///
/// `merge_context` is looked up per-path by `context_for`; files with no
/// available context simply use the simple three-way or conflict-only
/// prompt shapes.
pub fn run_parallel_merge<'env>(
    tasks: &'env [MergeTask],
    intents: &'env [crate::model::intent::TaskIntent],
    vcs: &'env dyn VcsAdapter,
    transport: &'env dyn ModelTransport,
    contexts: &'env [Option<MergeContext>],
    config: &'env MergeConfig,
    cancel: &'env CancellationToken,
) -> Vec<MergeResult> {
    assert_eq!(tasks.len(), intents.len(), "one intent per task");
    assert_eq!(tasks.len(), contexts.len(), "one context slot per task");

    let semaphore = ModelSemaphore::new(config.concurrency);
    let gated = GatedTransport::new(transport, &semaphore, cancel);

    std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let gated = &gated;
                let intent = &intents[i];
                let context = contexts[i].as_ref();
                scope.spawn(move || merge_file(task, intent, vcs, gated, context, config))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap_or_else(|_| {
            MergeResult::failed(std::path::PathBuf::new(), "worker thread panicked")
        })).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTransport {
        max_concurrent: Arc<AtomicUsize>,
        current: Arc<AtomicUsize>,
    }

    impl ModelTransport for CountingTransport {
        fn call(&self, _system: &str, _user: &str) -> Result<String, crate::transport::TransportError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok("resolved".to_owned())
        }
    }

    #[test]
    fn semaphore_caps_concurrent_permits() {
        let sem = ModelSemaphore::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..6 {
                let sem = sem.clone();
                let current = Arc::clone(&current);
                let max_seen = Arc::clone(&max_seen);
                scope.spawn(move || {
                    let _permit = sem.acquire();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    current.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn gated_transport_respects_capacity() {
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            max_concurrent: Arc::clone(&max_concurrent),
            current: Arc::clone(&current),
        };
        let semaphore = ModelSemaphore::new(1);
        let cancel = CancellationToken::new();
        let gated = GatedTransport::new(&transport, &semaphore, &cancel);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let gated = &gated;
                scope.spawn(move || {
                    let _ = gated.call("sys", "user");
                });
            }
        });

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_token_aborts_a_blocked_permit_wait() {
        let semaphore = ModelSemaphore::new(1);
        let cancel = CancellationToken::new();
        let transport = CountingTransport {
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(AtomicUsize::new(0)),
        };
        let gated = GatedTransport::new(&transport, &semaphore, &cancel);

        // Hold the only permit so the next call blocks, then cancel.
        let held = semaphore.acquire();
        cancel.cancel();
        let result = gated.call("sys", "user");
        drop(held);

        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[test]
    fn cancellation_token_clone_shares_the_same_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}

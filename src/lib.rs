//! `taskmerge`: an intent-aware three-way merge engine for parallel AI
//! coding agents working in separate git worktrees.
//!
//! The pieces fit together as a pipeline: the [`vcs`] adapter shells out to
//! `git` for every repository query and mutation; [`model`] carries the
//! vocabulary (task ids, conflict hunks, intents, timelines) that flows
//! through it; [`evolution`] persists per-file history and timeline state
//! across tasks; [`prompt`] turns a conflict plus its context into text for
//! a model; [`worker`] runs one file's five-step merge algorithm;
//! [`scheduler`] fans worker calls out across files while bounding model
//! concurrency; and [`orchestrator`] drives the whole `merge_task` sequence
//! end to end.

pub mod config;
pub mod error;
pub mod evolution;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod scheduler;
pub mod transport;
pub mod validate;
pub mod vcs;
pub mod worker;

pub use error::MergeError;
pub use orchestrator::{merge_task, MergeOptions, MergeSummary};

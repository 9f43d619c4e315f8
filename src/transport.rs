//! Injected-capability boundaries for the language model and the semantic
//! analyser (spec.md §4.7, §4.4).
//!
//! Both the model transport's network implementation and the semantic
//! analyser's tree-sitter-based summarisation are explicitly out of scope
//! here; these traits exist only to give the merge engine a narrow,
//! testable seam to call through. Production callers inject their own
//! implementation; tests inject fakes.

use crate::model::intent::ChangeSummary;

/// Errors a [`ModelTransport`] may report.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The model was unreachable or timed out.
    #[error("model call failed: {0}")]
    Unavailable(String),

    /// The model responded, but the response could not be used (e.g. empty).
    #[error("model response unusable: {0}")]
    BadResponse(String),
}

/// A single call to a language model: a system prompt, a user prompt, and
/// the model's raw text response.
pub trait ModelTransport: Send + Sync {
    /// Send `system` and `user` to the model and return its raw text
    /// response.
    ///
    /// # Errors
    /// Returns [`TransportError`] if the call fails or times out.
    fn call(&self, system: &str, user: &str) -> Result<String, TransportError>;
}

/// Optional tree-sitter-backed semantic summariser.
///
/// Not every deployment has one configured; the worker falls back to
/// textual diff descriptions when absent.
pub trait SemanticAnalyser: Send + Sync {
    /// Summarise the semantic effect of `diff` on the file at `path`.
    ///
    /// # Errors
    /// Returns a message describing why no summary could be produced; this
    /// is never fatal to the merge, only to the summary's presence.
    fn summarise_changes(&self, path: &str, diff: &str) -> Result<Vec<ChangeSummary>, String>;
}

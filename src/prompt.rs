//! Prompt Builder (spec.md §4.4).
//!
//! Three prompt shapes, all built from the same ingredients: a task's
//! intent, the conflicted hunks (or full three-way texts), and — for the
//! richest shape — the mainline timeline since the branch point. Every
//! shape is reduced to [`crate::config::PROMPT_CHAR_BUDGET`] characters by
//! dropping history from its oldest end first; the hunks and the task's own
//! intent are never dropped.

use std::path::Path;

use crate::model::conflict::ConflictHunk;
use crate::model::intent::{MergeContext, TaskIntent};

/// A fully assembled prompt, ready to hand to a [`crate::transport::ModelTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    /// System message: role framing, language, output-format instructions.
    pub system: String,
    /// User message: the task's intent plus whatever content the shape calls for.
    pub user: String,
}

fn language_hint(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "Rust",
        Some("py") => "Python",
        Some("ts" | "tsx") => "TypeScript",
        Some("js" | "jsx") => "JavaScript",
        Some("go") => "Go",
        Some("json") => "JSON",
        _ => "the file's",
    }
}

fn system_message(path: &Path) -> String {
    format!(
        "You are resolving a merge conflict in a {lang} source file at `{}`. \
         Produce only the resolved code for each conflict region, with no \
         commentary, no markdown fences unless the surrounding context needs \
         them, and no conflict markers in your output.",
        path.display(),
        lang = language_hint(path)
    )
}

/// Build the conflict-only prompt: the hunks alone, plus a header naming
/// the path, language, and the task's goal.
#[must_use]
pub fn build_conflict_only(path: &Path, intent: &TaskIntent, hunks: &[ConflictHunk]) -> Prompt {
    let mut user = format!(
        "Task goal: {goal}\nFile: {path}\n\nResolve the following {n} conflict region(s). \
         Respond with one resolution per region, in order, separated by a line containing only `---`.\n\n",
        goal = intent.goal_text(),
        path = path.display(),
        n = hunks.len(),
    );
    for (i, hunk) in hunks.iter().enumerate() {
        user.push_str(&format!("--- Region {} ---\n", i + 1));
        user.push_str("<<< ours\n");
        user.push_str(&hunk.ours_lines);
        if let Some(base) = &hunk.base_lines {
            user.push_str("\n||| base\n");
            user.push_str(base);
        }
        user.push_str("\n=== theirs\n");
        user.push_str(&hunk.theirs_lines);
        user.push_str("\n>>> end\n\n");
    }
    Prompt {
        system: system_message(path),
        user: truncate_to_budget(user, crate::config::PROMPT_CHAR_BUDGET),
    }
}

/// Build the simple three-way prompt: full ours/theirs/base content.
#[must_use]
pub fn build_simple_three_way(
    path: &Path,
    intent: &TaskIntent,
    ours: &str,
    theirs: &str,
    base: Option<&str>,
) -> Prompt {
    let mut user = format!(
        "Task goal: {goal}\nFile: {path}\n\nProduce the fully merged file contents, \
         combining both versions' changes faithfully.\n\n",
        goal = intent.goal_text(),
        path = path.display(),
    );
    if let Some(base) = base {
        user.push_str("--- base ---\n");
        user.push_str(base);
        user.push('\n');
    }
    user.push_str("--- ours (task branch) ---\n");
    user.push_str(ours);
    user.push_str("\n--- theirs (mainline) ---\n");
    user.push_str(theirs);
    user.push('\n');

    Prompt {
        system: system_message(path),
        user: truncate_to_budget(user, crate::config::PROMPT_CHAR_BUDGET),
    }
}

/// Build the timeline-aware prompt: the simple three-way content plus
/// mainline events, pending siblings, and recently completed task intents
/// for the same path.
#[must_use]
pub fn build_timeline_aware(
    path: &Path,
    intent: &TaskIntent,
    ours: &str,
    theirs: &str,
    base: Option<&str>,
    context: &MergeContext,
) -> Prompt {
    let core = build_simple_three_way(path, intent, ours, theirs, base);

    let mut history = String::new();
    history.push_str("\n--- mainline history since branch point ---\n");
    for event in &context.main_events {
        history.push_str(&format!("{}: {}\n", &event.commit[..event.commit.len().min(8)], event.summary));
    }
    if !context.pending_siblings.is_empty() {
        history.push_str("\n--- other in-flight tasks touching this file ---\n");
        for sibling in &context.pending_siblings {
            history.push_str(&format!("- {sibling}\n"));
        }
    }
    if !context.recent_completed.is_empty() {
        history.push_str("\n--- recently completed tasks on this file ---\n");
        for completed in &context.recent_completed {
            history.push_str(&format!("- {}\n", completed.goal_text()));
        }
    }

    let budget = crate::config::PROMPT_CHAR_BUDGET;
    let remaining = budget.saturating_sub(core.user.len());
    let user = format!("{}{}", core.user, truncate_history_oldest_first(&history, remaining));

    Prompt {
        system: core.system,
        user,
    }
}

/// Truncate `text` to at most `budget` characters, preferring to cut from
/// the end (used for shapes that have no separately-structured history).
fn truncate_to_budget(text: String, budget: usize) -> String {
    if text.len() <= budget {
        text
    } else {
        text.chars().take(budget).collect()
    }
}

/// Truncate a history block to `budget` characters by dropping whole lines
/// from the *start* (oldest first) until it fits, preserving section
/// headers where possible.
fn truncate_history_oldest_first(history: &str, budget: usize) -> String {
    if history.len() <= budget {
        return history.to_owned();
    }
    let lines: Vec<&str> = history.lines().collect();
    let mut start = 0;
    while start < lines.len() {
        let candidate = lines[start..].join("\n");
        if candidate.len() <= budget {
            return candidate;
        }
        start += 1;
    }
    String::new()
}

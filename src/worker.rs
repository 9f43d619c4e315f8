//! AI Merge Worker (spec.md §4.7).
//!
//! Takes one [`MergeTask`] through, in order, a native three-way merge, a
//! conflict-only model pass, a full-file model pass, and a deterministic
//! heuristic fallback — the first step to produce a syntactically valid
//! body wins. Pure with respect to disk: the worker only reads through the
//! [`VcsAdapter`] and never writes; the caller applies the result.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::config::{is_binary_path, MergeConfig};
use crate::model::conflict::{parse_markers, reassemble};
use crate::model::intent::{MergeContext, TaskIntent};
use crate::model::types::{MergeResult, MergeTask};
use crate::prompt::{build_conflict_only, build_simple_three_way, build_timeline_aware};
use crate::transport::ModelTransport;
use crate::validate::validate_merged_syntax;
use crate::vcs::VcsAdapter;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*\n([\s\S]*?)```").expect("valid regex"));

const REGION_SEPARATOR: &str = "---";

fn extract_single_block(response: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(response) {
        return caps[1].trim_end().to_owned();
    }
    response.trim().to_owned()
}

/// Split a multi-region model response into one resolution per region, in
/// order, tolerating fenced code per region or bare text.
fn extract_region_resolutions(response: &str, expected: usize) -> Vec<String> {
    let mut regions: Vec<&str> = response
        .split(&format!("\n{REGION_SEPARATOR}\n"))
        .collect();
    if regions.len() == 1 {
        regions = response.split(REGION_SEPARATOR).collect();
    }
    let mut resolutions: Vec<String> = regions
        .into_iter()
        .map(extract_single_block)
        .filter(|s| !s.is_empty())
        .collect();
    resolutions.truncate(expected);
    while resolutions.len() < expected {
        resolutions.push(String::new());
    }
    resolutions
}

fn diff_is_empty(base: Option<&[u8]>, side: Option<&[u8]>) -> bool {
    match (base, side) {
        (Some(b), Some(s)) => b == s,
        (None, None) => true,
        _ => false,
    }
}

/// Run the five-step algorithm for one file.
///
/// `merge_context`, when present and the task is behind the base by at
/// least one commit, selects the timeline-aware prompt over the simple
/// three-way one for the full-file pass.
pub fn merge_file(
    task: &MergeTask,
    intent: &TaskIntent,
    vcs: &dyn VcsAdapter,
    transport: &dyn ModelTransport,
    merge_context: Option<&MergeContext>,
    config: &MergeConfig,
) -> MergeResult {
    let path = task.path.clone();

    // Step 1: pre-checks.
    if is_binary_path(&path) {
        return MergeResult::skipped(path, "binary");
    }
    match (&task.ours_text, &task.theirs_text) {
        (None, _) => return MergeResult::deleted(path),
        (Some(_), None) => {
            return MergeResult::clean(path, task.ours_text.clone().unwrap_or_default());
        }
        (Some(ours), Some(theirs)) => {
            let too_large = |text: &[u8]| count_lines(text) > config.max_file_lines_for_ai;
            if too_large(ours) || too_large(theirs) {
                return MergeResult::skipped(path, "too large");
            }
        }
    }

    let ours = task.ours_text.as_deref().unwrap_or_default();
    let theirs = task.theirs_text.as_deref().unwrap_or_default();
    let base = task.base_text.as_deref();

    // Both sides made the same change (or neither changed it at all): no
    // divergence to resolve, so no native merge or model call is needed,
    // regardless of whether a common ancestor text is available.
    if ours == theirs {
        return MergeResult::clean(path, ours.to_vec());
    }

    // Step 2: native merge.
    if let Some(base) = base {
        match vcs.merge_file(ours, base, theirs) {
            Ok(native) if native.is_clean => {
                let outcome = validate_merged_syntax(&path, &native.text, validator_timeout(config));
                if outcome.valid {
                    return MergeResult::clean(path, native.text);
                }
            }
            Ok(native) => {
                // Conflicted: proceed to step 3 using the marked body.
                if let Some(result) =
                    try_conflict_only(&path, intent, &native.text, transport, config)
                {
                    return result;
                }
            }
            Err(_) => {
                // Fall through to the full-file pass.
            }
        }
    }

    // Step 4: full-file model merge.
    if let Some(result) = try_full_file(&path, intent, ours, theirs, base, merge_context, transport, config)
    {
        return result;
    }

    // Step 5: heuristic fallback.
    if diff_is_empty(base, Some(ours)) {
        return MergeResult::heuristic(path, theirs.to_vec());
    }
    if diff_is_empty(base, Some(theirs)) {
        return MergeResult::heuristic(path, ours.to_vec());
    }
    if base.is_none() && config.prefer_task_on_heuristic {
        return MergeResult::heuristic(path, ours.to_vec());
    }

    MergeResult::failed(path, "no merge strategy produced a valid result")
}

fn count_lines(text: &[u8]) -> usize {
    text.iter().filter(|&&b| b == b'\n').count() + 1
}

fn validator_timeout(config: &MergeConfig) -> Duration {
    Duration::from_secs(config.validator_timeout_secs)
}

fn try_conflict_only(
    path: &std::path::Path,
    intent: &TaskIntent,
    marked_body: &[u8],
    transport: &dyn ModelTransport,
    config: &MergeConfig,
) -> Option<MergeResult> {
    let body = String::from_utf8_lossy(marked_body);
    let parsed = parse_markers(&body);
    if parsed.is_clean() {
        return None;
    }

    let prompt = build_conflict_only(path, intent, &parsed.hunks);
    let response = transport.call(&prompt.system, &prompt.user).ok()?;
    let resolutions = extract_region_resolutions(&response, parsed.hunks.len());
    let merged = reassemble(&parsed, &resolutions);
    let merged_bytes = merged.into_bytes();

    let outcome = validate_merged_syntax(path, &merged_bytes, validator_timeout(config));
    if outcome.valid {
        Some(MergeResult::ai_merged(path.to_owned(), merged_bytes))
    } else {
        None
    }
}

fn try_full_file(
    path: &std::path::Path,
    intent: &TaskIntent,
    ours: &[u8],
    theirs: &[u8],
    base: Option<&[u8]>,
    merge_context: Option<&MergeContext>,
    transport: &dyn ModelTransport,
    config: &MergeConfig,
) -> Option<MergeResult> {
    let ours_str = String::from_utf8_lossy(ours);
    let theirs_str = String::from_utf8_lossy(theirs);
    let base_str = base.map(String::from_utf8_lossy);

    let prompt = match merge_context {
        Some(ctx) if !ctx.main_events.is_empty() => build_timeline_aware(
            path,
            intent,
            &ours_str,
            &theirs_str,
            base_str.as_deref(),
            ctx,
        ),
        _ => build_simple_three_way(path, intent, &ours_str, &theirs_str, base_str.as_deref()),
    };

    let response = transport.call(&prompt.system, &prompt.user).ok()?;
    let candidate = extract_single_block(&response).into_bytes();
    let outcome = validate_merged_syntax(path, &candidate, validator_timeout(config));
    if outcome.valid {
        return Some(MergeResult::ai_merged(path.to_owned(), candidate));
    }

    // One corrective retry: prompt is only the invalid body plus the
    // validator's message.
    let retry_user = format!(
        "The following code has a syntax error: {}\n\nFix it and return only the corrected code.\n\n{}",
        outcome.message.unwrap_or_default(),
        String::from_utf8_lossy(&candidate)
    );
    let retry_response = transport.call(&prompt.system, &retry_user).ok()?;
    let retry_candidate = extract_single_block(&retry_response).into_bytes();
    let retry_outcome = validate_merged_syntax(path, &retry_candidate, validator_timeout(config));
    if retry_outcome.valid {
        Some(MergeResult::ai_merged(path.to_owned(), retry_candidate))
    } else {
        None
    }
}

//! Conflict-marker parser and reassembler (spec.md §4.3).
//!
//! Extracts hunks delimited by the standard three-way markers from a file
//! body, and reassembles a body from the original annotated text plus a
//! resolution per hunk. Hunks are located left-to-right in a single scan;
//! line numbers refer to the annotated body, not the original files.

const OURS_MARKER: &str = "<<<<<<<";
const BASE_MARKER: &str = "|||||||";
const SEP_MARKER: &str = "=======";
const THEIRS_MARKER: &str = ">>>>>>>";

/// One contiguous conflict region extracted from a marked-up body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictHunk {
    /// First line of the hunk (the `<<<<<<<` marker), 0-indexed into the
    /// annotated body.
    pub start_line: usize,
    /// Line after the last line of the hunk (the `>>>>>>>` marker), 0-indexed.
    pub end_line: usize,
    /// Text between `<<<<<<<` and (`|||||||` or `=======`).
    pub ours_lines: String,
    /// Text between `|||||||` and `=======`, if a base section is present.
    pub base_lines: Option<String>,
    /// Text between `=======` and `>>>>>>>`.
    pub theirs_lines: String,
}

/// A body split into the literal lines outside any hunk and the hunks
/// found within it, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedBody {
    /// Original line-split body (markers included), kept so reassembly can
    /// splice resolutions back in without re-deriving line boundaries.
    lines: Vec<String>,
    /// The hunks found, in left-to-right order. Each hunk's `start_line`/
    /// `end_line` index into `lines`.
    pub hunks: Vec<ConflictHunk>,
}

impl ParsedBody {
    /// `true` if the body contained no conflict markers.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// Split `text` into lines, preserving the line terminator convention by
/// always re-joining with `\n` (matches `git merge-file`'s own normalisation
/// of line endings within conflict bodies).
fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_owned).collect()
}

/// Parse a conflict-marked body into its literal lines and hunks.
///
/// Markers are recognised by line prefix (git appends the ref name after
/// the marker, e.g. `<<<<<<< HEAD`), matching `git merge-file`'s output.
#[must_use]
pub fn parse_markers(body: &str) -> ParsedBody {
    let lines = split_lines(body);
    let mut hunks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].starts_with(OURS_MARKER) {
            let start_line = i;
            let mut ours = Vec::new();
            let mut base: Option<Vec<String>> = None;
            let mut theirs = Vec::new();
            i += 1;

            while i < lines.len()
                && !lines[i].starts_with(BASE_MARKER)
                && !lines[i].starts_with(SEP_MARKER)
            {
                ours.push(lines[i].clone());
                i += 1;
            }

            if i < lines.len() && lines[i].starts_with(BASE_MARKER) {
                i += 1;
                let mut base_lines = Vec::new();
                while i < lines.len() && !lines[i].starts_with(SEP_MARKER) {
                    base_lines.push(lines[i].clone());
                    i += 1;
                }
                base = Some(base_lines);
            }

            if i < lines.len() && lines[i].starts_with(SEP_MARKER) {
                i += 1;
            }

            while i < lines.len() && !lines[i].starts_with(THEIRS_MARKER) {
                theirs.push(lines[i].clone());
                i += 1;
            }

            // Consume the closing marker line itself.
            if i < lines.len() && lines[i].starts_with(THEIRS_MARKER) {
                i += 1;
            }
            let end_line = i;

            hunks.push(ConflictHunk {
                start_line,
                end_line,
                ours_lines: ours.join("\n"),
                base_lines: base.map(|b| b.join("\n")),
                theirs_lines: theirs.join("\n"),
            });
        } else {
            i += 1;
        }
    }
    ParsedBody { lines, hunks }
}

/// Reassemble a body from `parsed` by replacing each hunk's marker block
/// (all four markers plus the ours/base/theirs slots) with the
/// corresponding entry in `resolutions`.
///
/// `resolutions` must have exactly one entry per hunk in `parsed.hunks`,
/// in the same order. Lines outside any hunk are reproduced unchanged.
///
/// # Panics
/// Panics if `resolutions.len() != parsed.hunks.len()`.
#[must_use]
pub fn reassemble(parsed: &ParsedBody, resolutions: &[String]) -> String {
    assert_eq!(
        resolutions.len(),
        parsed.hunks.len(),
        "one resolution required per hunk"
    );

    let mut out_lines: Vec<String> = Vec::with_capacity(parsed.lines.len());
    let mut cursor = 0;
    for (hunk, resolution) in parsed.hunks.iter().zip(resolutions) {
        out_lines.extend_from_slice(&parsed.lines[cursor..hunk.start_line]);
        if !resolution.is_empty() {
            out_lines.extend(resolution.split('\n').map(str::to_owned));
        }
        cursor = hunk.end_line;
    }
    out_lines.extend_from_slice(&parsed.lines[cursor..]);
    out_lines.join("\n")
}

/// Convenience: parse `body`, then immediately reassemble it by resolving
/// every hunk to its own `ours_lines`. Used as the parser/reassembler
/// round-trip identity check in tests.
#[must_use]
pub fn reassemble_preferring_ours(body: &str) -> String {
    let parsed = parse_markers(body);
    let resolutions: Vec<String> = parsed.hunks.iter().map(|h| h.ours_lines.clone()).collect();
    reassemble(&parsed, &resolutions)
}

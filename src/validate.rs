//! Post-merge syntax validation (spec.md §4.2).
//!
//! Dispatches by file extension to the tool appropriate for that language,
//! writing the candidate text to a scratch file outside the project root
//! (so editors/dev servers watching the project don't react to it). Every
//! failure mode other than an actual syntax error — missing tool, timeout,
//! unrecognised extension — fails open: the merge proceeds rather than
//! blocking on tooling the host may not have installed.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

/// The outcome of validating one file's merged content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// `true` unless a real syntax error was found.
    pub valid: bool,
    /// Populated when `valid` is `false`.
    pub message: Option<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// Validate `content`, treating `path` only as a source of its extension
/// (the file need not exist). `timeout` bounds each subprocess call this
/// spawns; a validator that doesn't finish in time fails open.
#[must_use]
pub fn validate_merged_syntax(path: &Path, content: &[u8], timeout: Duration) -> ValidationOutcome {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("ts" | "tsx" | "js" | "jsx") => validate_js_like(ext.as_deref().unwrap(), content, timeout),
        Some("py") => validate_python(content, timeout),
        Some("json") => validate_json(content),
        _ => ValidationOutcome::ok(),
    }
}

fn write_scratch(suffix: &str, content: &[u8]) -> Option<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.suffix(suffix);
    let mut file = builder.tempfile().ok()?;
    use std::io::Write as _;
    file.write_all(content).ok()?;
    file.flush().ok()?;
    Some(file)
}

fn run_with_timeout(mut command: Command, timeout: Duration) -> Option<(Option<i32>, Vec<u8>, Vec<u8>)> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    match child.wait_timeout(timeout).ok()? {
        Some(status) => {
            let output = child.wait_with_output().ok()?;
            Some((status.code(), output.stdout, output.stderr))
        }
        None => {
            // Timed out: kill and treat as fail-open by returning None.
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    }
}

fn validate_js_like(ext: &str, content: &[u8], timeout: Duration) -> ValidationOutcome {
    let suffix = format!(".{ext}");
    let Some(scratch) = write_scratch(&suffix, content) else {
        return ValidationOutcome::ok();
    };
    let tmp_path = scratch.path();

    if ext == "ts" || ext == "tsx" {
        let mut cmd = Command::new("npx");
        cmd.args(["tsc", "--noEmit", "--skipLibCheck"]).arg(tmp_path);
        match run_with_timeout(cmd, timeout) {
            None => return ValidationOutcome::ok(),
            Some((Some(0), _, _)) => {}
            Some((_, _, stderr)) => {
                let error_lines: Vec<String> = String::from_utf8_lossy(&stderr)
                    .lines()
                    .filter(|l| !l.is_empty() && !l.to_ascii_lowercase().starts_with("npm warn"))
                    .take(3)
                    .map(str::to_owned)
                    .collect();
                if !error_lines.is_empty() {
                    return ValidationOutcome::error(error_lines.join("\n"));
                }
            }
        }
    }

    let mut cmd = Command::new("npx");
    cmd.args(["eslint", "--no-eslintrc", "--parser", "@typescript-eslint/parser"])
        .arg(tmp_path);
    match run_with_timeout(cmd, timeout) {
        None => ValidationOutcome::ok(),
        Some((Some(code), stdout, _)) if code == 1 => {
            if String::from_utf8_lossy(&stdout).contains("Parsing error") {
                ValidationOutcome::error("syntax error in merged code")
            } else {
                ValidationOutcome::ok()
            }
        }
        Some(_) => ValidationOutcome::ok(),
    }
}

fn validate_python(content: &[u8], timeout: Duration) -> ValidationOutcome {
    let Some(scratch) = write_scratch(".py", content) else {
        return ValidationOutcome::ok();
    };
    let tmp_path = scratch.path();
    let snippet = format!(
        "compile(open({:?}).read(), {:?}, 'exec')",
        tmp_path, tmp_path
    );
    let mut cmd = Command::new("python3");
    cmd.arg("-c").arg(&snippet);
    match run_with_timeout(cmd, timeout) {
        None => ValidationOutcome::ok(),
        Some((Some(0), _, _)) => ValidationOutcome::ok(),
        Some((_, _, stderr)) => {
            let stderr = String::from_utf8_lossy(&stderr);
            let last_line = stderr.lines().last().unwrap_or("syntax error").to_owned();
            ValidationOutcome::error(format!("Python syntax error: {last_line}"))
        }
    }
}

fn validate_json(content: &[u8]) -> ValidationOutcome {
    let text = match std::str::from_utf8(content) {
        Ok(t) => t,
        Err(_) => return ValidationOutcome::error("JSON error: invalid UTF-8"),
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(_) => ValidationOutcome::ok(),
        Err(e) => ValidationOutcome::error(format!("JSON error: {e}")),
    }
}

//! Repository configuration (`.auto-claude/config.toml`).
//!
//! Parsed with `serde` + `toml`; a missing file is not an error — every
//! field has a default matching the original tool's hard-coded constants.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Files over this line count on either side are skipped entirely rather
/// than sent to the model.
pub const MAX_FILE_LINES_FOR_AI: usize = 5000;

/// Default scheduler concurrency cap.
pub const MAX_PARALLEL_AI_MERGES: usize = 5;

/// Seconds after which an uncontested lock is considered stale.
pub const MERGE_LOCK_TIMEOUT_SECS: u64 = 300;

/// Character budget for an assembled model prompt before oldest-first
/// truncation kicks in.
pub const PROMPT_CHAR_BUDGET: usize = 12_000;

/// Extensions the VCS Adapter treats as binary, never sent to the model or
/// the syntax validator.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "webp", "bmp", "svg", "pdf", "doc", "docx", "xls", "xlsx",
    "ppt", "pptx", "zip", "tar", "gz", "rar", "7z", "exe", "dll", "so", "dylib", "bin", "mp3",
    "mp4", "wav", "avi", "mov", "mkv", "woff", "woff2", "ttf", "otf", "eot", "pyc", "pyo", "class",
    "o", "obj",
];

/// `true` if `path`'s extension marks it as binary (case-insensitive).
#[must_use]
pub fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext)))
}

/// Top-level configuration.
///
/// Missing fields use sensible defaults; a missing file is equivalent to an
/// empty one.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Merge engine settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Merge engine behaviour settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Name of the mainline branch merges integrate into.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Maximum number of files merged concurrently (gates only the model
    /// call; file-level work itself is unbounded).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds after which a held merge lock is considered stale.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// When the heuristic fallback can't tell sides apart from diff
    /// emptiness (the base text is unavailable), prefer the task's own
    /// change over the mainline's.
    #[serde(default = "default_prefer_task")]
    pub prefer_task_on_heuristic: bool,

    /// Character budget for a single model prompt.
    #[serde(default = "default_prompt_budget")]
    pub prompt_char_budget: usize,

    /// Skip files with more than this many lines on either side.
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines_for_ai: usize,

    /// Seconds to bound a single syntax-validator subprocess call.
    #[serde(default = "default_validator_timeout")]
    pub validator_timeout_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            concurrency: default_concurrency(),
            lock_timeout_secs: default_lock_timeout(),
            prefer_task_on_heuristic: default_prefer_task(),
            prompt_char_budget: default_prompt_budget(),
            max_file_lines_for_ai: default_max_file_lines(),
            validator_timeout_secs: default_validator_timeout(),
        }
    }
}

fn default_base_branch() -> String {
    "main".to_owned()
}

const fn default_concurrency() -> usize {
    MAX_PARALLEL_AI_MERGES
}

const fn default_lock_timeout() -> u64 {
    MERGE_LOCK_TIMEOUT_SECS
}

const fn default_prefer_task() -> bool {
    true
}

const fn default_prompt_budget() -> usize {
    PROMPT_CHAR_BUDGET
}

const fn default_max_file_lines() -> usize {
    MAX_FILE_LINES_FOR_AI
}

const fn default_validator_timeout() -> u64 {
    30
}

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if any.
    pub path: Option<PathBuf>,
    /// Human-readable message, with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file returns all defaults, not an error.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] on I/O errors other than not-found, or on
    /// invalid/unknown TOML fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

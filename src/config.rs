//! Capture configuration sourced from the environment.

use std::env;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub const DEFAULT_SHELL: &str = "sh";
pub const DEFAULT_SHELL_FLAG: &str = "-c";
pub const DEFAULT_MAX_LINES: usize = 200_000;
pub const DEFAULT_STDERR_PREFIX: &str = "[stderr] ";

pub const SHELL_ENV_VAR: &str = "SHELL_CAPTURE_SHELL";
pub const MAX_LINES_ENV_VAR: &str = "SHELL_CAPTURE_MAX_LINES";
pub const STDERR_PREFIX_ENV_VAR: &str = "SHELL_CAPTURE_STDERR_PREFIX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Interpreter that receives the command string verbatim.
    pub shell: String,
    pub shell_flag: String,
    pub working_dir: Option<PathBuf>,
    /// Per-handle line cap; lines past the cap are counted, not stored. `None` disables it.
    pub max_lines: Option<usize>,
    pub stderr_prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            shell_flag: DEFAULT_SHELL_FLAG.to_string(),
            working_dir: None,
            max_lines: Some(DEFAULT_MAX_LINES),
            stderr_prefix: DEFAULT_STDERR_PREFIX.to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            shell: env_string_opt(SHELL_ENV_VAR).unwrap_or(defaults.shell),
            shell_flag: defaults.shell_flag,
            working_dir: None,
            max_lines: parse_max_lines(env_string_opt(MAX_LINES_ENV_VAR)),
            stderr_prefix: env_prefix_opt(STDERR_PREFIX_ENV_VAR).unwrap_or(defaults.stderr_prefix),
        }
    }

    #[must_use]
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    #[must_use]
    pub fn with_max_lines(mut self, max_lines: Option<usize>) -> Self {
        self.max_lines = max_lines;
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>, shell_flag: impl Into<String>) -> Self {
        self.shell = shell.into();
        self.shell_flag = shell_flag.into();
        self
    }

    /// Sets the stderr tag. A blank prefix keeps the default, since stderr lines
    /// must stay distinguishable from stdout lines.
    #[must_use]
    pub fn with_stderr_prefix(mut self, stderr_prefix: impl Into<String>) -> Self {
        let stderr_prefix = stderr_prefix.into();
        if !stderr_prefix.trim().is_empty() {
            self.stderr_prefix = stderr_prefix;
        }
        self
    }

    /// Prefix actually applied to stderr lines; never blank.
    #[must_use]
    pub fn effective_stderr_prefix(&self) -> &str {
        if self.stderr_prefix.trim().is_empty() {
            DEFAULT_STDERR_PREFIX
        } else {
            &self.stderr_prefix
        }
    }

    pub(crate) fn command_for(&self, command: &str) -> Command {
        let mut builder = Command::new(&self.shell);
        builder
            .arg(&self.shell_flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(working_dir) = &self.working_dir {
            builder.current_dir(working_dir);
        }

        builder
    }
}

fn parse_max_lines(raw: Option<String>) -> Option<usize> {
    let Some(raw) = raw else {
        return Some(DEFAULT_MAX_LINES);
    };

    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("unlimited") {
        return None;
    }

    match trimmed.parse::<usize>() {
        Ok(0) => None,
        Ok(max_lines) => Some(max_lines),
        Err(_) => Some(DEFAULT_MAX_LINES),
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Like `env_string_opt`, but keeps surrounding whitespace so a prefix can end in a space.
fn env_prefix_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

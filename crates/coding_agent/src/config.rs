//! Environment-driven agent configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use shell_capture::CaptureConfig;
use tracing::warn;

use crate::runtime::{ConversationConfig, DEFAULT_MAX_ROUNDS};
use crate::tools::{DEFAULT_INITIAL_WAIT, DEFAULT_TAIL_LINES};

pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "CODING_AGENT_SYSTEM_INSTRUCTIONS";
pub const MAX_ROUNDS_ENV_VAR: &str = "CODING_AGENT_MAX_ROUNDS";
pub const INITIAL_WAIT_MS_ENV_VAR: &str = "CODING_AGENT_INITIAL_WAIT_MS";
pub const TAIL_LINES_ENV_VAR: &str = "CODING_AGENT_TAIL_LINES";
pub const TRANSCRIPT_ENV_VAR: &str = "CODING_AGENT_TRANSCRIPT";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str =
    "You are a careful coding agent. Run shell commands with run_command. Commands return a \
     handle; when output is long or the command is still running, query it with tail_output, \
     search_output, read_output or output_stats instead of running it again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub system_instructions: String,
    pub max_rounds: usize,
    pub initial_wait: Duration,
    pub tail_lines: usize,
    /// Dump the final message list as JSON lines on stdout.
    pub transcript: bool,
    pub capture: CaptureConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            initial_wait: DEFAULT_INITIAL_WAIT,
            tail_lines: DEFAULT_TAIL_LINES,
            transcript: false,
            capture: CaptureConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            system_instructions: system_instructions_from_env(),
            max_rounds: env_parse::<usize>(MAX_ROUNDS_ENV_VAR)
                .filter(|rounds| *rounds > 0)
                .unwrap_or(defaults.max_rounds),
            initial_wait: env_parse::<u64>(INITIAL_WAIT_MS_ENV_VAR)
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_wait),
            tail_lines: env_parse::<usize>(TAIL_LINES_ENV_VAR)
                .filter(|lines| *lines > 0)
                .unwrap_or(defaults.tail_lines),
            transcript: env_string_opt(TRANSCRIPT_ENV_VAR).is_some_and(|value| is_truthy(&value)),
            capture: CaptureConfig::from_env(),
        }
    }

    #[must_use]
    pub fn conversation(&self) -> ConversationConfig {
        ConversationConfig {
            max_rounds: self.max_rounds,
            instructions: Some(self.system_instructions.clone()),
        }
    }
}

pub fn system_instructions_from_env() -> String {
    sanitize_system_instructions(env::var(SYSTEM_INSTRUCTIONS_ENV_VAR).ok())
}

fn sanitize_system_instructions(raw: Option<String>) -> String {
    let Some(value) = raw else {
        return DEFAULT_SYSTEM_INSTRUCTIONS.to_string();
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        DEFAULT_SYSTEM_INSTRUCTIONS.to_string()
    } else {
        trimmed.to_string()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string_opt(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
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

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use pretty_assertions::assert_eq;

    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = env::var(key).ok();
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }

            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn clear_all() -> Vec<EnvVarGuard> {
        [
            SYSTEM_INSTRUCTIONS_ENV_VAR,
            MAX_ROUNDS_ENV_VAR,
            INITIAL_WAIT_MS_ENV_VAR,
            TAIL_LINES_ENV_VAR,
            TRANSCRIPT_ENV_VAR,
        ]
        .into_iter()
        .map(|key| EnvVarGuard::set(key, None))
        .collect()
    }

    #[test]
    fn unset_environment_yields_defaults() {
        let _lock = lock_unpoisoned(env_lock());
        let _guards = clear_all();

        let config = AgentConfig::from_env();

        assert_eq!(config.system_instructions, DEFAULT_SYSTEM_INSTRUCTIONS);
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(config.initial_wait, DEFAULT_INITIAL_WAIT);
        assert_eq!(config.tail_lines, DEFAULT_TAIL_LINES);
        assert!(!config.transcript);
    }

    #[test]
    fn environment_overrides_are_trimmed_and_parsed() {
        let _lock = lock_unpoisoned(env_lock());
        let _guards = clear_all();
        let _instructions = EnvVarGuard::set(SYSTEM_INSTRUCTIONS_ENV_VAR, Some("  be brief  "));
        let _rounds = EnvVarGuard::set(MAX_ROUNDS_ENV_VAR, Some(" 4 "));
        let _wait = EnvVarGuard::set(INITIAL_WAIT_MS_ENV_VAR, Some("0"));
        let _tail = EnvVarGuard::set(TAIL_LINES_ENV_VAR, Some("10"));
        let _transcript = EnvVarGuard::set(TRANSCRIPT_ENV_VAR, Some("1"));

        let config = AgentConfig::from_env();

        assert_eq!(config.system_instructions, "be brief");
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.initial_wait, Duration::ZERO);
        assert_eq!(config.tail_lines, 10);
        assert!(config.transcript);
        assert_eq!(
            config.conversation(),
            ConversationConfig {
                max_rounds: 4,
                instructions: Some("be brief".to_string()),
            }
        );
    }

    #[test]
    fn invalid_numbers_and_zero_rounds_fall_back_to_defaults() {
        let _lock = lock_unpoisoned(env_lock());
        let _guards = clear_all();
        let _rounds = EnvVarGuard::set(MAX_ROUNDS_ENV_VAR, Some("0"));
        let _wait = EnvVarGuard::set(INITIAL_WAIT_MS_ENV_VAR, Some("soon"));
        let _tail = EnvVarGuard::set(TAIL_LINES_ENV_VAR, Some("-3"));

        let config = AgentConfig::from_env();

        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(config.initial_wait, DEFAULT_INITIAL_WAIT);
        assert_eq!(config.tail_lines, DEFAULT_TAIL_LINES);
    }

    #[test]
    fn blank_instructions_fall_back_to_default() {
        assert_eq!(
            sanitize_system_instructions(Some("   ".to_string())),
            DEFAULT_SYSTEM_INSTRUCTIONS
        );
        assert_eq!(sanitize_system_instructions(None), DEFAULT_SYSTEM_INSTRUCTIONS);
    }
}

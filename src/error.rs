use std::io;

use thiserror::Error;

use crate::registry::HandleId;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("handle {id} not found")]
    HandleNotFound { id: HandleId },

    #[error("handle id {id} is reserved and cannot be registered")]
    InvalidHandle { id: HandleId },

    #[error("handle {id} is already registered")]
    DuplicateHandle { id: HandleId },

    #[error("failed to spawn command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("line {start} is outside the captured output ({line_count} lines)")]
    RangeStart { start: usize, line_count: usize },

    #[error("line range end {end} is before start {start}")]
    RangeOrder { start: usize, end: usize },

    #[error("search pattern must not be empty")]
    EmptyPattern,
}

impl CaptureError {
    #[must_use]
    pub fn spawn(command: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Returns true for lookups against an unknown or already released handle.
    #[must_use]
    pub fn is_handle_not_found(&self) -> bool {
        matches!(self, Self::HandleNotFound { .. })
    }

    /// Returns true for line-range violations reported by range reads.
    #[must_use]
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::RangeStart { .. } | Self::RangeOrder { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers_match_variants() {
        assert!(CaptureError::HandleNotFound { id: 4 }.is_handle_not_found());
        assert!(!CaptureError::EmptyPattern.is_handle_not_found());
        assert!(CaptureError::RangeStart {
            start: 0,
            line_count: 3
        }
        .is_range_error());
        assert!(CaptureError::RangeOrder { start: 5, end: 2 }.is_range_error());
        assert!(!CaptureError::InvalidHandle { id: 0 }.is_handle_not_found());
    }

    #[test]
    fn spawn_error_names_command_and_cause() {
        let error = CaptureError::spawn(
            "missing-binary --flag",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );

        let message = error.to_string();
        assert!(message.contains("missing-binary --flag"), "{message}");
        assert!(message.contains("no such file"), "{message}");
    }
}

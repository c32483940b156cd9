use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::registry::HandleId;

/// Exit code recorded when the process could not be waited on.
pub const EXIT_CODE_WAIT_FAILED: i32 = -1;

/// Origin of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Result of offering one line to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored,
    Dropped,
}

#[derive(Debug)]
pub(crate) struct BufferState {
    pub(crate) lines: Vec<String>,
    pub(crate) dropped_lines: u64,
    pub(crate) complete: bool,
    pub(crate) exit_code: Option<i32>,
    pub(crate) ended: Option<Instant>,
    pub(crate) ended_at: Option<OffsetDateTime>,
}

/// Aggregate view of one handle at the time of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub id: HandleId,
    pub command: String,
    pub line_count: usize,
    pub dropped_lines: u64,
    pub duration: Duration,
    pub complete: bool,
    pub exit_code: Option<i32>,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
}

impl CaptureStats {
    #[must_use]
    pub fn started_at_rfc3339(&self) -> String {
        format_timestamp(self.started_at)
    }

    #[must_use]
    pub fn ended_at_rfc3339(&self) -> Option<String> {
        self.ended_at.map(format_timestamp)
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Captured state of one command: append-only lines plus terminal fields.
///
/// Lines and terminal fields share one read/write lock, so a reader never sees a
/// half-appended line or `complete` without its exit code.
#[derive(Debug)]
pub struct CaptureBuffer {
    id: HandleId,
    command: String,
    started: Instant,
    started_at: OffsetDateTime,
    max_lines: Option<usize>,
    state: RwLock<BufferState>,
    done: Mutex<bool>,
    done_signal: Condvar,
}

impl CaptureBuffer {
    #[must_use]
    pub fn new(id: HandleId, command: impl Into<String>, max_lines: Option<usize>) -> Self {
        Self {
            id,
            command: command.into(),
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            max_lines,
            state: RwLock::new(BufferState {
                lines: Vec::new(),
                dropped_lines: 0,
                complete: false,
                exit_code: None,
                ended: None,
                ended_at: None,
            }),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Appends one line unless the line cap is reached; capped lines are only counted.
    pub fn append_line(&self, line: String) -> AppendOutcome {
        let mut state = self.write_state();
        if self
            .max_lines
            .is_some_and(|max_lines| state.lines.len() >= max_lines)
        {
            state.dropped_lines += 1;
            return AppendOutcome::Dropped;
        }

        state.lines.push(line);
        AppendOutcome::Stored
    }

    /// Marks the buffer complete. Only the first call has any effect.
    pub fn finish(&self, exit_code: i32) {
        {
            let mut state = self.write_state();
            if state.complete {
                return;
            }

            state.complete = true;
            state.exit_code = Some(exit_code);
            state.ended = Some(Instant::now());
            state.ended_at = Some(OffsetDateTime::now_utc());
        }

        let mut done = lock_unpoisoned(&self.done);
        *done = true;
        self.done_signal.notify_all();
    }

    /// Blocks for at most `timeout`; returns whether the buffer is complete.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let done = lock_unpoisoned(&self.done);
        let (done, _) = match self
            .done_signal
            .wait_timeout_while(done, timeout, |done| !*done)
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };

        *done
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.read_state().complete
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.read_state().lines.len()
    }

    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        let state = self.read_state();
        let duration = match state.ended {
            Some(ended) => ended.saturating_duration_since(self.started),
            None => self.started.elapsed(),
        };

        CaptureStats {
            id: self.id,
            command: self.command.clone(),
            line_count: state.lines.len(),
            dropped_lines: state.dropped_lines,
            duration,
            complete: state.complete,
            exit_code: state.exit_code,
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, BufferState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BufferState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn new_buffer_is_running_and_empty() {
        let buffer = CaptureBuffer::new(1, "sleep 1", None);
        let stats = buffer.stats();

        assert_eq!(stats.line_count, 0);
        assert!(!stats.complete);
        assert_eq!(stats.exit_code, None);
        assert_eq!(stats.ended_at, None);
    }

    #[test]
    fn finish_sets_terminal_fields_once() {
        let buffer = CaptureBuffer::new(1, "exit 3", None);

        buffer.finish(3);
        buffer.finish(9);

        let stats = buffer.stats();
        assert!(stats.complete);
        assert_eq!(stats.exit_code, Some(3));
        assert!(stats.ended_at.is_some());
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let buffer = CaptureBuffer::new(1, "true", None);
        assert_eq!(buffer.stats().ended_at_rfc3339(), None);

        buffer.finish(0);
        let stats = buffer.stats();

        let started = stats.started_at_rfc3339();
        assert!(started.contains('T') && started.ends_with('Z'), "{started}");
        assert!(stats.ended_at_rfc3339().is_some());
    }

    #[test]
    fn duration_freezes_after_completion() {
        let buffer = CaptureBuffer::new(1, "true", None);
        buffer.finish(0);

        let first = buffer.stats().duration;
        thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.stats().duration, first);
    }

    #[test]
    fn line_cap_keeps_head_and_counts_dropped_lines() {
        let buffer = CaptureBuffer::new(1, "yes", Some(2));

        assert_eq!(buffer.append_line("a".to_string()), AppendOutcome::Stored);
        assert_eq!(buffer.append_line("b".to_string()), AppendOutcome::Stored);
        assert_eq!(buffer.append_line("c".to_string()), AppendOutcome::Dropped);
        assert_eq!(buffer.append_line("d".to_string()), AppendOutcome::Dropped);

        let state = buffer.read_state();
        assert_eq!(state.lines, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(state.dropped_lines, 2);
    }

    #[test]
    fn wait_for_completion_times_out_then_observes_finish() {
        let buffer = Arc::new(CaptureBuffer::new(1, "sleep", None));
        assert!(!buffer.wait_for_completion(Duration::from_millis(10)));

        let finisher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.finish(0);
            })
        };

        assert!(buffer.wait_for_completion(Duration::from_secs(5)));
        finisher.join().expect("finisher should not panic");
    }
}

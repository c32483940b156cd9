use std::sync::Arc;

use crate::buffer::CaptureStats;
use crate::error::CaptureError;
use crate::registry::{HandleId, HandleRegistry};

/// Lines shown on each side of a search hit.
pub const SEARCH_CONTEXT_LINES: usize = 2;

/// One search hit. Line numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub line_number: usize,
    pub line: String,
    /// Line number of the first entry in `context`.
    pub context_start: usize,
    /// The hit plus up to [`SEARCH_CONTEXT_LINES`] neighbours on each side.
    pub context: Vec<String>,
}

/// A contiguous slice of captured lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub lines: Vec<String>,
    /// Lines captured when the range was read, from the same locked snapshot.
    pub total_lines: usize,
}

impl LineRange {
    /// Line number of the last line, or `start - 1` for an empty range.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.lines.len() - 1
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn numbered(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(move |(offset, line)| (self.start + offset, line.as_str()))
    }
}

/// Read-only point queries over captured output.
///
/// Every query reads whatever has been captured so far and never waits for the
/// command to finish.
#[derive(Debug, Clone)]
pub struct QueryService {
    registry: Arc<HandleRegistry>,
}

impl QueryService {
    #[must_use]
    pub fn new(registry: Arc<HandleRegistry>) -> Self {
        Self { registry }
    }

    /// Substring search over all captured lines.
    pub fn search(&self, id: HandleId, pattern: &str) -> Result<Vec<SearchMatch>, CaptureError> {
        if pattern.is_empty() {
            return Err(CaptureError::EmptyPattern);
        }

        let buffer = self.registry.lookup(id)?;
        let state = buffer.read_state();
        let lines = &state.lines;

        let matches = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.contains(pattern))
            .map(|(index, line)| {
                let from = index.saturating_sub(SEARCH_CONTEXT_LINES);
                let to = (index + SEARCH_CONTEXT_LINES + 1).min(lines.len());
                SearchMatch {
                    line_number: index + 1,
                    line: line.clone(),
                    context_start: from + 1,
                    context: lines[from..to].to_vec(),
                }
            })
            .collect();

        Ok(matches)
    }

    /// Inclusive 1-indexed range. `end` past the last line is clamped.
    pub fn read_range(
        &self,
        id: HandleId,
        start: usize,
        end: usize,
    ) -> Result<LineRange, CaptureError> {
        let buffer = self.registry.lookup(id)?;
        let state = buffer.read_state();
        let line_count = state.lines.len();

        if start == 0 || start > line_count {
            return Err(CaptureError::RangeStart { start, line_count });
        }

        if end < start {
            return Err(CaptureError::RangeOrder { start, end });
        }

        let end = end.min(line_count);
        Ok(LineRange {
            start,
            lines: state.lines[start - 1..end].to_vec(),
            total_lines: line_count,
        })
    }

    pub fn read_lines(&self, id: HandleId, start: usize, end: usize) -> Result<String, CaptureError> {
        self.read_range(id, start, end).map(|range| range.text())
    }

    /// Last `count` lines, or everything when fewer are captured.
    pub fn tail_range(&self, id: HandleId, count: usize) -> Result<LineRange, CaptureError> {
        let buffer = self.registry.lookup(id)?;
        let state = buffer.read_state();
        let from = state.lines.len().saturating_sub(count);

        Ok(LineRange {
            start: from + 1,
            lines: state.lines[from..].to_vec(),
            total_lines: state.lines.len(),
        })
    }

    pub fn tail(&self, id: HandleId, count: usize) -> Result<String, CaptureError> {
        self.tail_range(id, count).map(|range| range.text())
    }

    pub fn stats(&self, id: HandleId) -> Result<CaptureStats, CaptureError> {
        Ok(self.registry.lookup(id)?.stats())
    }
}

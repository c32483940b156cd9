//! Host tools offered to the model, backed by a [`CaptureEngine`].
//!
//! `run_command` starts a command and answers with a bounded tail snapshot; the
//! remaining tools let the model follow up on a handle instead of re-reading the
//! whole output every round.

use std::fmt::Write as _;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use shell_capture::{CaptureEngine, CaptureError, CaptureStats, HandleId, LineRange, SearchMatch};
use thiserror::Error;
use tracing::debug;

use crate::provider::{ToolCallRequest, ToolDefinition, ToolResult};

pub const RUN_COMMAND_TOOL: &str = "run_command";
pub const SEARCH_OUTPUT_TOOL: &str = "search_output";
pub const READ_OUTPUT_TOOL: &str = "read_output";
pub const TAIL_OUTPUT_TOOL: &str = "tail_output";
pub const OUTPUT_STATS_TOOL: &str = "output_stats";
pub const RELEASE_OUTPUT_TOOL: &str = "release_output";

pub const DEFAULT_TAIL_LINES: usize = 50;
pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_millis(200);
pub const MAX_SEARCH_MATCHES_SHOWN: usize = 50;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{name}`")]
    UnknownTool { name: String },

    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl ToolError {
    fn invalid(tool: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// A tool invocation whose arguments already passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    RunCommand {
        command: String,
    },
    SearchOutput {
        handle: HandleId,
        pattern: String,
    },
    ReadOutput {
        handle: HandleId,
        start: usize,
        end: usize,
    },
    TailOutput {
        handle: HandleId,
        lines: Option<usize>,
    },
    OutputStats {
        handle: HandleId,
    },
    ReleaseOutput {
        handle: HandleId,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunCommandArgs {
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchOutputArgs {
    handle: HandleId,
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadOutputArgs {
    handle: HandleId,
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TailOutputArgs {
    handle: HandleId,
    #[serde(default)]
    lines: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HandleArgs {
    handle: HandleId,
}

impl ToolCall {
    /// Decodes `arguments` for the tool called `name`.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolError> {
        match name {
            RUN_COMMAND_TOOL => {
                let args: RunCommandArgs = decode(name, arguments)?;
                if args.command.trim().is_empty() {
                    return Err(ToolError::invalid(name, "`command` must not be empty"));
                }
                Ok(Self::RunCommand {
                    command: args.command,
                })
            }
            SEARCH_OUTPUT_TOOL => {
                let args: SearchOutputArgs = decode(name, arguments)?;
                Ok(Self::SearchOutput {
                    handle: args.handle,
                    pattern: args.pattern,
                })
            }
            READ_OUTPUT_TOOL => {
                let args: ReadOutputArgs = decode(name, arguments)?;
                Ok(Self::ReadOutput {
                    handle: args.handle,
                    start: args.start,
                    end: args.end,
                })
            }
            TAIL_OUTPUT_TOOL => {
                let args: TailOutputArgs = decode(name, arguments)?;
                Ok(Self::TailOutput {
                    handle: args.handle,
                    lines: args.lines,
                })
            }
            OUTPUT_STATS_TOOL => {
                let args: HandleArgs = decode(name, arguments)?;
                Ok(Self::OutputStats {
                    handle: args.handle,
                })
            }
            RELEASE_OUTPUT_TOOL => {
                let args: HandleArgs = decode(name, arguments)?;
                Ok(Self::ReleaseOutput {
                    handle: args.handle,
                })
            }
            unknown => Err(ToolError::UnknownTool {
                name: unknown.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunCommand { .. } => RUN_COMMAND_TOOL,
            Self::SearchOutput { .. } => SEARCH_OUTPUT_TOOL,
            Self::ReadOutput { .. } => READ_OUTPUT_TOOL,
            Self::TailOutput { .. } => TAIL_OUTPUT_TOOL,
            Self::OutputStats { .. } => OUTPUT_STATS_TOOL,
            Self::ReleaseOutput { .. } => RELEASE_OUTPUT_TOOL,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments.clone())
        .map_err(|error| ToolError::invalid(tool, error.to_string()))
}

pub trait ToolExecutor {
    /// Schemas for every tool `execute` accepts.
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn execute(&mut self, tool_name: &str, arguments: &Value) -> Result<String, ToolError>;
}

/// Runs one model tool invocation and folds any error into an error-flagged result.
pub fn execute_tool_call(
    executor: &mut dyn ToolExecutor,
    request: &ToolCallRequest,
) -> ToolResult {
    match executor.execute(&request.tool_name, &request.arguments) {
        Ok(content) => ToolResult::success(&request.call_id, &request.tool_name, content),
        Err(error) => {
            debug!(tool = %request.tool_name, call_id = %request.call_id, %error, "tool failed");
            ToolResult::error(&request.call_id, &request.tool_name, error.to_string())
        }
    }
}

#[derive(Debug)]
pub struct BuiltinToolExecutor {
    engine: CaptureEngine,
    initial_wait: Duration,
    tail_lines: usize,
}

impl BuiltinToolExecutor {
    #[must_use]
    pub fn new(engine: CaptureEngine) -> Self {
        Self {
            engine,
            initial_wait: DEFAULT_INITIAL_WAIT,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Upper bound on how long `run_command` waits before taking its snapshot.
    #[must_use]
    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    /// Lines included in snapshots and in `tail_output` when no count is given.
    #[must_use]
    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &CaptureEngine {
        &self.engine
    }

    fn execute_call(&self, call: ToolCall) -> Result<String, ToolError> {
        match call {
            ToolCall::RunCommand { command } => self.run_command(&command),
            ToolCall::SearchOutput { handle, pattern } => self.search_output(handle, &pattern),
            ToolCall::ReadOutput { handle, start, end } => {
                let range = self.engine.query().read_range(handle, start, end)?;
                Ok(format_range(handle, &range))
            }
            ToolCall::TailOutput { handle, lines } => {
                let range = self
                    .engine
                    .query()
                    .tail_range(handle, lines.unwrap_or(self.tail_lines))?;
                Ok(format_range(handle, &range))
            }
            ToolCall::OutputStats { handle } => {
                Ok(format_stats(&self.engine.query().stats(handle)?))
            }
            ToolCall::ReleaseOutput { handle } => {
                self.engine.remove(handle)?;
                Ok(format!("handle {handle} released"))
            }
        }
    }

    fn run_command(&self, command: &str) -> Result<String, ToolError> {
        let handle = self.engine.run_with_capture(command)?;
        // Bounded: fast commands report their exit code, slow ones report "running".
        self.engine.wait_for_completion(handle, self.initial_wait)?;

        // Tail first, so the captured count never trails the lines shown.
        let tail = self.engine.query().tail_range(handle, self.tail_lines)?;
        let stats = self.engine.query().stats(handle)?;
        Ok(format_snapshot(&stats, &tail))
    }

    fn search_output(&self, handle: HandleId, pattern: &str) -> Result<String, ToolError> {
        let matches = self.engine.query().search(handle, pattern)?;
        Ok(format_matches(handle, pattern, &matches))
    }
}

impl ToolExecutor for BuiltinToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    fn execute(&mut self, tool_name: &str, arguments: &Value) -> Result<String, ToolError> {
        let call = ToolCall::parse(tool_name, arguments)?;
        debug!(tool = call.name(), "executing tool");
        self.execute_call(call)
    }
}

#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let handle = json!({
        "type": "integer",
        "minimum": 1,
        "description": "Handle id returned by run_command."
    });

    vec![
        ToolDefinition {
            name: RUN_COMMAND_TOOL.to_string(),
            description: Some(
                "Run a shell command. Returns a handle id, the exit status if it already \
                 finished, and the last lines of output. Long-running commands keep running; \
                 follow up with the other output tools."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command line."}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: SEARCH_OUTPUT_TOOL.to_string(),
            description: Some(
                "Find lines containing a substring in a command's output.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "handle": handle,
                    "pattern": {"type": "string", "minLength": 1}
                },
                "required": ["handle", "pattern"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: READ_OUTPUT_TOOL.to_string(),
            description: Some(
                "Read an inclusive 1-indexed line range of a command's output.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "handle": handle,
                    "start": {"type": "integer", "minimum": 1},
                    "end": {"type": "integer", "minimum": 1}
                },
                "required": ["handle", "start", "end"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TAIL_OUTPUT_TOOL.to_string(),
            description: Some("Read the last lines of a command's output.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "handle": handle,
                    "lines": {"type": "integer", "minimum": 0}
                },
                "required": ["handle"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: OUTPUT_STATS_TOOL.to_string(),
            description: Some(
                "Line count, duration and exit status of a command.".to_string(),
            ),
            input_schema: handle_only_schema(&handle),
        },
        ToolDefinition {
            name: RELEASE_OUTPUT_TOOL.to_string(),
            description: Some(
                "Discard a finished command's captured output.".to_string(),
            ),
            input_schema: handle_only_schema(&handle),
        },
    ]
}

fn handle_only_schema(handle: &Value) -> Value {
    json!({
        "type": "object",
        "properties": {"handle": handle},
        "required": ["handle"],
        "additionalProperties": false
    })
}

fn format_status(stats: &CaptureStats) -> String {
    match (stats.complete, stats.exit_code) {
        (true, Some(code)) => format!("exited with code {code}"),
        (true, None) => "exited".to_string(),
        (false, _) => format!(
            "still running; use {TAIL_OUTPUT_TOOL}, {SEARCH_OUTPUT_TOOL} or {OUTPUT_STATS_TOOL} \
             with handle {} to follow up",
            stats.id
        ),
    }
}

fn format_snapshot(stats: &CaptureStats, tail: &LineRange) -> String {
    let mut out = format!(
        "handle: {}\ncommand: {}\nstatus: {}\n",
        stats.id,
        stats.command,
        format_status(stats)
    );
    push_captured_summary(&mut out, stats);

    if tail.lines.is_empty() {
        out.push_str("output: (none yet)");
    } else {
        let _ = writeln!(out, "output (lines {}-{}):", tail.start, tail.end());
        out.push_str(&tail.text());
    }

    out
}

fn push_captured_summary(out: &mut String, stats: &CaptureStats) {
    let _ = write!(out, "captured: {} lines", stats.line_count);
    if stats.dropped_lines > 0 {
        let _ = write!(out, " ({} more dropped at the line cap)", stats.dropped_lines);
    }
    out.push('\n');
}

fn format_range(handle: HandleId, range: &LineRange) -> String {
    let line_count = range.total_lines;
    if range.lines.is_empty() {
        return if line_count == 0 {
            format!("handle {handle}: no output captured yet")
        } else {
            format!("handle {handle}: no lines selected ({line_count} captured)")
        };
    }

    let mut out = format!(
        "handle {handle}, lines {}-{} of {line_count}:\n",
        range.start,
        range.end()
    );
    let numbered: Vec<String> = range
        .numbered()
        .map(|(number, line)| format!("{number:>6}  {line}"))
        .collect();
    out.push_str(&numbered.join("\n"));
    out
}

fn format_matches(handle: HandleId, pattern: &str, matches: &[SearchMatch]) -> String {
    if matches.is_empty() {
        return format!("no lines in handle {handle} contain {pattern:?}");
    }

    let mut out = format!(
        "{} matching lines in handle {handle} for {pattern:?}",
        matches.len()
    );
    if matches.len() > MAX_SEARCH_MATCHES_SHOWN {
        let _ = write!(out, " (showing the first {MAX_SEARCH_MATCHES_SHOWN})");
    }

    for found in matches.iter().take(MAX_SEARCH_MATCHES_SHOWN) {
        let _ = write!(out, "\n--- line {} ---", found.line_number);
        for (offset, line) in found.context.iter().enumerate() {
            let number = found.context_start + offset;
            let marker = if number == found.line_number { '>' } else { ' ' };
            let _ = write!(out, "\n{marker}{number:>6}  {line}");
        }
    }

    out
}

fn format_stats(stats: &CaptureStats) -> String {
    let mut out = format!(
        "handle: {}\ncommand: {}\nstatus: {}\n",
        stats.id,
        stats.command,
        format_status(stats)
    );
    push_captured_summary(&mut out, stats);
    let _ = write!(
        out,
        "duration: {:.3}s\nstarted_at: {}",
        stats.duration.as_secs_f64(),
        stats.started_at_rfc3339()
    );
    if let Some(ended_at) = stats.ended_at_rfc3339() {
        let _ = write!(out, "\nended_at: {ended_at}");
    }
    out
}

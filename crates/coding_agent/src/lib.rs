//! Headless coding agent: a tool-calling conversation loop over captured shell commands.
//!
//! ## Provider bootstrap
//!
//! `CODING_AGENT_PROVIDER` selects the model provider. Only `mock` (the default)
//! ships here: it turns the prompt into a `run_command` call and quotes the tool
//! output back, which makes the whole loop runnable offline.
//!
//! ## Configuration
//!
//! - `CODING_AGENT_SYSTEM_INSTRUCTIONS` overrides the built-in instructions.
//! - `CODING_AGENT_MAX_ROUNDS` caps model calls per run (default 25).
//! - `CODING_AGENT_INITIAL_WAIT_MS` bounds the wait before a `run_command` snapshot.
//! - `CODING_AGENT_TAIL_LINES` sets the snapshot and default tail size.
//! - `CODING_AGENT_TRANSCRIPT=1` prints the final history as JSON lines.
//! - `SHELL_CAPTURE_*` variables configure command capture (see `shell_capture::config`).
//!
//! Conversation memory contract: [`runtime::Conversation`] owns the model-facing
//! history and replays it on every round through provider-neutral `RunMessage` items.

pub mod config;
pub mod logging;
pub mod provider;
pub mod providers;
pub mod runtime;
pub mod signals;
pub mod tools;
pub mod transcript;

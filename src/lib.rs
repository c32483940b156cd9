//! Handle-based command output capture.
//!
//! A command submitted to [`CaptureEngine::run_with_capture`] gets a numeric
//! [`HandleId`] right away. Its stdout and stderr are streamed line by line into an
//! append-only buffer, which [`QueryService`] can search, slice, tail and summarize
//! while the process is still running.
//!
//! Invariant: handle ids are never reused and never equal [`INVALID_HANDLE_ID`].
//! A handle only goes away through an explicit [`CaptureEngine::remove`].
//!
//! No sandboxing happens here. Commands go verbatim to the configured shell.

pub mod config;

mod buffer;
mod engine;
mod error;
mod query;
mod registry;

pub use crate::buffer::{
    AppendOutcome, CaptureBuffer, CaptureStats, OutputStream, EXIT_CODE_WAIT_FAILED,
};
pub use crate::config::CaptureConfig;
pub use crate::engine::{CaptureEngine, HandleSummary};
pub use crate::error::CaptureError;
pub use crate::query::{LineRange, QueryService, SearchMatch, SEARCH_CONTEXT_LINES};
pub use crate::registry::{HandleId, HandleRegistry, INVALID_HANDLE_ID};

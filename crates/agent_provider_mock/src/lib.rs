//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. It runs in one of two
//! modes: a fixed script of replies, or a passthrough that turns the user's
//! text into a `run_command` call and then quotes the tool output back.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    CancelSignal, ContentBlock, ModelReply, ProviderError, ProviderProfile, RunProvider,
    RunRequest,
};
use serde_json::json;
use uuid::Uuid;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// Tool the passthrough mode asks the host to run.
pub const PASSTHROUGH_TOOL_NAME: &str = "run_command";

#[derive(Debug)]
enum Mode {
    Passthrough,
    Scripted(Mutex<VecDeque<ModelReply>>),
}

/// Deterministic mock provider used by `coding_agent` tests and local runs.
#[derive(Debug)]
pub struct MockProvider {
    model_id: String,
    mode: Mode,
    requests: Mutex<Vec<RunRequest>>,
}

impl MockProvider {
    /// Creates a passthrough mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(Mode::Passthrough)
    }

    /// Creates a mock provider that answers with `replies` in order.
    ///
    /// A call made after the script runs out fails with a [`ProviderError`].
    #[must_use]
    pub fn scripted(replies: Vec<ModelReply>) -> Self {
        Self::with_mode(Mode::Scripted(Mutex::new(replies.into())))
    }

    /// Overrides the reported model id. Blank values fall back to `mock`.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = sanitize_model_id(model_id.into());
        self
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RunRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Number of scripted replies not yet consumed. Always zero in passthrough mode.
    #[must_use]
    pub fn remaining_replies(&self) -> usize {
        match &self.mode {
            Mode::Passthrough => 0,
            Mode::Scripted(replies) => lock_unpoisoned(replies).len(),
        }
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            model_id: MOCK_PROVIDER_ID.to_string(),
            mode,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn passthrough_reply(req: &RunRequest) -> ModelReply {
        let Some(last) = req.messages.last() else {
            return ModelReply::text_only("Nothing to run.");
        };

        let results: Vec<_> = last.tool_results_iter().collect();
        if !results.is_empty() {
            let mut text = String::from("Tool output:");
            for result in results {
                text.push('\n');
                if result.is_error {
                    text.push_str("[error] ");
                }
                text.push_str(&result.content);
            }
            return ModelReply::text_only(text);
        }

        let command = last.text();
        let command = command.trim();
        if command.is_empty() {
            return ModelReply::text_only("Nothing to run.");
        }

        ModelReply::new(vec![ContentBlock::tool_call(
            new_call_id(),
            PASSTHROUGH_TOOL_NAME,
            json!({ "command": command }),
        )])
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RunProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn complete(
        &self,
        req: &RunRequest,
        cancel: &CancelSignal,
    ) -> Result<ModelReply, ProviderError> {
        lock_unpoisoned(&self.requests).push(req.clone());

        if cancel.load(Ordering::SeqCst) {
            return Err(ProviderError::new("run cancelled"));
        }

        match &self.mode {
            Mode::Passthrough => Ok(Self::passthrough_reply(req)),
            Mode::Scripted(replies) => lock_unpoisoned(replies).pop_front().ok_or_else(|| {
                ProviderError::new(format!(
                    "mock script exhausted at round {} of run {}",
                    req.round, req.run_id
                ))
            }),
        }
    }
}

/// Fresh tool call id in the `call_<uuid>` shape.
#[must_use]
pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

fn sanitize_model_id(model_id: String) -> String {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        MOCK_PROVIDER_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

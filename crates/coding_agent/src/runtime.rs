//! Multi-round tool-calling conversation loop.
//!
//! Each round sends the full message list to the provider. A reply without tool
//! calls ends the run; otherwise every call is executed, and the reply plus one
//! user-role message carrying all results are appended before the next round.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::provider::{
    CancelSignal, ModelReply, ProviderError, RunEvent, RunId, RunMessage, RunProvider,
    RunRequest, ToolDefinition, ToolResult,
};
use crate::tools::{execute_tool_call, BuiltinToolExecutor, ToolExecutor};

/// Model calls allowed per run before the loop gives up.
pub const DEFAULT_MAX_ROUNDS: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    pub max_rounds: usize,
    pub instructions: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            instructions: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("model provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("model was still requesting tools after {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: usize },

    #[error("conversation cancelled")]
    Cancelled,
}

/// One conversation: its message history, its provider and its own tool executor.
pub struct Conversation<T: ToolExecutor = BuiltinToolExecutor> {
    provider: Arc<dyn RunProvider>,
    tools: T,
    config: ConversationConfig,
    messages: Vec<RunMessage>,
    next_run_id: RunId,
}

impl<T: ToolExecutor> Conversation<T> {
    #[must_use]
    pub fn with_tools(provider: Arc<dyn RunProvider>, tools: T, config: ConversationConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            messages: Vec::new(),
            next_run_id: 1,
        }
    }

    /// History so far, including messages from earlier runs.
    #[must_use]
    pub fn messages(&self) -> &[RunMessage] {
        &self.messages
    }

    #[must_use]
    pub fn tools(&self) -> &T {
        &self.tools
    }

    #[must_use]
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Appends `prompt` as a user message and drives rounds until the model stops
    /// calling tools. Returns the final reply's text.
    ///
    /// `emit` receives `Started`, then progress events, then exactly one terminal event.
    pub fn run(
        &mut self,
        prompt: &str,
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<String, ConversationError> {
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        self.messages.push(RunMessage::user_text(prompt));
        emit(RunEvent::Started { run_id });

        let outcome = self.drive(run_id, cancel, emit);
        match &outcome {
            Ok(_) => {
                info!(run_id, "conversation run finished");
                emit(RunEvent::Finished { run_id });
            }
            Err(ConversationError::Cancelled) => {
                info!(run_id, "conversation run cancelled");
                emit(RunEvent::Cancelled { run_id });
            }
            Err(error) => {
                warn!(run_id, %error, "conversation run failed");
                emit(RunEvent::Failed {
                    run_id,
                    error: error.to_string(),
                });
            }
        }

        outcome
    }

    fn drive(
        &mut self,
        run_id: RunId,
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<String, ConversationError> {
        let tools = self.tools.definitions();

        for round in 1..=self.config.max_rounds {
            if is_cancelled(cancel) {
                return Err(ConversationError::Cancelled);
            }

            let reply = self.request_reply(run_id, round, &tools, cancel)?;
            let text = reply.text();
            if !text.is_empty() {
                emit(RunEvent::Chunk {
                    run_id,
                    text: text.clone(),
                });
            }

            if !reply.has_tool_calls() {
                self.messages.push(RunMessage::assistant(reply.content));
                return Ok(text);
            }

            let results = self.execute_tools(run_id, &reply, cancel, emit);
            self.messages.push(RunMessage::assistant(reply.content));
            self.messages.push(RunMessage::tool_results(results));

            if is_cancelled(cancel) {
                return Err(ConversationError::Cancelled);
            }
        }

        Err(ConversationError::RoundLimitExceeded {
            max_rounds: self.config.max_rounds,
        })
    }

    fn request_reply(
        &self,
        run_id: RunId,
        round: usize,
        tools: &[ToolDefinition],
        cancel: &CancelSignal,
    ) -> Result<ModelReply, ConversationError> {
        let request = RunRequest {
            run_id,
            round,
            messages: self.messages.clone(),
            instructions: self.config.instructions.clone(),
            tools: tools.to_vec(),
        };
        debug!(run_id, round, messages = request.messages.len(), "requesting model reply");

        let provider = Arc::clone(&self.provider);
        let outcome = catch_unwind(AssertUnwindSafe(|| provider.complete(&request, cancel)));

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) if is_cancelled(cancel) => Err(ConversationError::Cancelled),
            Ok(Err(error)) => Err(ConversationError::Provider(error)),
            Err(_) => Err(ConversationError::Provider(ProviderError::new(
                "model provider panicked",
            ))),
        }
    }

    /// Runs every call of one reply. Calls left over after a cancel get error
    /// results so each call id still has a matching result in the history.
    fn execute_tools(
        &mut self,
        run_id: RunId,
        reply: &ModelReply,
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Vec<ToolResult> {
        let calls = reply.tool_calls();
        let mut results = Vec::with_capacity(calls.len());

        for call in &calls {
            if is_cancelled(cancel) {
                results.push(ToolResult::error(
                    &call.call_id,
                    &call.tool_name,
                    "not executed: conversation cancelled",
                ));
                continue;
            }

            emit(RunEvent::ToolStarted {
                run_id,
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            });

            let result = execute_tool_call(&mut self.tools, call);
            debug!(
                run_id,
                tool = %call.tool_name,
                call_id = %call.call_id,
                is_error = result.is_error,
                "tool call finished"
            );

            emit(RunEvent::ToolFinished {
                run_id,
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                is_error: result.is_error,
            });
            results.push(result);
        }

        results
    }
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::SeqCst)
}

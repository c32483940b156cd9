//! Provider contract re-exports used by `coding_agent`.

pub use agent_provider::{
    CancelSignal, ContentBlock, ModelReply, ProviderError, ProviderInitError, ProviderProfile,
    Role, RunEvent, RunId, RunMessage, RunProvider, RunRequest, ToolCallRequest, ToolDefinition,
    ToolResult,
};

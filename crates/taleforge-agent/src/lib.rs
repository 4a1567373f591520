pub mod anthropic;
pub mod anthropic_stream;
pub mod dice;
pub mod orchestrator;
pub mod provider;
pub mod stream;
pub mod tools;

pub use anthropic::AnthropicProvider;
pub use orchestrator::{Orchestrator, RollCoordinator, TurnEvent, MAX_TOOL_ROUNDS};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role, ToolCall, ToolDefinition};
pub use stream::StreamEvent;

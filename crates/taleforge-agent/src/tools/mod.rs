//! Tool system for the DM agent loop.
//!
//! Defines the `Tool` trait every tool implements, plus a catalog helper for
//! building the Claude API tool definitions.

pub mod player_state;
pub mod roll_dice;
pub mod search_world;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait every tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Whether a tool mutates player state that the gateway should re-broadcast
/// as a `state` message after the tool round completes.
pub fn mutates_player_state(tool_name: &str) -> bool {
    matches!(
        tool_name,
        "update_player_hp" | "update_player_xp" | "update_player_inventory" | "update_player_gold"
    )
}

pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

//! The `roll_dice` tool definition.
//!
//! Unlike the other tools, the orchestrator never calls `execute` on this one
//! directly during a normal turn — a `roll_dice` call suspends the turn with
//! a `roll_request` message and waits for the player's execute/ack round
//! trip. `execute` exists so the tool still satisfies the `Tool` trait (for
//! catalog listing and offline testing) and performs the roll itself.

use async_trait::async_trait;

use super::{Tool, ToolResult};
use crate::dice;

pub struct RollDice;

#[async_trait]
impl Tool for RollDice {
    fn name(&self) -> &str {
        "roll_dice"
    }

    fn description(&self) -> &str {
        "Roll dice using standard notation (e.g. 1d20+5, 2d6, 4d6kh3)"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "notation": {"type": "string", "description": "Dice notation"},
                "reason": {"type": "string", "description": "What the roll is for"},
            },
            "required": ["notation"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(notation) = input.get("notation").and_then(|v| v.as_str()) else {
            return ToolResult::error("roll_dice: missing 'notation'");
        };
        let mut rng = rand::thread_rng();
        match dice::roll(notation, &mut rng) {
            Ok(outcome) => {
                ToolResult::success(serde_json::to_string(&outcome).unwrap_or_default())
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

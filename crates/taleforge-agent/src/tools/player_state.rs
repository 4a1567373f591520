//! Player-state-mutating tools: HP, XP, inventory, and gold.
//!
//! All four share a single `Arc<Mutex<CharacterState>>` handle so the
//! orchestrator can read the post-mutation snapshot back out after a tool
//! round to emit a `state` message.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use taleforge_campaign::CharacterState;
use tokio::sync::Mutex;
use tracing::warn;

use super::{Tool, ToolResult};

/// Shared, persisted player character state.
#[derive(Clone)]
pub struct PlayerState {
    inner: Arc<Mutex<CharacterState>>,
    character_path: PathBuf,
}

impl PlayerState {
    pub fn new(character: CharacterState, character_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(character)),
            character_path,
        }
    }

    pub async fn snapshot(&self) -> CharacterState {
        self.inner.lock().await.clone()
    }

    /// Build a tool result carrying the post-mutation character snapshot as
    /// JSON, so the orchestrator can parse it back out to emit a `state` event.
    fn result_for(character: &CharacterState) -> ToolResult {
        ToolResult::success(serde_json::to_string(character).unwrap_or_default())
    }

    async fn persist(&self, character: &CharacterState) {
        let tmp = self.character_path.with_extension("json.tmp");
        let Ok(body) = serde_json::to_string_pretty(character) else {
            return;
        };
        if let Err(e) = tokio::fs::write(&tmp, body).await {
            warn!(error = %e, "failed to write character state tmp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.character_path).await {
            warn!(error = %e, "failed to persist character state");
        }
    }
}

pub struct UpdatePlayerHp(pub PlayerState);

#[async_trait]
impl Tool for UpdatePlayerHp {
    fn name(&self) -> &str {
        "update_player_hp"
    }

    fn description(&self) -> &str {
        "Modify player HP (positive to heal, negative for damage). Clamped to [0, max]."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "amount": {"type": "integer", "description": "HP delta; negative for damage"},
                "reason": {"type": "string"},
            },
            "required": ["amount"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(amount) = input.get("amount").and_then(|v| v.as_i64()) else {
            return ToolResult::error("update_player_hp: missing integer 'amount'");
        };
        let mut character = self.0.inner.lock().await;
        character.hp.current = (character.hp.current + amount).clamp(0, character.hp.max);
        let snapshot = character.clone();
        drop(character);
        self.0.persist(&snapshot).await;
        PlayerState::result_for(&snapshot)
    }
}

pub struct UpdatePlayerXp(pub PlayerState);

#[async_trait]
impl Tool for UpdatePlayerXp {
    fn name(&self) -> &str {
        "update_player_xp"
    }

    fn description(&self) -> &str {
        "Award experience points to the player."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "amount": {"type": "integer", "description": "XP to add; must be non-negative"},
                "reason": {"type": "string"},
            },
            "required": ["amount"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(amount) = input.get("amount").and_then(|v| v.as_i64()) else {
            return ToolResult::error("update_player_xp: missing integer 'amount'");
        };
        let mut character = self.0.inner.lock().await;
        character.xp += amount.max(0);
        let snapshot = character.clone();
        drop(character);
        self.0.persist(&snapshot).await;
        PlayerState::result_for(&snapshot)
    }
}

pub struct UpdatePlayerInventory(pub PlayerState);

#[async_trait]
impl Tool for UpdatePlayerInventory {
    fn name(&self) -> &str {
        "update_player_inventory"
    }

    fn description(&self) -> &str {
        "Add or remove an item from the player's inventory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "item": {"type": "string"},
                "action": {"type": "string", "enum": ["add", "remove"]},
            },
            "required": ["item", "action"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(item) = input.get("item").and_then(|v| v.as_str()) else {
            return ToolResult::error("update_player_inventory: missing 'item'");
        };
        let action = input.get("action").and_then(|v| v.as_str()).unwrap_or("add");

        let mut character = self.0.inner.lock().await;
        match action {
            "remove" => {
                if let Some(pos) = character.inventory.iter().position(|i| i == item) {
                    character.inventory.remove(pos);
                }
            }
            _ => character.inventory.push(item.to_string()),
        }
        let snapshot = character.clone();
        drop(character);
        self.0.persist(&snapshot).await;
        PlayerState::result_for(&snapshot)
    }
}

pub struct UpdatePlayerGold(pub PlayerState);

#[async_trait]
impl Tool for UpdatePlayerGold {
    fn name(&self) -> &str {
        "update_player_gold"
    }

    fn description(&self) -> &str {
        "Modify the player's gold (positive to add, negative to spend)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "amount": {"type": "integer"},
                "reason": {"type": "string"},
            },
            "required": ["amount"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(amount) = input.get("amount").and_then(|v| v.as_i64()) else {
            return ToolResult::error("update_player_gold: missing integer 'amount'");
        };
        let mut character = self.0.inner.lock().await;
        character.gold = (character.gold + amount).max(0);
        let snapshot = character.clone();
        drop(character);
        self.0.persist(&snapshot).await;
        PlayerState::result_for(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taleforge_campaign::HitPoints;

    fn state() -> PlayerState {
        PlayerState::new(
            CharacterState {
                name: "Elowen".to_string(),
                level: 3,
                race: "Elf".to_string(),
                class: "Ranger".to_string(),
                hp: HitPoints { current: 10, max: 20 },
                xp: 0,
                gold: 5,
                inventory: vec!["rope".to_string()],
            },
            std::env::temp_dir().join("taleforge-player-state-test.json"),
        )
    }

    #[tokio::test]
    async fn hp_clamps_to_max() {
        let tool = UpdatePlayerHp(state());
        tool.execute(serde_json::json!({"amount": 50})).await;
        assert_eq!(tool.0.snapshot().await.hp.current, 20);
    }

    #[tokio::test]
    async fn hp_clamps_to_zero() {
        let tool = UpdatePlayerHp(state());
        tool.execute(serde_json::json!({"amount": -100})).await;
        assert_eq!(tool.0.snapshot().await.hp.current, 0);
    }

    #[tokio::test]
    async fn inventory_add_and_remove() {
        let tool = UpdatePlayerInventory(state());
        tool.execute(serde_json::json!({"item": "torch", "action": "add"}))
            .await;
        assert!(tool.0.snapshot().await.inventory.contains(&"torch".to_string()));
        tool.execute(serde_json::json!({"item": "rope", "action": "remove"}))
            .await;
        assert!(!tool.0.snapshot().await.inventory.contains(&"rope".to_string()));
    }

    #[tokio::test]
    async fn gold_cannot_go_negative() {
        let tool = UpdatePlayerGold(state());
        tool.execute(serde_json::json!({"amount": -100})).await;
        assert_eq!(tool.0.snapshot().await.gold, 0);
    }
}

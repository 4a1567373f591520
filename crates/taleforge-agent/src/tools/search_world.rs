//! The `search_world` tool: a keyword search over the campaign's own
//! context text (overview + recent session log). Finding and indexing a
//! wider source-material library is out of scope; this searches only the
//! narrow campaign snapshot already loaded for the turn.

use async_trait::async_trait;

use super::{Tool, ToolResult};

pub struct SearchWorld {
    corpus: String,
}

impl SearchWorld {
    pub fn new(corpus: String) -> Self {
        Self { corpus }
    }
}

#[async_trait]
impl Tool for SearchWorld {
    fn name(&self) -> &str {
        "search_world"
    }

    fn description(&self) -> &str {
        "Search campaign world state and recent session history"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("search_world: missing 'query'");
        };
        let query_lower = query.to_lowercase();

        let hits: Vec<&str> = self
            .corpus
            .lines()
            .filter(|line| line.to_lowercase().contains(&query_lower))
            .take(10)
            .collect();

        if hits.is_empty() {
            ToolResult::success("No matches found in the campaign record.")
        } else {
            ToolResult::success(hits.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_matching_lines() {
        let tool = SearchWorld::new("The tavern is called the Rusty Anchor.\nA storm looms.".to_string());
        let result = tool
            .execute(serde_json::json!({"query": "tavern"}))
            .await;
        assert!(result.content.contains("Rusty Anchor"));
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn reports_no_matches() {
        let tool = SearchWorld::new("The tavern is called the Rusty Anchor.".to_string());
        let result = tool
            .execute(serde_json::json!({"query": "dragon"}))
            .await;
        assert!(result.content.contains("No matches"));
    }
}

use serde::{Deserialize, Serialize};

/// Which branch of the dice grammar produced a roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollKind {
    Standard,
    Advantage,
    Disadvantage,
}

/// A resolved dice roll, ready to go on the wire as a `roll_result` message.
///
/// `kind` is serialized as `roll_type` — the outer `ServerMessage` envelope
/// already owns the wire-level `type` discriminator (`"roll_result"`), so the
/// server-internal roll classification is renamed to avoid colliding with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollOutcome {
    #[serde(rename = "roll_type")]
    pub kind: RollKind,
    pub notation: String,
    pub rolls: Vec<u32>,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifier: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_20: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_1: Option<bool>,
}

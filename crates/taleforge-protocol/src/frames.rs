use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dice::RollOutcome;

/// The audio channel a generated clip belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioChannel {
    Voice,
    Ambient,
    Sfx,
}

/// Audio-mode filter, set by the client via `set_audio_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    #[default]
    Full,
    Dialogue,
    Ambient,
    Off,
}

impl AudioMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "dialogue" => Some(Self::Dialogue),
            "ambient" => Some(Self::Ambient),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Client → server message. Player input arrives with no `type` field at all;
/// every other shape is discriminated by `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    PlayerMessage { message: String },
    SetAudioMode { mode: AudioMode },
    RollExecute,
    RollAck,
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value.get("type").and_then(Value::as_str) {
            None => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(ClientMessage::PlayerMessage { message })
            }
            Some("set_audio_mode") => {
                let mode = value
                    .get("mode")
                    .and_then(Value::as_str)
                    .and_then(AudioMode::parse)
                    .ok_or_else(|| D::Error::custom("set_audio_mode: invalid or missing mode"))?;
                Ok(ClientMessage::SetAudioMode { mode })
            }
            Some("roll_execute") => Ok(ClientMessage::RollExecute),
            Some("roll_ack") => Ok(ClientMessage::RollAck),
            Some(other) => Err(D::Error::custom(format!(
                "unrecognized client message type: {other}"
            ))),
        }
    }
}

/// Server → client message, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State {
        updates: Value,
    },
    TextDelta {
        content: String,
    },
    TextEnd {
        content: String,
    },
    Audio {
        channel: AudioChannel,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
    },
    RollRequest {
        tool_use_id: String,
        notation: String,
        reason: String,
    },
    #[serde(rename = "roll_result")]
    RollResult {
        #[serde(flatten)]
        outcome: RollOutcome,
    },
    Error {
        content: String,
    },
}

impl ServerMessage {
    pub fn voice_audio(speaker: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Audio {
            channel: AudioChannel::Voice,
            data: data.into(),
            speaker: Some(speaker.into()),
        }
    }

    pub fn ambient_audio(data: impl Into<String>) -> Self {
        Self::Audio {
            channel: AudioChannel::Ambient,
            data: data.into(),
            speaker: None,
        }
    }

    pub fn sfx_audio(data: impl Into<String>) -> Self {
        Self::Audio {
            channel: AudioChannel::Sfx,
            data: data.into(),
            speaker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_message_has_no_type_field() {
        let v: ClientMessage = serde_json::from_str(r#"{"message": "open the door"}"#).unwrap();
        assert_eq!(
            v,
            ClientMessage::PlayerMessage {
                message: "open the door".to_string()
            }
        );
    }

    #[test]
    fn set_audio_mode_round_trips() {
        let v: ClientMessage =
            serde_json::from_str(r#"{"type": "set_audio_mode", "mode": "dialogue"}"#).unwrap();
        assert_eq!(
            v,
            ClientMessage::SetAudioMode {
                mode: AudioMode::Dialogue
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type": "teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn roll_result_remaps_internal_type_field() {
        let msg = ServerMessage::RollResult {
            outcome: RollOutcome {
                kind: crate::dice::RollKind::Standard,
                notation: "1d20+3".to_string(),
                rolls: vec![15],
                total: 18,
                modifier: Some(3),
                kept: None,
                discarded: None,
                natural_20: None,
                natural_1: None,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "roll_result");
        assert_eq!(json["roll_type"], "standard");
        assert_eq!(json["total"], 18);
    }

    #[test]
    fn audio_message_shape() {
        let msg = ServerMessage::voice_audio("Barkeep", "base64data");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["channel"], "voice");
        assert_eq!(json["speaker"], "Barkeep");
    }
}

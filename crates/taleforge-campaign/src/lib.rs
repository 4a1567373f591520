//! On-disk campaign state: character sheet, overview, voice registry, and
//! the session-log tail used to seed the DM's context block.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SESSION_LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("campaign not found: {0}")]
    NotFound(String),
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, CampaignError>;

/// Hit point pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i64,
    pub max: i64,
}

/// `character.json` — the player character sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterState {
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub race: String,
    #[serde(default)]
    pub class: String,
    pub hp: HitPoints,
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub gold: i64,
    #[serde(default)]
    pub inventory: Vec<String>,
}

fn default_level() -> u32 {
    1
}

/// Where the party currently stands, per `campaign-overview.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerPosition {
    #[serde(default)]
    pub current_location: String,
}

/// `campaign-overview.json` — campaign-level metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignOverview {
    #[serde(default = "default_unknown")]
    pub campaign_name: String,
    #[serde(default)]
    pub player_position: PlayerPosition,
    #[serde(default = "default_unknown")]
    pub time_of_day: String,
    #[serde(default = "default_unknown")]
    pub current_date: String,
}

fn default_unknown() -> String {
    "unknown".to_string()
}

/// One entry in the voice registry — an ElevenLabs voice id plus delivery knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub voice_id: String,
    #[serde(default)]
    pub settings: Option<VoiceSettings>,
}

/// Stability/similarity/style sliders, each clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_slider")]
    pub stability: f32,
    #[serde(default = "default_slider")]
    pub similarity: f32,
    #[serde(default)]
    pub style: f32,
}

fn default_slider() -> f32 {
    0.5
}

impl VoiceSettings {
    pub fn clamped(self) -> Self {
        Self {
            stability: self.stability.clamp(0.0, 1.0),
            similarity: self.similarity.clamp(0.0, 1.0),
            style: self.style.clamp(0.0, 1.0),
        }
    }
}

/// `voice-registry.json` — narrator, per-NPC, and ambience voice mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceRegistry {
    #[serde(default)]
    pub narrator: Option<VoiceEntry>,
    #[serde(default)]
    pub npcs: HashMap<String, VoiceEntry>,
    #[serde(default)]
    pub ambience: HashMap<String, String>,
}

impl VoiceRegistry {
    /// Look up the ElevenLabs voice id for `speaker` ("narrator" or an NPC name).
    pub fn get_voice_id(&self, speaker: &str) -> Option<&str> {
        if speaker == "narrator" {
            self.narrator.as_ref().map(|e| e.voice_id.as_str())
        } else {
            self.npcs.get(speaker).map(|e| e.voice_id.as_str())
        }
    }

    /// Clamp every entry's voice settings to `[0.0, 1.0]`. `voice-registry.json`
    /// is hand-edited campaign data, not generated by this program, so values
    /// outside the documented range need correcting at load time rather than
    /// trusted.
    fn clamp_settings(mut self) -> Self {
        if let Some(entry) = &mut self.narrator {
            entry.settings = entry.settings.map(VoiceSettings::clamped);
        }
        for entry in self.npcs.values_mut() {
            entry.settings = entry.settings.map(VoiceSettings::clamped);
        }
        self
    }
}

/// A narrow, read-only slice of a campaign's on-disk state: just enough to
/// seed the DM's opening context block and resolve voice ids during a turn.
pub struct CampaignSnapshot {
    pub campaign_id: String,
    pub dir: PathBuf,
    pub character: CharacterState,
    pub overview: CampaignOverview,
    pub voices: VoiceRegistry,
    pub session_log_tail: String,
    pub session_log_hash: String,
}

impl CampaignSnapshot {
    /// Load a campaign's state from `campaigns_dir/campaign_id/`.
    pub fn load(campaigns_dir: &Path, campaign_id: &str) -> Result<Self> {
        let dir = campaigns_dir.join(campaign_id);
        if !dir.is_dir() {
            return Err(CampaignError::NotFound(campaign_id.to_string()));
        }

        let character = read_json(&dir.join("character.json"))?;
        let overview = read_json_or_default(&dir.join("campaign-overview.json"))?;
        let voices: VoiceRegistry = read_json_or_default(&dir.join("voice-registry.json"))?;
        let voices = voices.clamp_settings();
        let (session_log_tail, session_log_hash) = read_session_log_tail(&dir)?;

        Ok(Self {
            campaign_id: campaign_id.to_string(),
            dir,
            character,
            overview,
            voices,
            session_log_tail,
            session_log_hash,
        })
    }

    /// Render the system-prompt context block the DM reads at the start of a turn.
    pub fn context_block(&self) -> String {
        let mut parts = Vec::new();

        let mut overview_lines = vec![format!("Campaign: {}", self.overview.campaign_name)];
        if !self.overview.player_position.current_location.is_empty() {
            overview_lines.push(format!(
                "Current location: {}",
                self.overview.player_position.current_location
            ));
        }
        overview_lines.push(format!(
            "Time: {} on {}",
            self.overview.time_of_day, self.overview.current_date
        ));
        parts.push(overview_lines.join("\n"));

        parts.push(format!(
            "Player character: {} — Level {} {} {}, HP {}/{}",
            self.character.name,
            self.character.level,
            self.character.race,
            self.character.class,
            self.character.hp.current,
            self.character.hp.max,
        ));

        if !self.session_log_tail.is_empty() {
            parts.push(format!("Recent session log:\n{}", self.session_log_tail));
        }

        parts.join("\n\n")
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|source| CampaignError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CampaignError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

fn read_session_log_tail(campaign_dir: &Path) -> Result<(String, String)> {
    let path = campaign_dir.join("session-log.md");
    if !path.exists() {
        return Ok((String::new(), hash_str("")));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| CampaignError::Io {
        path: path.clone(),
        source,
    })?;
    let hash = hash_str(&text);
    let lines: Vec<&str> = text.trim().lines().collect();
    let tail_start = lines.len().saturating_sub(SESSION_LOG_TAIL_LINES);
    let tail = lines[tail_start..].join("\n");
    Ok((tail, hash))
}

fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cached opening-turn response, keyed on the session log's content hash —
/// lets a reconnect replay the DM's opening narration instead of re-running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningTurnCache {
    pub session_log_hash: String,
    pub messages: Vec<serde_json::Value>,
}

impl OpeningTurnCache {
    fn cache_path(dir: &Path) -> PathBuf {
        dir.join(".opening-turn-cache.json")
    }

    /// Load the cache if present and still valid for `current_hash`.
    pub fn load_if_fresh(dir: &Path, current_hash: &str) -> Option<Self> {
        let path = Self::cache_path(dir);
        let text = std::fs::read_to_string(path).ok()?;
        let cache: Self = serde_json::from_str(&text).ok()?;
        if cache.session_log_hash == current_hash {
            Some(cache)
        } else {
            None
        }
    }

    /// Persist the opening turn's messages, atomically (write-then-rename).
    pub fn save(dir: &Path, session_log_hash: String, messages: Vec<serde_json::Value>) -> Result<()> {
        let cache = Self {
            session_log_hash,
            messages,
        };
        let path = Self::cache_path(dir);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string(&cache).map_err(|source| CampaignError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&tmp_path, body).map_err(|source| CampaignError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| CampaignError::Io { path, source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn loads_a_minimal_campaign() {
        let tmp = tempdir();
        let campaign_dir = tmp.join("riverdale");
        fs::create_dir_all(&campaign_dir).unwrap();
        write(
            &campaign_dir,
            "character.json",
            r#"{"name": "Elowen", "level": 3, "race": "Elf", "class": "Ranger", "hp": {"current": 18, "max": 24}}"#,
        );

        let snap = CampaignSnapshot::load(&tmp, "riverdale").unwrap();
        assert_eq!(snap.character.name, "Elowen");
        assert_eq!(snap.character.hp.current, 18);
        assert!(snap.context_block().contains("Elowen"));
        fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn missing_campaign_is_an_error() {
        let tmp = tempdir();
        let result = CampaignSnapshot::load(&tmp, "nonexistent");
        assert!(matches!(result, Err(CampaignError::NotFound(_))));
        fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn voice_registry_looks_up_narrator_and_npc() {
        let mut registry = VoiceRegistry::default();
        registry.narrator = Some(VoiceEntry {
            voice_id: "narrator-voice".to_string(),
            settings: None,
        });
        registry.npcs.insert(
            "Barkeep".to_string(),
            VoiceEntry {
                voice_id: "barkeep-voice".to_string(),
                settings: None,
            },
        );
        assert_eq!(registry.get_voice_id("narrator"), Some("narrator-voice"));
        assert_eq!(registry.get_voice_id("Barkeep"), Some("barkeep-voice"));
        assert_eq!(registry.get_voice_id("Nobody"), None);
    }

    #[test]
    fn opening_turn_cache_round_trips_and_invalidates() {
        let tmp = tempdir();
        fs::create_dir_all(&tmp).unwrap();
        let messages = vec![serde_json::json!({"type": "text_delta", "content": "Hello"})];
        OpeningTurnCache::save(&tmp, "hash-a".to_string(), messages.clone()).unwrap();

        let hit = OpeningTurnCache::load_if_fresh(&tmp, "hash-a").unwrap();
        assert_eq!(hit.messages, messages);

        assert!(OpeningTurnCache::load_if_fresh(&tmp, "hash-b").is_none());
        fs::remove_dir_all(&tmp).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taleforge-campaign-test-{:?}",
            std::thread::current().id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}

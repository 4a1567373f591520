use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Maximum inbound WebSocket payload this process will accept, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
/// Default number of model ↔ tool rounds before a turn is forcibly cut short.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;
/// Duration hint (seconds) passed to the sound-effect service for an ambient loop.
pub const AMBIENT_DURATION_SECS: f32 = 10.0;
/// Duration hint (seconds) passed to the sound-effect service for a one-shot SFX.
pub const SFX_DURATION_SECS: f32 = 3.0;

/// Top-level process configuration: `taleforge.toml` + `TALEFORGE_*` env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaleforgeConfig {
    pub gateway: GatewayConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub campaigns: CampaignsConfig,
}

impl TaleforgeConfig {
    /// Load config from an explicit path, falling back to `./taleforge.toml` if present,
    /// then layering `TALEFORGE_*` environment variables on top.
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("taleforge.toml"));
        }
        figment
            .merge(Env::prefixed("TALEFORGE_").split("__"))
            .extract()
    }
}

impl Default for TaleforgeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                bind: default_bind(),
                port: default_port(),
            },
            model: ModelConfig {
                api_key: None,
                base_url: default_model_base_url(),
                model_id: default_model_id(),
            },
            audio: AudioConfig::default(),
            campaigns: CampaignsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Language-model provider configuration. `api_key` absent ⇒ the orchestrator
/// cannot run; this is a startup-time configuration error, not a capability drop
/// (the model is not an optional capability the way TTS/SFX are).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
}

/// TTS/SFX provider configuration. Either half may be absent — each is an
/// independent, optional capability (see §4.4 of SPEC_FULL.md).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioConfig {
    pub tts_api_key: Option<String>,
    pub tts_base_url: Option<String>,
    pub sfx_api_key: Option<String>,
    pub sfx_base_url: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignsConfig {
    #[serde(default = "default_campaigns_dir")]
    pub data_dir: String,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_campaigns_dir(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_model_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model_id() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_cache_dir() -> String {
    "audio-cache".to_string()
}
fn default_campaigns_dir() -> String {
    "data/campaigns".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = TaleforgeConfig::default();
        assert_eq!(cfg.gateway.port, 8787);
        assert_eq!(cfg.audio.cache_dir, "audio-cache");
        assert!(cfg.model.api_key.is_none());
    }
}

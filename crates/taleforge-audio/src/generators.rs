//! Backing clients for speech and sound-effect generation.

use async_trait::async_trait;
use taleforge_campaign::VoiceSettings;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Narration/dialogue text-to-speech.
#[async_trait]
pub trait TtsGenerator: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        voice_id: &str,
        settings: Option<VoiceSettings>,
    ) -> Result<Option<Vec<u8>>, AudioError>;
}

/// Ambient loops and one-shot sound effects.
#[async_trait]
pub trait SoundGenerator: Send + Sync {
    async fn generate(
        &self,
        description: &str,
        duration_secs: f32,
    ) -> Result<Option<Vec<u8>>, AudioError>;
}

pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: Option<String>, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl TtsGenerator for ElevenLabsTts {
    async fn generate(
        &self,
        text: &str,
        voice_id: &str,
        settings: Option<VoiceSettings>,
    ) -> Result<Option<Vec<u8>>, AudioError> {
        let Some(api_key) = &self.api_key else {
            warn!("TTS API key not configured — narration audio disabled");
            return Ok(None);
        };

        let settings = settings.unwrap_or(VoiceSettings {
            stability: 0.5,
            similarity: 0.75,
            style: 0.0,
        });

        let body = serde_json::json!({
            "text": text,
            "model_id": "eleven_multilingual_v2",
            "voice_settings": {
                "stability": settings.stability,
                "similarity_boost": settings.similarity,
                "style": settings.style,
            },
        });

        let url = format!("{}/v1/text-to-speech/{voice_id}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(AudioError::Api { status, message });
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

pub struct ElevenLabsSoundEffects {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl ElevenLabsSoundEffects {
    pub fn new(api_key: Option<String>, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl SoundGenerator for ElevenLabsSoundEffects {
    async fn generate(
        &self,
        description: &str,
        duration_secs: f32,
    ) -> Result<Option<Vec<u8>>, AudioError> {
        let Some(api_key) = &self.api_key else {
            warn!("SFX API key not configured — ambient/sfx audio disabled");
            return Ok(None);
        };

        let body = serde_json::json!({
            "text": description,
            "duration_seconds": duration_secs,
        });

        let url = format!("{}/v1/sound-generation", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(AudioError::Api { status, message });
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

//! HTTP speech synthesis backends

use async_trait::async_trait;

use crate::audio::{AudioFormat, SynthesizedAudio};
use crate::{Error, Result};

use super::SpeechOptions;

/// Backend that turns one utterance into audio
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Synthesize `text` into playable audio
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails; the owning queue reports it and
    /// moves on to the next utterance.
    async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<SynthesizedAudio>;
}

/// `OpenAI` speech endpoint configuration
#[derive(Debug, Clone)]
pub struct OpenAiSynthesizerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Default voice, overridable per utterance
    pub voice: String,
    /// Default speed, overridable per utterance
    pub speed: f32,
}

impl Default for OpenAiSynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// Speech synthesis via the `OpenAI` `audio/speech` endpoint
pub struct OpenAiSynthesizer {
    config: OpenAiSynthesizerConfig,
    client: reqwest::Client,
}

impl OpenAiSynthesizer {
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: OpenAiSynthesizerConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SynthesisClient for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.config.model,
            input: text,
            voice: options.voice.as_deref().unwrap_or(&self.config.voice),
            speed: options.speed.unwrap_or(self.config.speed),
        };

        let url = format!(
            "{}/audio/speech",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesized utterance");
        Ok(SynthesizedAudio {
            bytes: audio.to_vec(),
            format: AudioFormat::Mp3,
        })
    }
}

/// ElevenLabs endpoint configuration
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizerConfig {
    pub api_key: String,
    /// Default voice id, overridable per utterance
    pub voice_id: String,
    pub model: String,
}

impl Default for ElevenLabsSynthesizerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: String::new(),
            model: "eleven_monolingual_v1".to_string(),
        }
    }
}

/// Speech synthesis via the ElevenLabs text-to-speech API
pub struct ElevenLabsSynthesizer {
    config: ElevenLabsSynthesizerConfig,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: ElevenLabsSynthesizerConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SynthesisClient for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let voice = options.voice.as_deref().unwrap_or(&self.config.voice_id);
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.config.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(SynthesizedAudio {
            bytes: audio.to_vec(),
            format: AudioFormat::Mp3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_rejects_missing_api_key() {
        let result = OpenAiSynthesizer::new(OpenAiSynthesizerConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn elevenlabs_rejects_missing_api_key() {
        let result = ElevenLabsSynthesizer::new(ElevenLabsSynthesizerConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

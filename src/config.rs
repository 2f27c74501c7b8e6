//! TOML configuration file loading
//!
//! Supports `~/.config/voxbridge/config.toml` as a persistent config
//! source. All fields are optional — the file is a partial overlay on top
//! of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::recognition::{
    AccumulatorConfig, OpenAiTranscriberConfig, TranscriptionMode, WhisperConfig,
};
use crate::speech::{ElevenLabsSynthesizerConfig, OpenAiSynthesizerConfig};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Speech-to-text configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Language to recognize (ISO 639-1)
    pub lang: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Override the API base URL
    pub base_url: Option<String>,

    /// Consume transcription responses as SSE
    pub stream: Option<bool>,

    /// Translate to English instead of transcribing
    pub translate: Option<bool>,

    /// Minimum segment length before a flush on speech end (seconds)
    pub min_chunk_secs: Option<f32>,

    /// Wait for this much further audio before flushing a short segment
    pub grace_chunk_secs: Option<f32>,

    /// Hard cap on segment length (seconds)
    pub max_chunk_secs: Option<f32>,

    /// VAD probability above which the user counts as speaking
    pub positive_speech_threshold: Option<f32>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// TTS speed multiplier
    pub speed: Option<f32>,

    /// Override the API base URL
    pub base_url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

impl ConfigFile {
    /// Whisper adapter settings with file values overlaid on defaults
    #[must_use]
    pub fn whisper_config(&self) -> WhisperConfig {
        let defaults = WhisperConfig::default();
        let acc_defaults = AccumulatorConfig::default();
        let r = &self.recognition;

        WhisperConfig {
            lang: r.lang.clone().or(defaults.lang),
            positive_speech_threshold: r
                .positive_speech_threshold
                .unwrap_or(defaults.positive_speech_threshold),
            accumulator: AccumulatorConfig {
                min_chunk_sec: r.min_chunk_secs.unwrap_or(acc_defaults.min_chunk_sec),
                small_chunk_grace_sec: r
                    .grace_chunk_secs
                    .unwrap_or(acc_defaults.small_chunk_grace_sec),
                max_chunk_sec: r.max_chunk_secs.or(acc_defaults.max_chunk_sec),
                ..acc_defaults
            },
        }
    }

    /// Transcriber settings with file values overlaid on defaults
    #[must_use]
    pub fn transcriber_config(&self) -> OpenAiTranscriberConfig {
        let defaults = OpenAiTranscriberConfig::default();
        let r = &self.recognition;

        OpenAiTranscriberConfig {
            base_url: r.base_url.clone().unwrap_or(defaults.base_url),
            api_key: self.api_keys.openai.clone().unwrap_or(defaults.api_key),
            model: r.model.clone().unwrap_or(defaults.model),
            mode: if r.translate.unwrap_or(false) {
                TranscriptionMode::Translate
            } else {
                TranscriptionMode::Transcribe
            },
            stream: r.stream.unwrap_or(defaults.stream),
        }
    }

    /// `OpenAI` synthesizer settings with file values overlaid on defaults
    #[must_use]
    pub fn openai_synthesizer_config(&self) -> OpenAiSynthesizerConfig {
        let defaults = OpenAiSynthesizerConfig::default();
        let s = &self.speech;

        OpenAiSynthesizerConfig {
            base_url: s.base_url.clone().unwrap_or(defaults.base_url),
            api_key: self.api_keys.openai.clone().unwrap_or(defaults.api_key),
            model: s.model.clone().unwrap_or(defaults.model),
            voice: s.voice.clone().unwrap_or(defaults.voice),
            speed: s.speed.unwrap_or(defaults.speed),
        }
    }

    /// ElevenLabs synthesizer settings with file values overlaid on defaults
    #[must_use]
    pub fn elevenlabs_synthesizer_config(&self) -> ElevenLabsSynthesizerConfig {
        let defaults = ElevenLabsSynthesizerConfig::default();

        ElevenLabsSynthesizerConfig {
            api_key: self
                .api_keys
                .elevenlabs
                .clone()
                .unwrap_or(defaults.api_key),
            voice_id: self.speech.voice.clone().unwrap_or(defaults.voice_id),
            model: self.speech.model.clone().unwrap_or(defaults.model),
        }
    }
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be
/// parsed.
#[must_use]
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    load_config_from(&path).unwrap_or_else(|e| {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to load config file, using defaults"
        );
        ConfigFile::default()
    })
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file can't be read or parsed
pub fn load_config_from(path: &Path) -> crate::Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/voxbridge/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxbridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ConfigFile = toml::from_str("").unwrap();
        let whisper = config.whisper_config();
        assert!(whisper.lang.is_none());
        assert!((whisper.positive_speech_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_overlay_keeps_defaults_elsewhere() {
        let config: ConfigFile = toml::from_str(
            r#"
            [recognition]
            lang = "sv"
            min_chunk_secs = 2.0

            [api_keys]
            openai = "sk-test"
            "#,
        )
        .unwrap();

        let whisper = config.whisper_config();
        assert_eq!(whisper.lang.as_deref(), Some("sv"));
        assert!((whisper.accumulator.min_chunk_sec - 2.0).abs() < f32::EPSILON);

        let transcriber = config.transcriber_config();
        assert_eq!(transcriber.api_key, "sk-test");
        assert_eq!(transcriber.model, "whisper-1");
    }

    #[test]
    fn translate_flag_selects_mode() {
        let config: ConfigFile = toml::from_str("[recognition]\ntranslate = true").unwrap();
        assert_eq!(
            config.transcriber_config().mode,
            TranscriptionMode::Translate
        );
    }
}

//! Error types for voxbridge

use thiserror::Error;

/// Result type alias for voxbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxbridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or buffer error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

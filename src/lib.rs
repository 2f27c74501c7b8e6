//! Voxbridge - Swappable speech recognition and synthesis adapters
//!
//! This library provides the building blocks for voice-driven applications:
//! - Speech recognition behind a capability-gated trait (VAD, interim text)
//! - Incremental audio accumulation with a tunable flush policy
//! - Ordered speech output with lookahead synthesis and playback scheduling
//! - Streaming sentence segmentation for token streams
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Application                        │
//! │       text in  ◄──────────────►  text out           │
//! └───────▲──────────────────────────────┬──────────────┘
//!         │                              │
//! ┌───────┴──────────────┐   ┌───────────▼──────────────┐
//! │  RecognitionService   │   │      SpeechService       │
//! │  VAD → Accumulator    │   │  Segmenter → Queue       │
//! │      → Transcriber    │   │      → Synthesis → Sink  │
//! └───────▲──────────────┘   └───────────┬──────────────┘
//!         │                              │
//! ┌───────┴──────────────────────────────▼──────────────┐
//! │              Audio devices / HTTP APIs               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod recognition;
pub mod segment;
pub mod speech;

pub use audio::{AudioFormat, AudioSink, CpalSink, SynthesizedAudio, TimedSink};
pub use config::{ConfigFile, config_file_path, load_config_file, load_config_from};
pub use error::{Error, Result};
pub use recognition::{
    AccumulatorConfig, AudioAccumulator, FlushReason, FlushedSegment, ListenOptions,
    ListeningState, MockRecognition, OpenAiTranscriber, OpenAiTranscriberConfig,
    RecognitionService, TranscriptionMode, VadOverride, VadState, WhisperConfig,
    WhisperRecognition,
};
pub use segment::{SentenceSegmenter, SentenceStream};
pub use speech::{
    ElevenLabsSynthesizer, MockSynthesizer, OpenAiSynthesizer, SpeechOptions, SpeechQueue,
    SpeechService, SpeechState, SynthesisClient, mock_speech_service, openai_speech_service,
};

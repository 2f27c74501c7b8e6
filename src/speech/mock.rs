//! Device-free speech output for development and tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::audio::{AudioFormat, SynthesizedAudio, TimedSink};

use super::queue::SpeechQueue;
use super::{SpeechOptions, SynthesisClient};

/// Instant synthesis: the "audio" is the utf-8 text itself
///
/// Paired with [`TimedSink`] this makes playback duration proportional to
/// text length, which is enough to exercise queue ordering.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    /// Artificial latency before the result resolves
    pub latency: Duration,
}

impl MockSynthesizer {
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl SynthesisClient for MockSynthesizer {
    async fn synthesize(&self, text: &str, _options: &SpeechOptions) -> Result<SynthesizedAudio> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            format: AudioFormat::Wav,
        })
    }
}

/// A fully wired queue over mock synthesis and a timed sink
///
/// `micros_per_byte` scales playback duration per byte of "audio" (one
/// byte per character of text).
#[must_use]
pub fn mock_speech_service(micros_per_byte: u64) -> SpeechQueue {
    SpeechQueue::new(
        Arc::new(MockSynthesizer::default()),
        Arc::new(TimedSink::new(micros_per_byte)),
    )
}

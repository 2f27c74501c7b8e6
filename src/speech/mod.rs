//! Speech synthesis and playback
//!
//! A [`SpeechService`] accepts text, synthesizes it, and plays it back in
//! order. [`SpeechQueue`] is the scheduler: it synthesizes ahead of
//! playback, promotes finished items one at a time, and guarantees queue
//! order regardless of how synthesis requests complete.

mod mock;
mod queue;
mod synthesis;

pub use mock::{MockSynthesizer, mock_speech_service};
pub use queue::SpeechQueue;
pub use synthesis::{
    ElevenLabsSynthesizer, ElevenLabsSynthesizerConfig, OpenAiSynthesizer, OpenAiSynthesizerConfig,
    SynthesisClient,
};

use std::sync::Arc;

use crate::Error;
use crate::recognition::HandlerSlot;

/// Playback state of a speech service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechState {
    #[default]
    Idle,
    Speaking,
    Paused,
    Error,
}

/// Per-utterance synthesis options
#[derive(Debug, Clone, Default)]
pub struct SpeechOptions {
    /// Language hint; backends that pick voices per language may use it
    pub lang: Option<String>,
    /// Playback rate multiplier, 1.0 is normal
    pub speed: Option<f32>,
    /// Pitch multiplier, 1.0 is normal; the bundled HTTP backends have no
    /// pitch control and ignore it
    pub pitch: Option<f32>,
    /// Backend voice name or id
    pub voice: Option<String>,
}

pub type SpeechErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;
pub type SpeechStateHandler = Box<dyn Fn(SpeechState, SpeechState) + Send + Sync>;
/// Receives the pending texts, the currently playing text, and the reason
/// for the update
pub type QueueUpdateHandler = Box<dyn Fn(&[String], Option<&str>, &str) + Send + Sync>;

/// Uniform surface over speech output backends
///
/// Observer setters are single-slot: setting a handler replaces the
/// previous one, passing `None` clears the slot.
pub trait SpeechService: Send + Sync {
    /// Append an utterance to the queue; it plays after everything ahead
    fn enqueue_speech(&self, text: &str, options: Option<SpeechOptions>);

    /// Cancel everything, then speak this utterance alone
    fn speak_directly(&self, text: &str, options: Option<SpeechOptions>);

    /// Pause playback; queued items stay queued
    fn pause(&self);

    /// Resume paused playback
    fn resume(&self);

    /// Stop playback and drop every queued utterance
    fn cancel(&self);

    /// Texts waiting behind the current utterance, in play order
    fn pending_speech(&self) -> Vec<String>;

    /// Text of the utterance currently being spoken, if any
    fn current_speech(&self) -> Option<String>;

    fn speech_state(&self) -> SpeechState;

    /// Observes `(new, previous)` state pairs
    fn on_speech_state_changed(&self, handler: Option<SpeechStateHandler>);

    /// Observes queue membership changes with a human-readable reason
    fn on_speech_queue_updated(&self, handler: Option<QueueUpdateHandler>);

    fn on_error(&self, handler: Option<SpeechErrorHandler>);
}

/// Observer slots shared between a speech service and its workers
pub(crate) struct SpeechObservers {
    pub(crate) state: HandlerSlot<dyn Fn(SpeechState, SpeechState) + Send + Sync>,
    pub(crate) queue: HandlerSlot<dyn Fn(&[String], Option<&str>, &str) + Send + Sync>,
    pub(crate) error: HandlerSlot<dyn Fn(&Error) + Send + Sync>,
}

impl SpeechObservers {
    pub(crate) fn new() -> Self {
        Self {
            state: HandlerSlot::empty(),
            queue: HandlerSlot::empty(),
            error: HandlerSlot::empty(),
        }
    }

    pub(crate) fn emit_state(&self, new: SpeechState, previous: SpeechState) {
        if let Some(handler) = self.state.get() {
            handler(new, previous);
        }
    }

    pub(crate) fn emit_queue(&self, pending: &[String], current: Option<&str>, reason: &str) {
        if let Some(handler) = self.queue.get() {
            handler(pending, current, reason);
        }
    }

    /// Errors must never vanish: without an observer they are logged
    pub(crate) fn emit_error(&self, error: &Error) {
        match self.error.get() {
            Some(handler) => handler(error),
            None => tracing::error!(error = %error, "speech error with no error observer"),
        }
    }
}

/// Convenience alias for a shared speech service
pub type SharedSpeechService = Arc<dyn SpeechService>;

/// A fully wired queue over `OpenAI` synthesis and the default output device
///
/// # Errors
///
/// Returns error if no API key is configured or no output device exists
pub fn openai_speech_service(config: OpenAiSynthesizerConfig) -> crate::Result<SpeechQueue> {
    Ok(SpeechQueue::new(
        Arc::new(OpenAiSynthesizer::new(config)?),
        Arc::new(crate::audio::CpalSink::new()?),
    ))
}

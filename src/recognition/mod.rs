//! Speech recognition adapters
//!
//! A [`RecognitionService`] turns microphone audio into text callbacks.
//! Implementations are swappable behind the trait; optional capabilities
//! (VAD state, speech start/end events) are gated by `supports_*`
//! predicates rather than downcasting, so callers branch on capability,
//! never on concrete type.

mod accumulator;
mod mock;
mod openai;
pub mod vad;
mod whisper;

pub use accumulator::{AccumulatorConfig, AudioAccumulator, FlushReason, FlushedSegment, SegmentState};
pub use mock::MockRecognition;
pub use openai::{OpenAiTranscriber, OpenAiTranscriberConfig};
pub use whisper::{
    TranscriptEvent, TranscriptionClient, TranscriptionMode, WhisperConfig, WhisperRecognition,
};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Error, Result};

/// Whether a recognition service is consuming incoming audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Listening,
    Inactive,
}

/// Whether the user is currently speaking, per voice activity detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Speaking,
    Idle,
}

/// Manual override of the reported VAD state
///
/// Typical use: pin to `Idle` while a TTS engine is talking so the system
/// does not report its own voice as user speech. `Unset` releases the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadOverride {
    #[default]
    Unset,
    Speaking,
    Idle,
}

/// Options accepted by `start_listening`
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Language to recognize; ISO 639-1 or BCP-47 depending on the backend
    pub lang: Option<String>,
}

pub type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;
pub type TextHandler = Box<dyn Fn(&str) + Send + Sync>;
pub type ListeningStateHandler = Box<dyn Fn(ListeningState) + Send + Sync>;
pub type VadStateHandler = Box<dyn Fn(VadState) + Send + Sync>;
pub type SpeechEventHandler = Box<dyn Fn() + Send + Sync>;

/// Uniform capability surface over recognition backends
///
/// Observer setters are single-slot: setting a handler replaces the
/// previous one, passing `None` clears the slot.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Start consuming microphone audio
    ///
    /// # Errors
    ///
    /// Returns error if the audio environment is unavailable
    async fn start_listening(&self, options: Option<ListenOptions>) -> Result<()>;

    /// Stop consuming audio, flushing any pending segment first
    ///
    /// The service stays usable; `start_listening` may be called again.
    ///
    /// # Errors
    ///
    /// Returns error if teardown fails
    async fn stop_listening(&self) -> Result<()>;

    fn listening_state(&self) -> ListeningState;

    fn on_listening_state_changed(&self, handler: Option<ListeningStateHandler>);

    /// Final recognized text, one call per completed utterance
    fn on_text_received(&self, handler: Option<TextHandler>);

    /// Partial text, superseded by later partial or final output
    fn on_interim_text_received(&self, handler: Option<TextHandler>);

    fn on_error(&self, handler: Option<ErrorHandler>);

    /// Whether this backend reports VAD state
    fn supports_vad_state(&self) -> bool {
        false
    }

    fn vad_state(&self) -> VadState {
        VadState::Idle
    }

    fn on_vad_state_changed(&self, _handler: Option<VadStateHandler>) {}

    /// Pin the reported VAD state, overriding frame-derived updates
    fn set_vad_override(&self, _state: VadOverride) {}

    /// Equivalent to `set_vad_override(VadOverride::Unset)`
    fn release_vad_override(&self) {
        self.set_vad_override(VadOverride::Unset);
    }

    /// Whether this backend emits speech start/end events
    fn supports_speech_events(&self) -> bool {
        false
    }

    fn on_speech_start(&self, _handler: Option<SpeechEventHandler>) {}

    fn on_speech_end(&self, _handler: Option<SpeechEventHandler>) {}
}

/// Single-slot handler storage shared by the adapters
///
/// The handler is cloned out of the lock before being invoked, so a
/// callback may re-enter the owning adapter without deadlocking.
pub(crate) struct HandlerSlot<T: ?Sized>(Mutex<Option<Arc<T>>>);

impl<T: ?Sized> HandlerSlot<T> {
    pub(crate) fn empty() -> Self {
        Self(Mutex::new(None))
    }

    pub(crate) fn set(&self, handler: Option<Arc<T>>) {
        *self.0.lock().expect("handler slot poisoned") = handler;
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.0.lock().expect("handler slot poisoned").clone()
    }
}

/// Observer slots shared between a recognition adapter and its workers
pub(crate) struct RecognitionObservers {
    pub(crate) listening: HandlerSlot<dyn Fn(ListeningState) + Send + Sync>,
    pub(crate) vad: HandlerSlot<dyn Fn(VadState) + Send + Sync>,
    pub(crate) text: HandlerSlot<dyn Fn(&str) + Send + Sync>,
    pub(crate) interim: HandlerSlot<dyn Fn(&str) + Send + Sync>,
    pub(crate) speech_start: HandlerSlot<dyn Fn() + Send + Sync>,
    pub(crate) speech_end: HandlerSlot<dyn Fn() + Send + Sync>,
    pub(crate) error: HandlerSlot<dyn Fn(&Error) + Send + Sync>,
}

impl RecognitionObservers {
    pub(crate) fn new() -> Self {
        Self {
            listening: HandlerSlot::empty(),
            vad: HandlerSlot::empty(),
            text: HandlerSlot::empty(),
            interim: HandlerSlot::empty(),
            speech_start: HandlerSlot::empty(),
            speech_end: HandlerSlot::empty(),
            error: HandlerSlot::empty(),
        }
    }

    pub(crate) fn emit_text(&self, text: &str) {
        if let Some(handler) = self.text.get() {
            handler(text);
        }
    }

    pub(crate) fn emit_interim(&self, text: &str) {
        if let Some(handler) = self.interim.get() {
            handler(text);
        }
    }

    pub(crate) fn emit_listening(&self, state: ListeningState) {
        if let Some(handler) = self.listening.get() {
            handler(state);
        }
    }

    pub(crate) fn emit_vad(&self, state: VadState) {
        if let Some(handler) = self.vad.get() {
            handler(state);
        }
    }

    pub(crate) fn emit_speech_start(&self) {
        if let Some(handler) = self.speech_start.get() {
            handler();
        }
    }

    pub(crate) fn emit_speech_end(&self) {
        if let Some(handler) = self.speech_end.get() {
            handler();
        }
    }

    /// Errors must never vanish: without an observer they are logged
    pub(crate) fn emit_error(&self, error: &Error) {
        match self.error.get() {
            Some(handler) => handler(error),
            None => tracing::error!(error = %error, "recognition error with no error observer"),
        }
    }
}

//! Whisper-style recognition adapter
//!
//! Wires a [`VadSource`] through the [`AudioAccumulator`] into a
//! [`TranscriptionClient`]. Two workers per listening session: an event
//! loop driving the accumulator, and a transcription loop that consumes
//! flushed segments strictly one at a time — at most one request is ever
//! in flight, so interim/final text can never arrive out of segment order.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use crate::{Error, Result};

use super::accumulator::{AccumulatorConfig, AudioAccumulator, FlushedSegment};
use super::vad::{VadEvent, VadSource};
use super::{
    ErrorHandler, ListenOptions, ListeningState, ListeningStateHandler, RecognitionObservers,
    RecognitionService, SpeechEventHandler, TextHandler, VadOverride, VadState, VadStateHandler,
};

/// Transcribe in the spoken language, or translate to English
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionMode {
    #[default]
    Transcribe,
    Translate,
}

/// Output of a transcription backend for one segment
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// Partial text delta, superseded by later events
    Interim(String),
    /// Final text for the segment
    Final(String),
}

/// Backend that turns one flushed segment into text
///
/// Implementations send [`TranscriptEvent`]s on `events` as they become
/// available; the adapter guarantees calls are serialized per session.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe one segment
    ///
    /// # Errors
    ///
    /// Returns error if the request fails; the error is reported to the
    /// session's error observer and does not abort the session.
    async fn transcribe(
        &self,
        segment: FlushedSegment,
        language: Option<&str>,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<()>;
}

/// Whisper adapter configuration
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Default language (ISO 639-1), overridable per `start_listening`
    pub lang: Option<String>,
    /// Frame probability above which the reported VAD state is `Speaking`
    pub positive_speech_threshold: f32,
    /// Flush policy
    pub accumulator: AccumulatorConfig,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            lang: None,
            positive_speech_threshold: 0.5,
            accumulator: AccumulatorConfig::default(),
        }
    }
}

struct SharedState {
    listening: ListeningState,
    vad: VadState,
    vad_override: VadOverride,
}

struct Workers {
    events: JoinHandle<()>,
    transcription: JoinHandle<()>,
}

/// VAD-segmented recognition against a Whisper-compatible backend
pub struct WhisperRecognition {
    config: WhisperConfig,
    client: Arc<dyn TranscriptionClient>,
    observers: Arc<RecognitionObservers>,
    shared: Arc<Mutex<SharedState>>,
    source: AsyncMutex<Box<dyn VadSource>>,
    workers: AsyncMutex<Option<Workers>>,
}

impl WhisperRecognition {
    #[must_use]
    pub fn new(
        config: WhisperConfig,
        source: Box<dyn VadSource>,
        client: Arc<dyn TranscriptionClient>,
    ) -> Self {
        Self {
            config,
            client,
            observers: Arc::new(RecognitionObservers::new()),
            shared: Arc::new(Mutex::new(SharedState {
                listening: ListeningState::Inactive,
                vad: VadState::Idle,
                vad_override: VadOverride::Unset,
            })),
            source: AsyncMutex::new(source),
            workers: AsyncMutex::new(None),
        }
    }

    fn set_listening(&self, state: ListeningState) {
        let changed = {
            let mut shared = self.shared.lock().expect("state lock poisoned");
            let changed = shared.listening != state;
            shared.listening = state;
            changed
        };
        if changed {
            self.observers.emit_listening(state);
        }
    }

    fn set_vad(
        shared: &Mutex<SharedState>,
        observers: &RecognitionObservers,
        state: VadState,
        forced: bool,
    ) {
        let changed = {
            let mut guard = shared.lock().expect("state lock poisoned");
            if !forced && guard.vad_override != VadOverride::Unset {
                return;
            }
            let changed = guard.vad != state;
            guard.vad = state;
            changed
        };
        if changed {
            observers.emit_vad(state);
        }
    }

    async fn event_loop(
        mut events: mpsc::UnboundedReceiver<VadEvent>,
        mut accumulator: AudioAccumulator,
        segments: mpsc::UnboundedSender<FlushedSegment>,
        observers: Arc<RecognitionObservers>,
        shared: Arc<Mutex<SharedState>>,
        threshold: f32,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                VadEvent::Frame {
                    probability,
                    samples,
                } => {
                    let state = if probability > threshold {
                        VadState::Speaking
                    } else {
                        VadState::Idle
                    };
                    Self::set_vad(&shared, &observers, state, false);

                    if let Some(segment) = accumulator.on_frame(&samples) {
                        let _ = segments.send(segment);
                    }
                }
                VadEvent::SpeechStart => {
                    accumulator.on_speech_start();
                    observers.emit_speech_start();
                }
                // The detector's assembled audio is ignored: the
                // accumulator already holds these frames, and using both
                // would double-count the utterance.
                VadEvent::SpeechEnd { .. } => {
                    observers.emit_speech_end();
                    if let Some(segment) = accumulator.on_speech_end() {
                        let _ = segments.send(segment);
                    }
                }
            }
        }

        // Source torn down: whatever is left goes out unconditionally.
        if let Some(segment) = accumulator.force_flush() {
            let _ = segments.send(segment);
        }
    }

    async fn transcription_loop(
        mut segments: mpsc::UnboundedReceiver<FlushedSegment>,
        client: Arc<dyn TranscriptionClient>,
        language: Option<String>,
        observers: Arc<RecognitionObservers>,
    ) {
        while let Some(segment) = segments.recv().await {
            tracing::debug!(
                samples = segment.samples.len(),
                secs = segment.duration_secs(),
                "transcribing segment"
            );

            let (tx, mut rx) = mpsc::unbounded_channel();
            let forwarder = {
                let observers = Arc::clone(&observers);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match event {
                            TranscriptEvent::Interim(delta) => observers.emit_interim(&delta),
                            TranscriptEvent::Final(text) => observers.emit_text(&text),
                        }
                    }
                })
            };

            if let Err(error) = client.transcribe(segment, language.as_deref(), tx).await {
                observers.emit_error(&error);
            }
            // The sender is gone once transcribe returns; wait for the
            // forwarder so this segment's text lands before the next one.
            let _ = forwarder.await;
        }
    }
}

#[async_trait]
impl RecognitionService for WhisperRecognition {
    async fn start_listening(&self, options: Option<ListenOptions>) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return Ok(());
        }

        let events = self.source.lock().await.start()?;
        let language = options
            .and_then(|o| o.lang)
            .or_else(|| self.config.lang.clone());

        let (segment_tx, segment_rx) = mpsc::unbounded_channel();
        let accumulator = AudioAccumulator::new(self.config.accumulator.clone());

        let event_worker = tokio::spawn(Self::event_loop(
            events,
            accumulator,
            segment_tx,
            Arc::clone(&self.observers),
            Arc::clone(&self.shared),
            self.config.positive_speech_threshold,
        ));
        let transcription_worker = tokio::spawn(Self::transcription_loop(
            segment_rx,
            Arc::clone(&self.client),
            language,
            Arc::clone(&self.observers),
        ));

        *workers = Some(Workers {
            events: event_worker,
            transcription: transcription_worker,
        });
        drop(workers);

        self.set_listening(ListeningState::Listening);
        tracing::info!("recognition listening");
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        let taken = self.workers.lock().await.take();
        let Some(workers) = taken else {
            self.set_listening(ListeningState::Inactive);
            return Ok(());
        };

        self.source.lock().await.stop();

        // Event loop drains and force-flushes, then the transcription loop
        // finishes every outstanding segment. Nothing fires after this.
        workers
            .events
            .await
            .map_err(|e| Error::Vad(format!("event worker failed: {e}")))?;
        workers
            .transcription
            .await
            .map_err(|e| Error::Stt(format!("transcription worker failed: {e}")))?;

        Self::set_vad(&self.shared, &self.observers, VadState::Idle, true);
        self.set_listening(ListeningState::Inactive);
        tracing::info!("recognition stopped");
        Ok(())
    }

    fn listening_state(&self) -> ListeningState {
        self.shared.lock().expect("state lock poisoned").listening
    }

    fn on_listening_state_changed(&self, handler: Option<ListeningStateHandler>) {
        self.observers.listening.set(handler.map(Arc::from));
    }

    fn on_text_received(&self, handler: Option<TextHandler>) {
        self.observers.text.set(handler.map(Arc::from));
    }

    fn on_interim_text_received(&self, handler: Option<TextHandler>) {
        self.observers.interim.set(handler.map(Arc::from));
    }

    fn on_error(&self, handler: Option<ErrorHandler>) {
        self.observers.error.set(handler.map(Arc::from));
    }

    fn supports_vad_state(&self) -> bool {
        true
    }

    fn vad_state(&self) -> VadState {
        self.shared.lock().expect("state lock poisoned").vad
    }

    fn on_vad_state_changed(&self, handler: Option<VadStateHandler>) {
        self.observers.vad.set(handler.map(Arc::from));
    }

    fn set_vad_override(&self, state: VadOverride) {
        self.shared.lock().expect("state lock poisoned").vad_override = state;
        match state {
            VadOverride::Speaking => {
                Self::set_vad(&self.shared, &self.observers, VadState::Speaking, true);
            }
            VadOverride::Idle => {
                Self::set_vad(&self.shared, &self.observers, VadState::Idle, true);
            }
            VadOverride::Unset => {}
        }
    }

    fn supports_speech_events(&self) -> bool {
        true
    }

    fn on_speech_start(&self, handler: Option<SpeechEventHandler>) {
        self.observers.speech_start.set(handler.map(Arc::from));
    }

    fn on_speech_end(&self, handler: Option<SpeechEventHandler>) {
        self.observers.speech_end.set(handler.map(Arc::from));
    }
}

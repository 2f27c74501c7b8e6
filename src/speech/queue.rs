//! Speech output scheduling
//!
//! [`SpeechQueue`] owns the utterance queue and a single work-loop task.
//! Synthesis runs ahead of playback (two utterances deep), but promotion
//! is strictly head-of-queue: audio plays in enqueue order no matter how
//! synthesis requests complete. All mutation happens under one lock and
//! every asynchronous completion carries the epoch it was started in;
//! `cancel` bumps the epoch, so stale completions are discarded instead
//! of resurrecting a cleared queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::audio::{AudioSink, SynthesizedAudio};
use crate::{Error, Result};

use super::{
    QueueUpdateHandler, SpeechErrorHandler, SpeechObservers, SpeechOptions, SpeechService,
    SpeechState, SpeechStateHandler, SynthesisClient,
};

/// How many queued utterances are synthesized ahead of playback
const LOOKAHEAD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting its turn for synthesis
    Standby,
    /// Synthesis in flight
    Requested,
    /// Audio ready, eligible for promotion at the head
    Resolved,
    /// Synthesis failed; reported and removed at the head
    Rejected,
    Cancelled,
}

struct QueueRecord {
    id: u64,
    text: String,
    options: SpeechOptions,
    state: RequestState,
    audio: Option<SynthesizedAudio>,
    error: Option<Error>,
}

struct QueueInner {
    pending: VecDeque<QueueRecord>,
    current: Option<(u64, String)>,
    state: SpeechState,
    /// Bumped by `cancel`; completions from older epochs are stale
    epoch: u64,
    /// Id of the utterance whose sink play has not finished yet
    ///
    /// Unlike `current`, a cancel does not clear this: promotion defers
    /// until the interrupted play's completion lands, so at most one
    /// utterance is ever sounding even across a cancel.
    active_play: Option<u64>,
    next_id: u64,
}

impl QueueInner {
    fn snapshot(&self) -> (Vec<String>, Option<String>) {
        let pending = self.pending.iter().map(|r| r.text.clone()).collect();
        let current = self.current.as_ref().map(|(_, text)| text.clone());
        (pending, current)
    }
}

enum SchedulerEvent {
    QueueChanged,
    RequestSettled {
        id: u64,
        epoch: u64,
        result: Result<SynthesizedAudio>,
    },
    PlaybackFinished {
        id: u64,
        epoch: u64,
        result: Result<()>,
    },
}

/// Ordered speech output over a synthesis backend and an audio sink
pub struct SpeechQueue {
    inner: Arc<Mutex<QueueInner>>,
    observers: Arc<SpeechObservers>,
    sink: Arc<dyn AudioSink>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl SpeechQueue {
    /// Create the queue and spawn its work loop; requires a tokio runtime
    #[must_use]
    pub fn new(client: Arc<dyn SynthesisClient>, sink: Arc<dyn AudioSink>) -> Self {
        let inner = Arc::new(Mutex::new(QueueInner {
            pending: VecDeque::new(),
            current: None,
            state: SpeechState::Idle,
            epoch: 0,
            active_play: None,
            next_id: 0,
        }));
        let observers = Arc::new(SpeechObservers::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            inner: Arc::clone(&inner),
            observers: Arc::clone(&observers),
            sink: Arc::clone(&sink),
            client,
            events: tx.clone(),
        };
        tokio::spawn(worker.run(rx));

        Self {
            inner,
            observers,
            sink,
            events: tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("queue lock poisoned")
    }

    fn set_state(&self, new: SpeechState) {
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state;
            inner.state = new;
            previous
        };
        if previous != new {
            self.observers.emit_state(new, previous);
        }
    }

    fn push(&self, text: &str, options: Option<SpeechOptions>, reason: &str) {
        let (pending, current) = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.pending.push_back(QueueRecord {
                id,
                text: text.to_string(),
                options: options.unwrap_or_default(),
                state: RequestState::Standby,
                audio: None,
                error: None,
            });
            inner.snapshot()
        };

        self.observers.emit_queue(&pending, current.as_deref(), reason);
        let _ = self.events.send(SchedulerEvent::QueueChanged);
    }

    /// Clear the queue and stop playback synchronously
    ///
    /// After the lock is released here, no completion started before the
    /// cancel can surface: they all carry the old epoch.
    fn cancel_with_reason(&self, reason: &str) {
        let (previous, had_anything) = {
            let mut inner = self.lock();
            inner.epoch += 1;
            let had_anything = !inner.pending.is_empty() || inner.current.is_some();
            for record in &mut inner.pending {
                record.state = RequestState::Cancelled;
            }
            inner.pending.clear();
            inner.current = None;
            let previous = inner.state;
            inner.state = SpeechState::Idle;
            (previous, had_anything)
        };

        self.sink.stop();

        if previous != SpeechState::Idle {
            self.observers.emit_state(SpeechState::Idle, previous);
        }
        if had_anything {
            tracing::debug!(reason, "speech queue cancelled");
            self.observers.emit_queue(&[], None, reason);
        }
    }
}

impl SpeechService for SpeechQueue {
    fn enqueue_speech(&self, text: &str, options: Option<SpeechOptions>) {
        self.push(text, options, "speech added");
    }

    fn speak_directly(&self, text: &str, options: Option<SpeechOptions>) {
        self.cancel_with_reason("all speech cancelled");
        self.push(text, options, "directly");
    }

    fn pause(&self) {
        let speaking = self.lock().state == SpeechState::Speaking;
        if speaking {
            self.sink.pause();
            self.set_state(SpeechState::Paused);
        }
    }

    fn resume(&self) {
        let paused = self.lock().state == SpeechState::Paused;
        if paused {
            self.sink.resume();
            self.set_state(SpeechState::Speaking);
            // Playback may have finished while paused; let the work loop
            // promote or wind down.
            let _ = self.events.send(SchedulerEvent::QueueChanged);
        }
    }

    fn cancel(&self) {
        self.cancel_with_reason("all speech cancelled");
    }

    fn pending_speech(&self) -> Vec<String> {
        self.lock().pending.iter().map(|r| r.text.clone()).collect()
    }

    fn current_speech(&self) -> Option<String> {
        self.lock().current.as_ref().map(|(_, text)| text.clone())
    }

    fn speech_state(&self) -> SpeechState {
        self.lock().state
    }

    fn on_speech_state_changed(&self, handler: Option<SpeechStateHandler>) {
        self.observers.state.set(handler.map(Arc::from));
    }

    fn on_speech_queue_updated(&self, handler: Option<QueueUpdateHandler>) {
        self.observers.queue.set(handler.map(Arc::from));
    }

    fn on_error(&self, handler: Option<SpeechErrorHandler>) {
        self.observers.error.set(handler.map(Arc::from));
    }
}

/// The work-loop half of the queue
struct Worker {
    inner: Arc<Mutex<QueueInner>>,
    observers: Arc<SpeechObservers>,
    sink: Arc<dyn AudioSink>,
    client: Arc<dyn SynthesisClient>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

/// What the promotion scan decided to do, computed under the lock and
/// acted on outside it
enum Promotion {
    Play {
        id: u64,
        epoch: u64,
        audio: SynthesizedAudio,
        pending: Vec<String>,
        current: String,
        previous_state: SpeechState,
    },
    Report {
        error: Error,
        pending: Vec<String>,
        current: Option<String>,
    },
    BecameIdle {
        previous_state: SpeechState,
    },
    Wait,
}

impl Worker {
    async fn run(self, mut events: mpsc::UnboundedReceiver<SchedulerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SchedulerEvent::QueueChanged => {}
                SchedulerEvent::RequestSettled { id, epoch, result } => {
                    self.settle(id, epoch, result);
                }
                SchedulerEvent::PlaybackFinished { id, epoch, result } => {
                    self.playback_finished(id, epoch, result);
                }
            }
            self.request_lookahead();
            self.promote();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("queue lock poisoned")
    }

    fn settle(&self, id: u64, epoch: u64, result: Result<SynthesizedAudio>) {
        let mut inner = self.lock();
        if epoch != inner.epoch {
            tracing::debug!(id, "discarding stale synthesis completion");
            return;
        }
        let Some(record) = inner.pending.iter_mut().find(|r| r.id == id) else {
            return;
        };
        if record.state != RequestState::Requested {
            return;
        }
        match result {
            Ok(audio) => {
                record.state = RequestState::Resolved;
                record.audio = Some(audio);
            }
            Err(error) => {
                record.state = RequestState::Rejected;
                record.error = Some(error);
            }
        }
    }

    fn playback_finished(&self, id: u64, epoch: u64, result: Result<()>) {
        let cleared = {
            let mut inner = self.lock();
            // The play is over regardless of epoch; clear it first or a
            // cancel would leave promotion deferring forever.
            if inner.active_play == Some(id) {
                inner.active_play = None;
            }
            if epoch != inner.epoch {
                tracing::debug!(id, "discarding stale playback completion");
                return;
            }
            match inner.current {
                Some((current_id, _)) if current_id == id => {
                    inner.current = None;
                    true
                }
                _ => false,
            }
        };

        if cleared && let Err(error) = result {
            self.transition(SpeechState::Error);
            self.observers.emit_error(&error);
        }
    }

    fn request_lookahead(&self) {
        let mut to_request = Vec::new();
        {
            let mut inner = self.lock();
            let epoch = inner.epoch;
            for record in inner.pending.iter_mut().take(LOOKAHEAD) {
                if record.state == RequestState::Standby {
                    record.state = RequestState::Requested;
                    to_request.push((record.id, epoch, record.text.clone(), record.options.clone()));
                }
            }
        }

        for (id, epoch, text, options) in to_request {
            let client = Arc::clone(&self.client);
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = client.synthesize(&text, &options).await;
                let _ = events.send(SchedulerEvent::RequestSettled { id, epoch, result });
            });
        }
    }

    /// Drain the head of the queue until something plays or nothing can
    fn promote(&self) {
        loop {
            let action = {
                let mut inner = self.lock();
                if inner.current.is_some()
                    || inner.active_play.is_some()
                    || inner.state == SpeechState::Paused
                {
                    Promotion::Wait
                } else {
                    match inner.pending.front().map(|r| r.state) {
                        None => {
                            if inner.state == SpeechState::Idle {
                                Promotion::Wait
                            } else {
                                let previous_state = inner.state;
                                inner.state = SpeechState::Idle;
                                Promotion::BecameIdle { previous_state }
                            }
                        }
                        Some(RequestState::Standby | RequestState::Requested) => Promotion::Wait,
                        Some(
                            RequestState::Cancelled
                            | RequestState::Rejected
                            | RequestState::Resolved,
                        ) => {
                            let Some(record) = inner.pending.pop_front() else {
                                continue;
                            };
                            match (record.state, record.audio) {
                                (RequestState::Cancelled, _) => {
                                    tracing::debug!(id = record.id, "removing cancelled record");
                                    continue;
                                }
                                (RequestState::Resolved, Some(audio)) => {
                                    inner.current = Some((record.id, record.text.clone()));
                                    inner.active_play = Some(record.id);
                                    let previous_state = inner.state;
                                    inner.state = SpeechState::Speaking;
                                    let (pending, _) = inner.snapshot();
                                    Promotion::Play {
                                        id: record.id,
                                        epoch: inner.epoch,
                                        audio,
                                        pending,
                                        current: record.text,
                                        previous_state,
                                    }
                                }
                                (_, _) => {
                                    let (pending, current) = inner.snapshot();
                                    Promotion::Report {
                                        error: record.error.unwrap_or_else(|| {
                                            Error::Tts("synthesis failed".to_string())
                                        }),
                                        pending,
                                        current,
                                    }
                                }
                            }
                        }
                    }
                }
            };

            match action {
                Promotion::Wait => return,
                Promotion::BecameIdle { previous_state } => {
                    self.observers.emit_state(SpeechState::Idle, previous_state);
                    self.observers.emit_queue(&[], None, "last speech ended");
                    return;
                }
                Promotion::Report {
                    error,
                    pending,
                    current,
                } => {
                    // A failed utterance never stalls the queue: report it
                    // and keep draining.
                    tracing::warn!(error = %error, "dropping utterance that failed synthesis");
                    self.observers.emit_error(&error);
                    self.observers
                        .emit_queue(&pending, current.as_deref(), "speech rejected");
                }
                Promotion::Play {
                    id,
                    epoch,
                    audio,
                    pending,
                    current,
                    previous_state,
                } => {
                    if previous_state != SpeechState::Speaking {
                        self.observers
                            .emit_state(SpeechState::Speaking, previous_state);
                    }
                    self.observers
                        .emit_queue(&pending, Some(&current), "speech plucked");

                    let sink = Arc::clone(&self.sink);
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        let result = sink.play(audio).await;
                        let _ = events.send(SchedulerEvent::PlaybackFinished { id, epoch, result });
                    });
                    return;
                }
            }
        }
    }

    fn transition(&self, new: SpeechState) {
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state;
            inner.state = new;
            previous
        };
        if previous != new {
            self.observers.emit_state(new, previous);
        }
    }
}

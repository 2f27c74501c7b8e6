//! Scripted recognition for development and tests
//!
//! Emits a fixed manuscript on a timer instead of touching the
//! microphone: for each line, half the text as interim, the full line as
//! final, then a VAD idle transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::Result;

use super::{
    ErrorHandler, ListenOptions, ListeningState, ListeningStateHandler, RecognitionObservers,
    RecognitionService, TextHandler, VadOverride, VadState, VadStateHandler,
};

const DEFAULT_MANUSCRIPT: [&str; 4] = [
    "Hello!",
    "How are you doing today?",
    "Tell me something interesting.",
    "Thanks, that's all for now.",
];

pub struct MockRecognition {
    manuscript: Vec<String>,
    interval: Duration,
    observers: Arc<RecognitionObservers>,
    state: Arc<Mutex<MockState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct MockState {
    listening: ListeningState,
    vad: VadState,
    vad_override: VadOverride,
}

impl Default for MockRecognition {
    fn default() -> Self {
        Self::new(
            DEFAULT_MANUSCRIPT.iter().map(ToString::to_string).collect(),
            Duration::from_secs(3),
        )
    }
}

impl MockRecognition {
    #[must_use]
    pub fn new(manuscript: Vec<String>, interval: Duration) -> Self {
        Self {
            manuscript,
            interval,
            observers: Arc::new(RecognitionObservers::new()),
            state: Arc::new(Mutex::new(MockState {
                listening: ListeningState::Inactive,
                vad: VadState::Idle,
                vad_override: VadOverride::Unset,
            })),
            task: Mutex::new(None),
        }
    }

    fn set_vad(state: &Mutex<MockState>, observers: &RecognitionObservers, vad: VadState) {
        let changed = {
            let mut guard = state.lock().expect("state lock poisoned");
            if guard.vad_override != VadOverride::Unset {
                return;
            }
            let changed = guard.vad != vad;
            guard.vad = vad;
            changed
        };
        if changed {
            observers.emit_vad(vad);
        }
    }
}

#[async_trait]
impl RecognitionService for MockRecognition {
    async fn start_listening(&self, _options: Option<ListenOptions>) -> Result<()> {
        let mut task = self.task.lock().expect("task lock poisoned");
        if task.is_some() {
            return Ok(());
        }

        let manuscript = self.manuscript.clone();
        let interval = self.interval;
        let observers = Arc::clone(&self.observers);
        let state = Arc::clone(&self.state);

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate; skip it

            for line in manuscript.iter().cycle() {
                ticker.tick().await;
                Self::set_vad(&state, &observers, VadState::Speaking);
                let half: String = line.chars().take(line.chars().count() / 2).collect();
                observers.emit_interim(&half);
                observers.emit_text(line);
                Self::set_vad(&state, &observers, VadState::Idle);
            }
        }));
        drop(task);

        self.state.lock().expect("state lock poisoned").listening = ListeningState::Listening;
        self.observers.emit_listening(ListeningState::Listening);
        tracing::debug!("mock recognition started");
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        if let Some(task) = self.task.lock().expect("task lock poisoned").take() {
            task.abort();
        }

        self.state.lock().expect("state lock poisoned").listening = ListeningState::Inactive;
        self.observers.emit_listening(ListeningState::Inactive);
        Self::set_vad(&self.state, &self.observers, VadState::Idle);
        Ok(())
    }

    fn listening_state(&self) -> ListeningState {
        self.state.lock().expect("state lock poisoned").listening
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
        self.state.lock().expect("state lock poisoned").vad
    }

    fn on_vad_state_changed(&self, handler: Option<VadStateHandler>) {
        self.observers.vad.set(handler.map(Arc::from));
    }

    fn set_vad_override(&self, state: VadOverride) {
        self.state.lock().expect("state lock poisoned").vad_override = state;
        match state {
            VadOverride::Speaking => {
                let changed = {
                    let mut guard = self.state.lock().expect("state lock poisoned");
                    let changed = guard.vad != VadState::Speaking;
                    guard.vad = VadState::Speaking;
                    changed
                };
                if changed {
                    self.observers.emit_vad(VadState::Speaking);
                }
            }
            VadOverride::Idle => {
                let changed = {
                    let mut guard = self.state.lock().expect("state lock poisoned");
                    let changed = guard.vad != VadState::Idle;
                    guard.vad = VadState::Idle;
                    changed
                };
                if changed {
                    self.observers.emit_vad(VadState::Idle);
                }
            }
            VadOverride::Unset => {}
        }
    }
}

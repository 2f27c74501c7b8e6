//! Shared test utilities
//!
//! Scripted stand-ins for the audio environment: a VAD source that replays
//! a prepared event sequence, a transcription client that answers from a
//! script, synthesis with per-utterance latency, and a sink that records
//! playback order without touching audio hardware.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxbridge::audio::{AudioSink, SynthesizedAudio};
use voxbridge::recognition::vad::{VadEvent, VadSource};
use voxbridge::recognition::{FlushedSegment, TranscriptEvent, TranscriptionClient};
use voxbridge::speech::SynthesisClient;
use voxbridge::{Error, Result, SpeechOptions};

pub const FRAME: usize = 512;

/// One frame of constant-valued samples
#[must_use]
pub fn frame(value: f32) -> Vec<f32> {
    vec![value; FRAME]
}

/// A one-utterance event sequence: start, `secs` of audio, end
#[must_use]
pub fn utterance(secs: f32, value: f32) -> Vec<VadEvent> {
    let frames = (secs * 16000.0 / FRAME as f32).ceil() as usize;
    let mut events = vec![VadEvent::SpeechStart];
    for _ in 0..frames {
        events.push(VadEvent::Frame {
            probability: 0.9,
            samples: frame(value),
        });
    }
    events.push(VadEvent::SpeechEnd {
        samples: Vec::new(),
    });
    events
}

/// Replays a prepared event sequence, then closes the stream
pub struct ScriptedVad {
    events: Vec<VadEvent>,
    pub started: Arc<AtomicBool>,
    pub stopped: Arc<AtomicBool>,
}

impl ScriptedVad {
    #[must_use]
    pub fn new(events: Vec<VadEvent>) -> Self {
        Self {
            events,
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl VadSource for ScriptedVad {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<VadEvent>> {
        self.started.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.events.drain(..) {
            let _ = tx.send(event);
        }
        // Sender drops here: the receiver yields every event, then closes.
        Ok(rx)
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Transcription client that records segments and answers from a counter
pub struct RecordingClient {
    /// Sample counts of every segment received, in order
    pub segments: Arc<Mutex<Vec<usize>>>,
    pub calls: AtomicUsize,
    /// Extra latency per call, longest first exercises ordering
    pub delays: Vec<Duration>,
    /// Call indices (0-based) that fail instead of transcribing
    pub fail_on: Vec<usize>,
}

impl RecordingClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: Arc::new(Mutex::new(Vec::new())),
            calls: AtomicUsize::new(0),
            delays: Vec::new(),
            fail_on: Vec::new(),
        }
    }
}

#[async_trait]
impl TranscriptionClient for RecordingClient {
    async fn transcribe(
        &self,
        segment: FlushedSegment,
        _language: Option<&str>,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(call) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_on.contains(&call) {
            return Err(Error::Stt("scripted transcription failure".to_string()));
        }

        self.segments.lock().unwrap().push(segment.samples.len());
        let _ = events.send(TranscriptEvent::Interim(format!("partial-{call}")));
        let _ = events.send(TranscriptEvent::Final(format!("final-{call}")));
        Ok(())
    }
}

/// Synthesis with per-utterance latency and scripted failures
#[derive(Default)]
pub struct ScriptedSynthesizer {
    pub delays: HashMap<String, Duration>,
    pub fail: Vec<String>,
}

#[async_trait]
impl SynthesisClient for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _options: &SpeechOptions) -> Result<SynthesizedAudio> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail.iter().any(|t| t == text) {
            return Err(Error::Tts(format!("scripted synthesis failure: {text}")));
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            format: voxbridge::AudioFormat::Wav,
        })
    }
}

/// Sink that records playback order and checks for overlapping plays
pub struct RecordingSink {
    pub played: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    /// Stop token of the play in progress, one per play like the real sinks
    current_stop: Mutex<Option<Arc<AtomicBool>>>,
    play_duration: Duration,
}

impl RecordingSink {
    #[must_use]
    pub fn new(play_duration: Duration) -> Self {
        Self {
            played: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            current_stop: Mutex::new(None),
            play_duration,
        }
    }

    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: SynthesizedAudio) -> Result<()> {
        let stopped = Arc::new(AtomicBool::new(false));
        *self.current_stop.lock().unwrap() = Some(Arc::clone(&stopped));
        let text = String::from_utf8_lossy(&audio.bytes).to_string();
        self.played.lock().unwrap().push(text);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let tick = Duration::from_millis(1);
        let mut elapsed = Duration::ZERO;
        while elapsed < self.play_duration && !stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(tick).await;
            elapsed += tick;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn stop(&self) {
        if let Some(stopped) = self.current_stop.lock().unwrap().take() {
            stopped.store(true, Ordering::SeqCst);
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses; panics on timeout
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! Playback sinks for synthesized speech
//!
//! The scheduler in `speech::queue` drives exactly one sink play at a time;
//! sinks only need to handle a single utterance plus pause/stop flags.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::Notify;

use crate::{Error, Result};

use super::{AudioFormat, SynthesizedAudio, decode_mp3, decode_wav};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays one synthesized utterance at a time
///
/// `play` resolves when the utterance finishes or the sink is stopped.
/// `pause`/`resume`/`stop` act on the currently playing utterance only:
/// `stop` targets the play in progress when it is called, and a play
/// started afterwards is unaffected by that earlier stop.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play an utterance to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or the output device fails
    async fn play(&self, audio: SynthesizedAudio) -> Result<()>;

    /// Pause the currently playing utterance
    fn pause(&self);

    /// Resume a paused utterance
    fn resume(&self);

    /// Stop the currently playing utterance; its `play` call resolves
    fn stop(&self);
}

/// Plays audio on the default cpal output device
pub struct CpalSink {
    paused: Arc<AtomicBool>,
    /// Stop token of the play in progress; each `play` installs its own,
    /// so a stop can never leak into a later utterance
    current_stop: Mutex<Option<Arc<AtomicBool>>>,
}

impl CpalSink {
    /// Create a new playback sink
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        host.default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        Ok(Self {
            paused: Arc::new(AtomicBool::new(false)),
            current_stop: Mutex::new(None),
        })
    }

    fn play_blocking(
        samples: Vec<f32>,
        paused: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let sample_count = samples.len();
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);
        let cb_paused = Arc::clone(&paused);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = if cb_paused.load(Ordering::Relaxed) {
                            0.0
                        } else {
                            let pos = cb_position.load(Ordering::Relaxed);
                            if pos < sample_count {
                                cb_position.store(pos + 1, Ordering::Relaxed);
                                samples[pos]
                            } else {
                                cb_finished.store(true, Ordering::Relaxed);
                                0.0
                            }
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        while !finished.load(Ordering::Relaxed) && !stopped.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(20));
        }

        drop(stream);
        tracing::debug!(
            samples = sample_count,
            stopped = stopped.load(Ordering::Relaxed),
            "playback finished"
        );

        Ok(())
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: SynthesizedAudio) -> Result<()> {
        let samples = match audio.format {
            AudioFormat::Mp3 => decode_mp3(&audio.bytes)?,
            AudioFormat::Wav => decode_wav(&audio.bytes)?,
        };

        let stopped = Arc::new(AtomicBool::new(false));
        *self.current_stop.lock().expect("sink lock poisoned") = Some(Arc::clone(&stopped));
        self.paused.store(false, Ordering::Relaxed);

        let paused = Arc::clone(&self.paused);

        tokio::task::spawn_blocking(move || Self::play_blocking(samples, paused, stopped))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn stop(&self) {
        if let Some(stopped) = self.current_stop.lock().expect("sink lock poisoned").take() {
            stopped.store(true, Ordering::Relaxed);
        }
    }
}

/// Device-free sink that "plays" for a duration proportional to byte length
///
/// Used by the mock speech wiring and in tests so the scheduler can be
/// exercised without audio hardware.
pub struct TimedSink {
    micros_per_byte: u64,
    paused: AtomicBool,
    /// Stop token of the play in progress; each `play` installs its own
    current_stop: Mutex<Option<Arc<AtomicBool>>>,
    notify: Notify,
}

impl TimedSink {
    #[must_use]
    pub fn new(micros_per_byte: u64) -> Self {
        Self {
            micros_per_byte,
            paused: AtomicBool::new(false),
            current_stop: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl AudioSink for TimedSink {
    async fn play(&self, audio: SynthesizedAudio) -> Result<()> {
        let stopped = Arc::new(AtomicBool::new(false));
        *self.current_stop.lock().expect("sink lock poisoned") = Some(Arc::clone(&stopped));
        self.paused.store(false, Ordering::Relaxed);

        let total = Duration::from_micros(audio.bytes.len() as u64 * self.micros_per_byte);
        let tick = Duration::from_millis(1);
        let mut elapsed = Duration::ZERO;

        while elapsed < total {
            if stopped.load(Ordering::Relaxed) {
                return Ok(());
            }
            let sleep = tokio::time::sleep(tick);
            tokio::select! {
                () = sleep => {
                    if !self.paused.load(Ordering::Relaxed) {
                        elapsed += tick;
                    }
                }
                () = self.notify.notified() => {}
            }
        }

        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn stop(&self) {
        if let Some(stopped) = self.current_stop.lock().expect("sink lock poisoned").take() {
            stopped.store(true, Ordering::Relaxed);
        }
        self.notify.notify_waiters();
    }
}

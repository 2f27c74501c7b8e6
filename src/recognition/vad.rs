//! Voice activity detection event sources
//!
//! Recognition adapters consume a [`VadSource`] — a stream of frame /
//! speech-start / speech-end events. Model-based detectors (silero etc.)
//! are external; this module defines the event contract and ships
//! [`EnergyVad`], an RMS-energy source over the default microphone with
//! redemption-frame hysteresis, good enough for quiet rooms and for
//! exercising the pipeline without model downloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::Result;
use crate::audio::AudioCapture;

/// One event from a VAD detector
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// A processed audio frame with its speech probability
    Frame { probability: f32, samples: Vec<f32> },
    /// A candidate utterance began
    SpeechStart,
    /// The utterance ended; carries the detector's assembled audio
    SpeechEnd { samples: Vec<f32> },
}

/// A running or startable VAD event stream
///
/// `stop` must tear the stream down so the receiver closes; adapters rely
/// on channel closure to finish their event loops.
pub trait VadSource: Send {
    /// Start detection and return the event stream
    ///
    /// # Errors
    ///
    /// Returns error if the audio environment is unavailable
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<VadEvent>>;

    /// Stop detection and close the event stream
    fn stop(&mut self);
}

/// Energy VAD tuning
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,
    /// Consecutive speech frames before `SpeechStart` fires
    pub start_frames: usize,
    /// Consecutive silent frames before `SpeechEnd` fires
    pub redemption_frames: usize,
    /// How often captured audio is drained into frames
    pub poll_interval: Duration,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            start_frames: 2,
            redemption_frames: 10,
            poll_interval: Duration::from_millis(30),
        }
    }
}

/// RMS-energy voice activity detection over the default input device
pub struct EnergyVad {
    config: EnergyVadConfig,
    running: Arc<AtomicBool>,
}

impl EnergyVad {
    #[must_use]
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl VadSource for EnergyVad {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<VadEvent>> {
        // Validate the audio environment up front; the real capture is
        // built on the polling thread because a cpal stream cannot cross
        // threads.
        drop(AudioCapture::new()?);

        self.running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            let mut capture = match AudioCapture::new() {
                Ok(capture) => capture,
                Err(error) => {
                    tracing::error!(%error, "energy VAD capture init failed");
                    return;
                }
            };
            if let Err(error) = capture.start() {
                tracing::error!(%error, "energy VAD capture start failed");
                return;
            }

            let mut detector = FrameDetector::new(&config);
            'poll: while running.load(Ordering::Relaxed) {
                for frame in capture.take_frames() {
                    for event in detector.on_frame(frame) {
                        if tx.send(event).is_err() {
                            break 'poll;
                        }
                    }
                }
                std::thread::sleep(config.poll_interval);
            }
            capture.stop();
            tracing::debug!("energy VAD stopped");
        });

        Ok(rx)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Per-frame detection state shared by `EnergyVad` and its tests
struct FrameDetector {
    energy_threshold: f32,
    start_frames: usize,
    redemption_frames: usize,
    speech_run: usize,
    silence_run: usize,
    in_speech: bool,
    utterance: Vec<f32>,
}

impl FrameDetector {
    fn new(config: &EnergyVadConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            start_frames: config.start_frames,
            redemption_frames: config.redemption_frames,
            speech_run: 0,
            silence_run: 0,
            in_speech: false,
            utterance: Vec::new(),
        }
    }

    fn on_frame(&mut self, samples: Vec<f32>) -> Vec<VadEvent> {
        let probability = rms_energy(&samples).min(1.0);
        let is_speech = probability > self.energy_threshold;
        let mut events = Vec::with_capacity(2);

        if self.in_speech {
            self.utterance.extend_from_slice(&samples);
        }

        events.push(VadEvent::Frame {
            probability,
            samples,
        });

        if is_speech {
            self.speech_run += 1;
            self.silence_run = 0;
            if !self.in_speech && self.speech_run >= self.start_frames {
                self.in_speech = true;
                self.utterance.clear();
                events.push(VadEvent::SpeechStart);
            }
        } else {
            self.silence_run += 1;
            self.speech_run = 0;
            if self.in_speech && self.silence_run >= self.redemption_frames {
                self.in_speech = false;
                events.push(VadEvent::SpeechEnd {
                    samples: std::mem::take(&mut self.utterance),
                });
            }
        }

        events
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> Vec<f32> {
        vec![0.5; 512]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; 512]
    }

    #[test]
    fn energy_of_silence_is_near_zero() {
        assert!(rms_energy(&quiet()) < 0.001);
        assert!(rms_energy(&loud()) > 0.4);
    }

    #[test]
    fn start_fires_after_consecutive_speech_frames() {
        let mut det = FrameDetector::new(&EnergyVadConfig::default());

        let first = det.on_frame(loud());
        assert!(matches!(first.as_slice(), [VadEvent::Frame { .. }]));

        let second = det.on_frame(loud());
        assert!(
            second
                .iter()
                .any(|e| matches!(e, VadEvent::SpeechStart))
        );
    }

    #[test]
    fn end_fires_after_redemption_frames() {
        let config = EnergyVadConfig {
            redemption_frames: 3,
            ..EnergyVadConfig::default()
        };
        let mut det = FrameDetector::new(&config);

        det.on_frame(loud());
        det.on_frame(loud());
        det.on_frame(loud());

        det.on_frame(quiet());
        det.on_frame(quiet());
        let events = det.on_frame(quiet());
        let end = events
            .iter()
            .find(|e| matches!(e, VadEvent::SpeechEnd { .. }))
            .expect("speech end");

        if let VadEvent::SpeechEnd { samples } = end {
            // Utterance covers the speech frames after the start plus the
            // redemption tail.
            assert!(!samples.is_empty());
        }
    }

    #[test]
    fn single_noisy_frame_does_not_trigger() {
        let mut det = FrameDetector::new(&EnergyVadConfig::default());

        det.on_frame(loud());
        let events = det.on_frame(quiet());
        assert!(
            events
                .iter()
                .all(|e| matches!(e, VadEvent::Frame { .. }))
        );
    }
}

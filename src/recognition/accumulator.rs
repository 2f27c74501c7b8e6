//! Incremental audio accumulation and flush policy
//!
//! Converts VAD frame/start/end events into correctly-sized audio segments
//! for a transcription backend. Two competing goals: don't ship sub-second
//! clips (a wasted round-trip, and ASR models do poorly on them), don't sit
//! on audio so long the user notices the latency.
//!
//! All durations are derived from sample counts, never wall-clock time, so
//! the policy is deterministic under test.

use std::collections::VecDeque;

/// Flush policy configuration
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Sample rate of incoming frames
    pub sample_rate: u32,
    /// Only flush on speech-end once this much audio is buffered
    pub min_chunk_sec: f32,
    /// After a premature speech-end, force a flush once this much further
    /// audio accumulates without the segment being merged
    pub small_chunk_grace_sec: f32,
    /// Force a flush mid-segment at this duration, VAD pause or not
    pub max_chunk_sec: Option<f32>,
    /// Pre-speech lookback ring capacity, in frames
    pub lookback_frames: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::audio::SAMPLE_RATE,
            min_chunk_sec: 3.0,
            small_chunk_grace_sec: 1.2,
            max_chunk_sec: Some(7.0),
            lookback_frames: 8,
        }
    }
}

/// Where the accumulator is in the life of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No segment; frames feed the pre-speech lookback ring
    Idle,
    /// Speech in progress; frames append to the active buffer
    Accumulating,
    /// Speech-end arrived under `min_chunk_sec`; still appending, waiting
    /// for either more speech or the grace window
    HoldingPremature,
}

/// Why a segment was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// VAD speech-end with enough buffered audio
    SpeechEnd,
    /// Grace window elapsed after a premature speech-end
    GraceElapsed,
    /// Buffer hit `max_chunk_sec` while still accumulating
    MaxDuration,
    /// Session stop; whatever remained was flushed unconditionally
    Stopped,
}

/// One flushed audio segment, ready for transcription
#[derive(Debug, Clone)]
pub struct FlushedSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub reason: FlushReason,
}

impl FlushedSegment {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// The flush-policy state machine
///
/// Exclusively owns the active buffer; a flush takes the buffer by value
/// and starts a fresh one, so a segment handed to the transcription client
/// is never aliased by further accumulation.
pub struct AudioAccumulator {
    config: AccumulatorConfig,
    state: SegmentState,
    buffer: Vec<f32>,
    lookback: VecDeque<Vec<f32>>,
    /// Buffer length at the moment of a premature speech-end
    premature_mark: Option<usize>,
}

impl AudioAccumulator {
    #[must_use]
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            config,
            state: SegmentState::Idle,
            buffer: Vec::new(),
            lookback: VecDeque::new(),
            premature_mark: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn buffered_secs(&self) -> f32 {
        self.buffer.len() as f32 / self.config.sample_rate as f32
    }

    /// Feed one fixed-size audio frame
    ///
    /// While idle the frame lands in the lookback ring; during a segment it
    /// appends to the active buffer. Returns a segment when the grace
    /// window or the max-duration cap forces a flush.
    pub fn on_frame(&mut self, frame: &[f32]) -> Option<FlushedSegment> {
        match self.state {
            SegmentState::Idle => {
                if self.config.lookback_frames > 0 {
                    if self.lookback.len() == self.config.lookback_frames {
                        self.lookback.pop_front();
                    }
                    self.lookback.push_back(frame.to_vec());
                }
                None
            }
            SegmentState::Accumulating => {
                self.buffer.extend_from_slice(frame);
                if self.max_reached() {
                    return Some(self.flush(FlushReason::MaxDuration));
                }
                None
            }
            SegmentState::HoldingPremature => {
                self.buffer.extend_from_slice(frame);
                let mark = self.premature_mark.unwrap_or(0);
                let grace_samples = self.secs_to_samples(self.config.small_chunk_grace_sec);
                if self.buffer.len() - mark >= grace_samples {
                    return Some(self.flush(FlushReason::GraceElapsed));
                }
                if self.max_reached() {
                    return Some(self.flush(FlushReason::MaxDuration));
                }
                None
            }
        }
    }

    /// A candidate utterance begins
    ///
    /// Out of `Idle` this drains the lookback ring into the fresh buffer so
    /// word onsets aren't clipped. Out of `HoldingPremature` it merges: the
    /// held buffer is kept and the premature mark cleared. The ring is
    /// empty during a segment, so a merge can never prepend lead-in audio
    /// twice.
    pub fn on_speech_start(&mut self) {
        match self.state {
            SegmentState::Idle => {
                for frame in self.lookback.drain(..) {
                    self.buffer.extend_from_slice(&frame);
                }
                self.state = SegmentState::Accumulating;
                tracing::trace!(lead_in = self.buffer.len(), "segment started");
            }
            SegmentState::HoldingPremature => {
                self.premature_mark = None;
                self.state = SegmentState::Accumulating;
                tracing::trace!(buffered = self.buffer.len(), "premature segment merged");
            }
            SegmentState::Accumulating => {}
        }
    }

    /// VAD detected the end of the utterance
    ///
    /// Flushes if the buffer has reached `min_chunk_sec`; otherwise marks
    /// the segment premature and keeps accumulating in case the detector
    /// mis-fired.
    pub fn on_speech_end(&mut self) -> Option<FlushedSegment> {
        match self.state {
            SegmentState::Accumulating => {
                if self.buffer.is_empty() {
                    self.state = SegmentState::Idle;
                    return None;
                }
                let min_samples = self.secs_to_samples(self.config.min_chunk_sec);
                if self.buffer.len() >= min_samples {
                    Some(self.flush(FlushReason::SpeechEnd))
                } else {
                    tracing::debug!(
                        buffered_secs = self.buffered_secs(),
                        min_chunk_sec = self.config.min_chunk_sec,
                        "segment under minimum, holding"
                    );
                    self.premature_mark = Some(self.buffer.len());
                    self.state = SegmentState::HoldingPremature;
                    None
                }
            }
            // Repeated speech-end while holding keeps the original mark so
            // the grace window counts from the first premature end.
            SegmentState::HoldingPremature | SegmentState::Idle => None,
        }
    }

    /// Flush whatever is buffered, regardless of duration (stop path)
    pub fn force_flush(&mut self) -> Option<FlushedSegment> {
        if self.buffer.is_empty() {
            self.lookback.clear();
            self.premature_mark = None;
            self.state = SegmentState::Idle;
            return None;
        }
        Some(self.flush(FlushReason::Stopped))
    }

    // Exactly one flush per segment: takes the buffer by value, clears the
    // ring whatever the trigger was, returns to Idle.
    fn flush(&mut self, reason: FlushReason) -> FlushedSegment {
        let samples = std::mem::take(&mut self.buffer);
        self.lookback.clear();
        self.premature_mark = None;
        self.state = SegmentState::Idle;

        let segment = FlushedSegment {
            samples,
            sample_rate: self.config.sample_rate,
            reason,
        };
        tracing::debug!(
            samples = segment.samples.len(),
            secs = segment.duration_secs(),
            reason = ?reason,
            "flushing segment"
        );
        segment
    }

    fn max_reached(&self) -> bool {
        self.config
            .max_chunk_sec
            .is_some_and(|max| self.buffer.len() >= self.secs_to_samples(max))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn secs_to_samples(&self, secs: f32) -> usize {
        (secs * self.config.sample_rate as f32) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;
    const FRAME: usize = 512;

    fn config() -> AccumulatorConfig {
        AccumulatorConfig {
            sample_rate: RATE,
            min_chunk_sec: 2.0,
            small_chunk_grace_sec: 1.0,
            max_chunk_sec: Some(5.0),
            lookback_frames: 4,
        }
    }

    fn frame(value: f32) -> Vec<f32> {
        vec![value; FRAME]
    }

    /// Feed `secs` worth of frames, returning the first flush if any
    fn feed_secs(acc: &mut AudioAccumulator, secs: f32, value: f32) -> Option<FlushedSegment> {
        let frames = (secs * RATE as f32 / FRAME as f32).ceil() as usize;
        for _ in 0..frames {
            if let Some(seg) = acc.on_frame(&frame(value)) {
                return Some(seg);
            }
        }
        None
    }

    #[test]
    fn long_utterance_flushes_on_speech_end() {
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();
        assert!(feed_secs(&mut acc, 3.0, 0.5).is_none());

        let seg = acc.on_speech_end().expect("flush on speech end");
        assert_eq!(seg.reason, FlushReason::SpeechEnd);
        assert!(seg.duration_secs() >= 2.0);
        assert_eq!(acc.state(), SegmentState::Idle);
        assert_eq!(acc.buffered_samples(), 0);
    }

    #[test]
    fn short_utterance_holds_then_grace_flushes() {
        // 1s utterance, min 2s, grace 1s => exactly one flush roughly one
        // second after speech-end.
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();
        assert!(feed_secs(&mut acc, 1.0, 0.5).is_none());

        assert!(acc.on_speech_end().is_none());
        assert_eq!(acc.state(), SegmentState::HoldingPremature);

        let utterance_samples = acc.buffered_samples();
        let seg = feed_secs(&mut acc, 1.5, 0.0).expect("grace flush");
        assert_eq!(seg.reason, FlushReason::GraceElapsed);
        // The held utterance audio is carried, not discarded.
        assert!(seg.samples.len() >= utterance_samples);
        assert!(seg.samples[..FRAME].iter().all(|&s| s == 0.5));
        assert_eq!(acc.state(), SegmentState::Idle);
    }

    #[test]
    fn premature_segment_merges_on_new_speech() {
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();
        feed_secs(&mut acc, 1.0, 0.5);
        assert!(acc.on_speech_end().is_none());

        // More speech arrives before the grace window: merge and keep going.
        feed_secs(&mut acc, 0.5, 0.0);
        acc.on_speech_start();
        assert_eq!(acc.state(), SegmentState::Accumulating);
        assert!(feed_secs(&mut acc, 1.0, 0.5).is_none());

        let seg = acc.on_speech_end().expect("merged segment over minimum");
        assert_eq!(seg.reason, FlushReason::SpeechEnd);
        assert!(seg.duration_secs() >= 2.0);
    }

    #[test]
    fn max_duration_flushes_without_speech_end() {
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();

        let seg = feed_secs(&mut acc, 6.0, 0.5).expect("max duration flush");
        assert_eq!(seg.reason, FlushReason::MaxDuration);
        assert!(seg.duration_secs() >= 5.0);
        assert_eq!(acc.state(), SegmentState::Idle);
    }

    #[test]
    fn lookback_ring_is_bounded_and_prepended_once() {
        let mut acc = AudioAccumulator::new(config());

        // More idle frames than the ring holds: oldest are evicted.
        for i in 0..10 {
            assert!(acc.on_frame(&frame(i as f32)).is_none());
        }

        acc.on_speech_start();
        // Ring capacity is 4, so lead-in is frames 6..10.
        assert_eq!(acc.buffered_samples(), 4 * FRAME);
        assert!(acc.buffer[..FRAME].iter().all(|&s| s == 6.0));

        feed_secs(&mut acc, 2.5, 0.5);
        let seg = acc.on_speech_end().expect("flush");
        assert!(seg.samples[..FRAME].iter().all(|&s| s == 6.0));
    }

    #[test]
    fn lookback_cannot_double_prepend_across_merge() {
        let mut acc = AudioAccumulator::new(config());
        for _ in 0..4 {
            acc.on_frame(&frame(9.0));
        }

        acc.on_speech_start();
        let lead_in = acc.buffered_samples();
        feed_secs(&mut acc, 1.0, 0.5);
        acc.on_speech_end();

        // Merge: no new lead-in may appear.
        acc.on_speech_start();
        let before = acc.buffered_samples();
        feed_secs(&mut acc, 2.0, 0.5);
        let seg = acc.on_speech_end().expect("flush");

        let lead_in_frames = seg.samples[..lead_in]
            .iter()
            .filter(|&&s| s == 9.0)
            .count();
        assert_eq!(lead_in_frames, lead_in);
        // Exactly one lead-in: total = lead_in + speech appended after it.
        assert!(seg.samples[lead_in..before].iter().all(|&s| s != 9.0));
    }

    #[test]
    fn force_flush_sends_remainder_unconditionally() {
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();
        feed_secs(&mut acc, 0.5, 0.5);

        let seg = acc.force_flush().expect("stop flush");
        assert_eq!(seg.reason, FlushReason::Stopped);
        assert!(seg.duration_secs() < 2.0);
        assert!(acc.force_flush().is_none());
    }

    #[test]
    fn flush_never_fires_twice_for_one_segment() {
        let mut acc = AudioAccumulator::new(config());
        acc.on_speech_start();
        feed_secs(&mut acc, 3.0, 0.5);

        assert!(acc.on_speech_end().is_some());
        assert!(acc.on_speech_end().is_none());
        assert!(acc.force_flush().is_none());
    }
}

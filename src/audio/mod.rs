//! Audio buffer plumbing shared by the recognition and speech adapters
//!
//! Everything in this crate speaks 16 kHz mono f32 on the capture side.
//! Synthesis backends return encoded bytes (MP3 or WAV) which the sink
//! decodes right before playback.

mod capture;
mod sink;

pub use capture::AudioCapture;
pub use sink::{AudioSink, CpalSink, TimedSink};

use std::io::Cursor;

use crate::{Error, Result};

/// Sample rate for audio capture and accumulation (16 kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Fixed frame size delivered by VAD sources (samples per frame)
pub const FRAME_SAMPLES: usize = 512;

/// Encoded audio returned by a synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

/// One synthesized utterance, ready for a sink to decode and play
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode MP3 bytes to f32 samples (stereo is averaged down to mono)
///
/// # Errors
///
/// Returns error if a frame fails to decode
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// Decode WAV bytes (16-bit PCM) to f32 samples
///
/// # Errors
///
/// Returns error if the WAV header or samples are malformed
pub fn decode_wav(wav_data: &[u8]) -> Result<Vec<f32>> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;

    reader
        .samples::<i16>()
        .map(|s| {
            s.map(|v| f32::from(v) / 32768.0)
                .map_err(|e| Error::Audio(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_roundtrip_preserves_length() {
        let original: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        let wav = samples_to_wav(&original, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.len(), original.len());
    }
}

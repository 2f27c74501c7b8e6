//! OpenAI-compatible transcription client
//!
//! Implements [`TranscriptionClient`] against the `audio/transcriptions`
//! and `audio/translations` endpoints. Segments are shipped as WAV; with
//! streaming enabled the transcription endpoint is consumed as SSE and
//! text deltas surface as interim events.

use futures::StreamExt;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::audio::samples_to_wav;
use crate::{Error, Result};

use super::accumulator::FlushedSegment;
use super::whisper::{TranscriptEvent, TranscriptionClient, TranscriptionMode};

/// Transcription backend configuration
#[derive(Debug, Clone)]
pub struct OpenAiTranscriberConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub mode: TranscriptionMode,
    /// Consume the response as SSE, surfacing text deltas as interim text.
    /// Ignored for translation, which the API only serves whole.
    pub stream: bool,
}

impl Default for OpenAiTranscriberConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            mode: TranscriptionMode::Transcribe,
            stream: false,
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Whisper-compatible HTTP transcription
pub struct OpenAiTranscriber {
    config: OpenAiTranscriberConfig,
    client: reqwest::Client,
}

impl OpenAiTranscriber {
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: OpenAiTranscriberConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("transcription API key not set".to_string()));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn build_form(&self, segment: &FlushedSegment, language: Option<&str>) -> Result<Form> {
        let wav = samples_to_wav(&segment.samples, segment.sample_rate)?;
        let part = Part::bytes(wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());
        // Translation always targets English; a language hint only applies
        // when transcribing.
        if self.config.mode == TranscriptionMode::Transcribe
            && let Some(lang) = language
        {
            form = form.text("language", lang.to_string());
        }

        Ok(form)
    }

    fn endpoint(&self) -> String {
        let path = match self.config.mode {
            TranscriptionMode::Transcribe => "audio/transcriptions",
            TranscriptionMode::Translate => "audio/translations",
        };
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn transcribe_whole(
        &self,
        form: Form,
        events: &mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!(
                "transcription request failed ({status}): {body}"
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        let _ = events.send(TranscriptEvent::Final(parsed.text));
        Ok(())
    }

    async fn transcribe_streaming(
        &self,
        form: Form,
        events: &mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form.text("stream", "true"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!(
                "streaming transcription failed ({status}): {body}"
            )));
        }

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut finished = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE events are separated by a blank line; anything after the
            // last separator is an incomplete event kept for the next chunk.
            while let Some(split) = buffer.find("\n\n") {
                let event: String = buffer.drain(..split + 2).collect();
                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<StreamEvent>(data) {
                        Ok(parsed) => {
                            if parsed.kind == "transcript.text.delta" {
                                if let Some(delta) = parsed.delta {
                                    let _ = events.send(TranscriptEvent::Interim(delta));
                                }
                            } else if parsed.kind == "transcript.text.done"
                                && let Some(text) = parsed.text
                            {
                                let _ = events.send(TranscriptEvent::Final(text));
                                finished = true;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "unparseable transcription stream event");
                        }
                    }
                }
            }
        }

        if finished {
            Ok(())
        } else {
            Err(Error::Stt(
                "transcription stream ended without final text".to_string(),
            ))
        }
    }
}

#[async_trait]
impl TranscriptionClient for OpenAiTranscriber {
    async fn transcribe(
        &self,
        segment: FlushedSegment,
        language: Option<&str>,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<()> {
        tracing::debug!(
            samples = segment.samples.len(),
            mode = ?self.config.mode,
            "uploading segment for transcription"
        );
        let form = self.build_form(&segment, language)?;

        if self.config.stream && self.config.mode == TranscriptionMode::Transcribe {
            self.transcribe_streaming(form, &events).await
        } else {
            self.transcribe_whole(form, &events).await
        }
    }
}

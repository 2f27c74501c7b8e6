//! Recognition pipeline integration tests
//!
//! Drives `WhisperRecognition` with scripted VAD events and a scripted
//! transcription client — no microphone, no network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxbridge::recognition::vad::VadEvent;
use voxbridge::recognition::{
    AccumulatorConfig, ListeningState, RecognitionService, VadOverride, VadState, WhisperConfig,
    WhisperRecognition,
};

mod common;

use common::{RecordingClient, ScriptedVad, frame, utterance};

fn test_config(min_chunk_sec: f32, grace_sec: f32) -> WhisperConfig {
    WhisperConfig {
        accumulator: AccumulatorConfig {
            min_chunk_sec,
            small_chunk_grace_sec: grace_sec,
            max_chunk_sec: Some(10.0),
            lookback_frames: 0,
            ..AccumulatorConfig::default()
        },
        ..WhisperConfig::default()
    }
}

fn collect_finals(service: &WhisperRecognition) -> Arc<Mutex<Vec<String>>> {
    let finals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finals);
    service.on_text_received(Some(Box::new(move |text| {
        sink.lock().unwrap().push(text.to_string());
    })));
    finals
}

#[tokio::test]
async fn test_finals_arrive_in_segment_order() {
    let mut events = utterance(1.0, 0.5);
    events.extend(utterance(1.0, 0.4));

    let client = Arc::new(RecordingClient {
        // First segment's request is slow; order must hold anyway because
        // transcription is serialized.
        delays: vec![Duration::from_millis(50), Duration::from_millis(5)],
        ..RecordingClient::new()
    });
    let service = WhisperRecognition::new(
        test_config(0.1, 0.5),
        Box::new(ScriptedVad::new(events)),
        client.clone(),
    );
    let finals = collect_finals(&service);

    service.start_listening(None).await.unwrap();
    assert_eq!(service.listening_state(), ListeningState::Listening);
    service.stop_listening().await.unwrap();
    assert_eq!(service.listening_state(), ListeningState::Inactive);

    assert_eq!(
        finals.lock().unwrap().clone(),
        vec!["final-0".to_string(), "final-1".to_string()]
    );
    assert_eq!(client.segments.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_short_segment_held_until_grace_window() {
    // 1s of speech under a 2s minimum: held, then flushed once a 0.5s
    // grace window of further audio passes.
    let mut events = utterance(1.0, 0.5);
    let idle_frames = (16000.0_f32 / 512.0).ceil() as usize;
    for _ in 0..idle_frames {
        events.push(VadEvent::Frame {
            probability: 0.1,
            samples: frame(0.0),
        });
    }

    let client = Arc::new(RecordingClient::new());
    let service = WhisperRecognition::new(
        test_config(2.0, 0.5),
        Box::new(ScriptedVad::new(events)),
        client.clone(),
    );
    let finals = collect_finals(&service);

    service.start_listening(None).await.unwrap();
    service.stop_listening().await.unwrap();

    // Exactly one segment, carrying the held speech plus the grace tail.
    let segments = client.segments.lock().unwrap().clone();
    assert_eq!(segments.len(), 1);
    assert!(segments[0] >= (1.5 * 16000.0) as usize);
    assert_eq!(finals.lock().unwrap().clone(), vec!["final-0".to_string()]);
}

#[tokio::test]
async fn test_stop_flushes_unfinished_segment() {
    // Speech begins but the source closes before any speech-end.
    let mut events = vec![VadEvent::SpeechStart];
    for _ in 0..16 {
        events.push(VadEvent::Frame {
            probability: 0.9,
            samples: frame(0.5),
        });
    }

    let client = Arc::new(RecordingClient::new());
    let service = WhisperRecognition::new(
        test_config(3.0, 1.0),
        Box::new(ScriptedVad::new(events)),
        client.clone(),
    );

    service.start_listening(None).await.unwrap();
    service.stop_listening().await.unwrap();

    let segments = client.segments.lock().unwrap().clone();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0], 16 * 512);
}

#[tokio::test]
async fn test_failed_transcription_does_not_abort_session() {
    let mut events = utterance(1.0, 0.5);
    events.extend(utterance(1.0, 0.4));

    let client = Arc::new(RecordingClient {
        fail_on: vec![0],
        ..RecordingClient::new()
    });
    let service = WhisperRecognition::new(
        test_config(0.1, 0.5),
        Box::new(ScriptedVad::new(events)),
        client.clone(),
    );
    let finals = collect_finals(&service);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let error_sink = Arc::clone(&errors);
    service.on_error(Some(Box::new(move |error| {
        error_sink.lock().unwrap().push(error.to_string());
    })));

    service.start_listening(None).await.unwrap();
    service.stop_listening().await.unwrap();

    // First segment errored and was reported; the second still came through.
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(finals.lock().unwrap().clone(), vec!["final-1".to_string()]);
}

#[tokio::test]
async fn test_vad_state_follows_frames_unless_overridden() {
    let events = utterance(1.0, 0.5);
    let service = WhisperRecognition::new(
        test_config(0.1, 0.5),
        Box::new(ScriptedVad::new(events)),
        Arc::new(RecordingClient::new()),
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    service.on_vad_state_changed(Some(Box::new(move |state| {
        sink.lock().unwrap().push(state);
    })));

    assert!(service.supports_vad_state());
    service.start_listening(None).await.unwrap();
    service.stop_listening().await.unwrap();

    let seen = transitions.lock().unwrap().clone();
    assert!(seen.contains(&VadState::Speaking));
    assert_eq!(seen.last(), Some(&VadState::Idle));
}

#[tokio::test]
async fn test_vad_override_pins_reported_state() {
    let service = WhisperRecognition::new(
        test_config(0.1, 0.5),
        Box::new(ScriptedVad::new(Vec::new())),
        Arc::new(RecordingClient::new()),
    );

    service.set_vad_override(VadOverride::Speaking);
    assert_eq!(service.vad_state(), VadState::Speaking);

    service.release_vad_override();
    assert_eq!(service.vad_state(), VadState::Speaking);
}

#[tokio::test]
async fn test_speech_events_are_forwarded() {
    let mut events = utterance(1.0, 0.5);
    events.extend(utterance(0.5, 0.4));

    let service = WhisperRecognition::new(
        test_config(0.1, 0.5),
        Box::new(ScriptedVad::new(events)),
        Arc::new(RecordingClient::new()),
    );
    assert!(service.supports_speech_events());

    let starts = Arc::new(Mutex::new(0u32));
    let ends = Arc::new(Mutex::new(0u32));
    let start_sink = Arc::clone(&starts);
    let end_sink = Arc::clone(&ends);
    service.on_speech_start(Some(Box::new(move || {
        *start_sink.lock().unwrap() += 1;
    })));
    service.on_speech_end(Some(Box::new(move || {
        *end_sink.lock().unwrap() += 1;
    })));

    service.start_listening(None).await.unwrap();
    service.stop_listening().await.unwrap();

    assert_eq!(*starts.lock().unwrap(), 2);
    assert_eq!(*ends.lock().unwrap(), 2);
}

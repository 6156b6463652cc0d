//! End-to-end tests for the turn-taking controller, driven entirely by
//! scripted devices, with no audio hardware or network required.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use vocalverse_voice::{
    AudioClip, ConversationController, Devices, ErrorReason, FnInference, NoticeKind, Phase,
    RecognizerEvent, ScriptedRecognizer, ScriptedSession, ScriptedStep, SessionConfig,
    SilentOutput, SilentSynthesizer, Snapshot, SynthesisRequest, SynthesizedSpeech, Synthesizer,
    UnavailableRecognizer, VoiceError, VoiceResult,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_config() -> SessionConfig {
    SessionConfig {
        restart_debounce: Duration::from_millis(5),
        inference_timeout: Duration::from_secs(2),
        tones: false,
        ..SessionConfig::default()
    }
}

/// Inference double that records every transcription it is asked about.
fn recording_inference(
    calls: Arc<Mutex<Vec<String>>>,
    reply: impl Fn(&str) -> VoiceResult<String> + Send + Sync + 'static,
) -> Arc<dyn vocalverse_voice::InferenceBackend> {
    Arc::new(FnInference::new(move |text: &str| {
        calls.lock().unwrap().push(text.to_string());
        reply(text)
    }))
}

/// Synthesizer double that always returns a small playable clip, so a held
/// output can keep the session in the Speaking phase.
struct ClipSynthesizer;

impl Synthesizer for ClipSynthesizer {
    fn synthesize(&self, _request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
        Ok(SynthesizedSpeech {
            clip: Some(AudioClip {
                mime: "audio/wav".to_string(),
                bytes: vec![0u8; 16],
            }),
            translation: None,
        })
    }
}

struct FailingSynthesizer;

impl Synthesizer for FailingSynthesizer {
    fn synthesize(&self, _request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
        Err(VoiceError::Synthesis("engine offline".to_string()))
    }
}

async fn wait_for(
    rx: &mut tokio::sync::watch::Receiver<Snapshot>,
    pred: impl Fn(&Snapshot) -> bool,
) -> Snapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            {
                let snapshot = rx.borrow();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("controller stopped");
        }
    })
    .await
    .expect("timed out waiting for state")
}

#[tokio::test]
async fn full_turn_hello_to_idle_and_rearm() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::utterance(
        "Hello",
    )]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: recording_inference(calls.clone(), |_| Ok("Hi there".to_string())),
        },
    );
    let mut rx = handle.watch();

    let snapshot = wait_for(&mut rx, |s| s.last_response == "Hi there").await;
    assert_eq!(snapshot.last_transcript, "Hello");
    assert!(snapshot.error_reason.is_none());

    // the turn completes and listening re-arms on its own
    wait_for(&mut rx, |s| s.phase == Phase::Listening && s.last_response == "Hi there").await;
    assert_eq!(calls.lock().unwrap().as_slice(), ["Hello"]);
}

#[tokio::test]
async fn permission_denied_speaks_once_then_parks_in_error() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        ScriptedSession::permission_denied(),
    ]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: recording_inference(calls.clone(), |_| Ok("unused".to_string())),
        },
    );
    let mut rx = handle.watch();

    let snapshot = wait_for(&mut rx, |s| s.phase == Phase::Error).await;
    assert_eq!(snapshot.error_reason, Some(ErrorReason::PermissionDenied));
    assert_eq!(snapshot.last_response, test_config().permission_denied_text);

    let notice = timeout(Duration::from_secs(1), handle.next_notice())
        .await
        .expect("no notice")
        .expect("notice channel closed");
    assert_eq!(notice.kind, NoticeKind::PermissionDenied);

    // no automatic re-arm after the terminal failure
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recognizer.opens(), 1);
    assert_eq!(handle.snapshot().phase, Phase::Error);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn inference_failure_speaks_apology_and_continues() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::utterance(
        "Hello",
    )]));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| {
                Err(VoiceError::Inference("upstream 500".to_string()))
            })),
        },
    );
    let mut rx = handle.watch();

    let apology = test_config().apology_text;
    let snapshot = wait_for(&mut rx, |s| s.last_response == apology).await;
    assert!(snapshot.error_reason.is_none());

    // the session survives the failed turn
    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
}

#[tokio::test]
async fn barge_in_cancels_playback_and_starts_a_new_turn() {
    init_tracing();
    let output = SilentOutput::held();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        ScriptedSession::utterance("Hello"),
        ScriptedSession::utterance_after("Stop", Duration::from_millis(30)),
    ]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(ClipSynthesizer),
            output: output.clone(),
            inference: recording_inference(calls.clone(), |text| {
                Ok(if text == "Hello" {
                    "Hi there, this is a long reply".to_string()
                } else {
                    "Okay".to_string()
                })
            }),
        },
    );
    let mut rx = handle.watch();

    // first reply is audible and stays audible (held output)
    wait_for(&mut rx, |s| {
        s.phase == Phase::Speaking && s.last_response == "Hi there, this is a long reply"
    })
    .await;

    // the barge utterance supersedes the in-flight playback
    wait_for(&mut rx, |s| s.last_transcript == "Stop").await;
    wait_for(&mut rx, |s| s.phase == Phase::Speaking && s.last_response == "Okay").await;

    output.finish();
    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    assert_eq!(calls.lock().unwrap().as_slice(), ["Hello", "Stop"]);
}

#[tokio::test]
async fn whitespace_result_rearms_without_thinking() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::new(vec![
        ScriptedStep::Emit(RecognizerEvent::Started),
        ScriptedStep::Wait(Duration::from_millis(10)),
        ScriptedStep::Emit(RecognizerEvent::Result(vec!["   ".to_string()])),
    ])]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: recording_inference(calls.clone(), |_| Ok("unused".to_string())),
        },
    );
    let mut rx = handle.watch();

    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    // the empty utterance drops the session back to Idle, then a fresh
    // stream is armed after the debounce
    timeout(Duration::from_secs(2), async {
        while recognizer.opens() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("capture never re-armed");

    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    assert!(calls.lock().unwrap().is_empty());
    assert!(handle.snapshot().last_transcript.is_empty());
}

#[tokio::test]
async fn repeat_command_replays_without_inference() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        ScriptedSession::utterance("Hello"),
        ScriptedSession::utterance_after("Repeat that.", Duration::from_millis(20)),
    ]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let config = SessionConfig {
        barge_in: false,
        ..test_config()
    };
    let handle = ConversationController::spawn(
        config,
        Devices {
            recognizer: recognizer.clone(),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: recording_inference(calls.clone(), |_| Ok("Hi there".to_string())),
        },
    );
    let mut rx = handle.watch();

    wait_for(&mut rx, |s| s.last_response == "Hi there").await;
    let snapshot = wait_for(&mut rx, |s| s.last_transcript == "Repeat that.").await;
    assert_eq!(snapshot.last_response, "Hi there");

    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    assert_eq!(calls.lock().unwrap().as_slice(), ["Hello"]);
}

#[tokio::test]
async fn reset_is_idempotent_while_idle() {
    init_tracing();
    // a permanently busy engine keeps the session parked in Idle
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![]).with_busy_opens(usize::MAX));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer,
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| Ok(String::new()))),
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.snapshot().phase, Phase::Idle);

    let mut rx = handle.watch();
    rx.borrow_and_update();
    handle.request_reset().unwrap();
    handle.request_reset().unwrap();
    handle.request_reset().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(!rx.has_changed().unwrap());
    assert_eq!(handle.snapshot().phase, Phase::Idle);
    assert!(handle.snapshot().error_reason.is_none());
}

#[tokio::test]
async fn reset_discards_the_inflight_inference_turn() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::utterance(
        "Hello",
    )]));
    let config = SessionConfig {
        barge_in: false,
        ..test_config()
    };
    let handle = ConversationController::spawn(
        config,
        Devices {
            recognizer,
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| {
                std::thread::sleep(Duration::from_millis(200));
                Ok("Late".to_string())
            })),
        },
    );
    let mut rx = handle.watch();

    wait_for(&mut rx, |s| s.phase == Phase::Thinking).await;
    handle.request_reset().unwrap();
    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;

    // the settle arrives after the reset and must be discarded
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.last_response, "");
    assert_eq!(snapshot.phase, Phase::Listening);
}

#[tokio::test]
async fn pre_speak_delay_holds_thinking_until_elapsed() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::utterance(
        "Hello",
    )]));
    let config = SessionConfig {
        barge_in: false,
        pre_speak_delay: Duration::from_millis(200),
        ..test_config()
    };
    let handle = ConversationController::spawn(
        config,
        Devices {
            recognizer,
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| Ok("Hi there".to_string()))),
        },
    );
    let mut rx = handle.watch();

    // the response is recorded while the pause is still running
    wait_for(&mut rx, |s| {
        s.phase == Phase::Thinking && s.last_response == "Hi there"
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.snapshot().phase, Phase::Thinking);

    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
}

#[tokio::test]
async fn unsupported_device_parks_in_error_with_notice() {
    init_tracing();
    let mut handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer: Arc::new(UnavailableRecognizer),
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| Ok(String::new()))),
        },
    );
    let mut rx = handle.watch();

    let snapshot = wait_for(&mut rx, |s| s.phase == Phase::Error).await;
    assert_eq!(snapshot.error_reason, Some(ErrorReason::DeviceUnsupported));

    let notice = timeout(Duration::from_secs(1), handle.next_notice())
        .await
        .expect("no notice")
        .expect("notice channel closed");
    assert_eq!(notice.kind, NoticeKind::DeviceUnsupported);
}

#[tokio::test]
async fn synthesis_failure_notifies_and_returns_to_listening() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![ScriptedSession::utterance(
        "Hello",
    )]));
    let config = SessionConfig {
        barge_in: false,
        ..test_config()
    };
    let mut handle = ConversationController::spawn(
        config,
        Devices {
            recognizer,
            synthesizer: Arc::new(FailingSynthesizer),
            output: SilentOutput::new(),
            inference: Arc::new(FnInference::new(|_: &str| Ok("Hi there".to_string()))),
        },
    );
    let mut rx = handle.watch();

    let notice = timeout(Duration::from_secs(2), handle.next_notice())
        .await
        .expect("no notice")
        .expect("notice channel closed");
    assert_eq!(notice.kind, NoticeKind::PlaybackFailed);

    let snapshot = wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    // the response text is still recorded even though it was never audible
    assert_eq!(snapshot.last_response, "Hi there");
    assert!(snapshot.error_reason.is_none());
}

#[tokio::test]
async fn text_channel_utterance_runs_a_full_turn() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handle = ConversationController::spawn(
        test_config(),
        Devices {
            recognizer,
            synthesizer: Arc::new(SilentSynthesizer),
            output: SilentOutput::new(),
            inference: recording_inference(calls.clone(), |_| Ok("It is noon.".to_string())),
        },
    );
    let mut rx = handle.watch();

    wait_for(&mut rx, |s| s.phase == Phase::Listening).await;
    handle.submit_utterance("What time is it?").unwrap();

    let snapshot = wait_for(&mut rx, |s| s.last_response == "It is noon.").await;
    assert_eq!(snapshot.last_transcript, "What time is it?");
    assert_eq!(calls.lock().unwrap().as_slice(), ["What time is it?"]);
}

//! Session configuration and timing tunables.

use crate::capture::CaptureMode;
use std::time::Duration;

/// Configuration for one conversation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// BCP-47 language tag for capture and synthesis (default "en-US").
    pub language: String,

    /// Keep a capture session live while speaking so the user can interrupt
    /// (default true). Deployments that want strict half-duplex disable this.
    pub barge_in: bool,

    /// Single-utterance or continuous recognition (default continuous).
    pub capture_mode: CaptureMode,

    /// Delay before re-arming capture after an empty turn or a transient
    /// start failure (default 100ms). Guards against tight restart loops.
    pub restart_debounce: Duration,

    /// Optional pause between the inference result settling and playback
    /// starting, for laggy recognizers (0–2.5s; default 0).
    pub pre_speak_delay: Duration,

    /// Inference calls that run longer than this behave like a rejection
    /// (default 30s).
    pub inference_timeout: Duration,

    /// Utterances matching one of these (case/punctuation-insensitive) replay
    /// the last response without calling inference.
    pub repeat_phrases: Vec<String>,

    /// Spoken when the inference collaborator fails.
    pub apology_text: String,

    /// Spoken once when microphone permission is denied, before the session
    /// parks in the Error phase.
    pub permission_denied_text: String,

    /// Ordered voice preference list; first catalog match wins. Empty falls
    /// through to the catalog default for the session language.
    pub voice_preferences: Vec<String>,

    /// Playback rate passed to synthesis (default 1.0).
    pub playback_rate: f32,

    /// Audible listen-start / listen-end / confirmation cues (default on).
    pub tones: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            barge_in: true,
            capture_mode: CaptureMode::Continuous,
            restart_debounce: Duration::from_millis(100),
            pre_speak_delay: Duration::ZERO,
            inference_timeout: Duration::from_secs(30),
            repeat_phrases: vec![
                "repeat".to_string(),
                "repeat that".to_string(),
                "say that again".to_string(),
                "again".to_string(),
            ],
            apology_text: "Sorry, I had trouble getting a response. Please try again.".to_string(),
            permission_denied_text:
                "Microphone permission denied. Please grant access and refresh the page."
                    .to_string(),
            voice_preferences: Vec::new(),
            playback_rate: 1.0,
            tones: true,
        }
    }
}

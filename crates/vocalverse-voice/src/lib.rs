//! # VocalVerse Voice: a conversational turn-taking core
//!
//! A single-session, client-local controller that lets a user speak to an
//! assistant, hear a spoken reply, and interrupt it mid-reply (barge-in).
//! The devices and collaborators are seams; the state machine is the point.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Turn-Taking Controller                     │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐    │
//! │  │   Capture    │──→│  Phase FSM   │──→│   Inference   │    │
//! │  │  (wrapper)   │   │ (event queue)│   │ (collaborator)│    │
//! │  └──────────────┘   └──────────────┘   └───────────────┘    │
//! │         ↑                   │                  │            │
//! │  barge-in re-arm            ↓                  ↓            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐    │
//! │  │  Audio Out   │←──│   Playback   │←──│   Synthesis   │    │
//! │  │   (rodio)    │   │  (wrapper)   │   │ (collaborator)│    │
//! │  └──────────────┘   └──────────────┘   └───────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The presentation layer observes one `Snapshot` (phase, last transcript,
//! last response, error reason) through a watch channel and feeds user
//! actions back in as commands. It never talks to the devices.

pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod inference;
pub mod output;
pub mod playback;
pub mod state;
pub mod synthesis;
pub mod tone;

pub use capture::{
    CaptureEvent, CaptureId, CaptureMode, CaptureOptions, CaptureSession, RecognitionDevice,
    RecognitionStream, RecognizerEvent, ScriptedRecognizer, ScriptedSession, ScriptedStep,
    StartError, UnavailableRecognizer,
};
pub use config::SessionConfig;
pub use controller::{ControllerHandle, ConversationController, Devices};
pub use error::{ErrorReason, VoiceError, VoiceResult};
pub use inference::{FnInference, HttpInference, InferenceBackend};
pub use output::{AudioOutput, RodioOutput, SilentOutput};
pub use playback::{
    select_voice, PlaybackEvent, PlaybackFailure, PlaybackId, PlaybackSession, SpeechParams,
};
pub use state::{Command, Notice, NoticeKind, Phase, Snapshot};
pub use synthesis::{
    decode_data_uri, language_catalog, AudioClip, HttpSynthesizer, HttpTranslator,
    SilentSynthesizer, SynthesisRequest, SynthesizedSpeech, Synthesizer, Voice,
};
pub use tone::{render as render_tone, ToneKind, ToneSpec, TONE_SAMPLE_RATE};

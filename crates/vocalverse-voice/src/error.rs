//! Error types for the VocalVerse voice core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice session
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-level failure taxonomy published through `Snapshot::error_reason`.
///
/// Only `PermissionDenied` and `DeviceUnsupported` park the session in the
/// `Error` phase; the other reasons are recovered in place (apology utterance
/// or non-blocking notice) and never persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Microphone permission denied; terminal until the user grants access
    /// externally and the session is reset.
    PermissionDenied,
    /// No recognition capability on this platform at all.
    DeviceUnsupported,
    /// Speech synthesis or playback failed (non-interrupted).
    SynthesisFailed,
    /// The inference collaborator rejected or timed out.
    InferenceFailed,
}

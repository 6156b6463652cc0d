//! Published conversation state and controller commands.
//!
//! The presentation layer observes one `Snapshot` struct, updated atomically
//! per transition, and feeds user actions back in as `Command`s. It never
//! reaches into the devices themselves.

use crate::error::ErrorReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five conversation phases. Exactly one holds at any instant; the
/// controller's `phase` field is the single authority; device state is never
/// used to infer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting between turns (initializing, or inside the re-arm debounce).
    #[default]
    Idle,
    /// Actively listening for user input.
    Listening,
    /// Waiting for the inference collaborator to settle.
    Thinking,
    /// Playing back the assistant response.
    Speaking,
    /// Terminal until external remediation (permission grant) and a reset.
    Error,
}

/// Conversation state observed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub phase: Phase,
    /// Most recent recognized user utterance. Empty before the first turn.
    pub last_transcript: String,
    /// Most recent assistant reply. Retained to support the repeat command.
    pub last_response: String,
    /// Present only while `phase == Error`.
    pub error_reason: Option<ErrorReason>,
}

/// User-initiated commands relayed by the presentation layer.
#[derive(Debug, Clone)]
pub enum Command {
    /// Feed an utterance in through the text channel, bypassing capture.
    SubmitUtterance(String),
    /// Abort capture and playback unconditionally and return to Idle.
    Reset,
    /// Enable or disable the barge-in window for subsequent turns.
    SetBargeIn(bool),
    /// Switch the session language (applies from the next capture/synthesis).
    SetLanguage(String),
}

/// Non-blocking notification for the presentation layer (the toast surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    DeviceUnsupported,
    PermissionDenied,
    PlaybackFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

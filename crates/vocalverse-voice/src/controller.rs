//! The turn-taking controller: the conversational state machine.
//!
//! One task owns the `phase` field and consumes a queue of capture, playback,
//! timer, and command events, executing each transition to completion before
//! the next event is processed. Devices never drive state directly: every
//! event is tagged with the originating handle's id and discarded when that
//! handle is no longer current, so a late callback from a torn-down stream
//! can never corrupt the machine.
//!
//! ```text
//!            ┌──────┐ device ok ┌───────────┐ result ┌──────────┐
//!            │ Idle │──────────→│ Listening │───────→│ Thinking │
//!            └──────┘  (armed)  └───────────┘        └──────────┘
//!               ↑  ↑                  │ permission         │ settle
//!       debounce│  │ finished         ↓ denied             ↓
//!               │  │            ┌───────────┐  once  ┌──────────┐
//!               │  └────────────│   Error   │←───────│ Speaking │←─ barge-in
//!               └───────────────┴───────────┘        └──────────┘   re-arms
//! ```

use crate::capture::{
    CaptureEvent, CaptureId, CaptureOptions, CaptureSession, RecognitionDevice, StartError,
};
use crate::config::SessionConfig;
use crate::error::{ErrorReason, VoiceError, VoiceResult};
use crate::inference::InferenceBackend;
use crate::output::AudioOutput;
use crate::playback::{PlaybackEvent, PlaybackFailure, PlaybackId, PlaybackSession, SpeechParams};
use crate::state::{Command, Notice, NoticeKind, Phase, Snapshot};
use crate::synthesis::Synthesizer;
use crate::tone::{self, ToneKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// The controller's collaborators.
#[derive(Clone)]
pub struct Devices {
    pub recognizer: Arc<dyn RecognitionDevice>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output: Arc<dyn AudioOutput>,
    pub inference: Arc<dyn InferenceBackend>,
}

enum InternalEvent {
    Command(Command),
    InferenceSettled { turn: u64, result: Result<String, String> },
    RearmElapsed { arm: u64 },
    SpeakDelayElapsed { turn: u64 },
    Shutdown,
}

/// Handle held by the presentation layer: commands in, snapshots and notices
/// out. Dropping the handle tears the session down.
pub struct ControllerHandle {
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    snapshot_rx: watch::Receiver<Snapshot>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl ControllerHandle {
    /// Current state, read without waiting.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that observes every published transition.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Next non-blocking notification (the toast surface).
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    pub fn submit_utterance(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(InternalEvent::Command(Command::SubmitUtterance(text.into())))
    }

    pub fn request_reset(&self) -> VoiceResult<()> {
        self.send(InternalEvent::Command(Command::Reset))
    }

    pub fn set_barge_in(&self, enabled: bool) -> VoiceResult<()> {
        self.send(InternalEvent::Command(Command::SetBargeIn(enabled)))
    }

    pub fn set_language(&self, code: impl Into<String>) -> VoiceResult<()> {
        self.send(InternalEvent::Command(Command::SetLanguage(code.into())))
    }

    /// Tear the session down (screen unmount).
    pub fn shutdown(&self) {
        let _ = self.internal_tx.send(InternalEvent::Shutdown);
    }

    fn send(&self, event: InternalEvent) -> VoiceResult<()> {
        self.internal_tx
            .send(event)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        let _ = self.internal_tx.send(InternalEvent::Shutdown);
    }
}

/// One conversation session's state machine.
pub struct ConversationController {
    config: SessionConfig,
    devices: Devices,

    snapshot: Snapshot,
    watch_tx: watch::Sender<Snapshot>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    capture_tx: mpsc::UnboundedSender<(CaptureId, CaptureEvent)>,
    playback_tx: mpsc::UnboundedSender<(PlaybackId, PlaybackEvent)>,

    capture: Option<CaptureSession>,
    playback: Option<PlaybackSession>,
    next_capture_id: CaptureId,
    next_playback_id: PlaybackId,

    /// Inference generation: a settle tagged with an old turn is stale.
    turn: u64,
    /// Re-arm timer generation: an elapsed timer from an old arm is stale.
    arm: u64,
    /// Set at the moment capture is re-armed while Speaking.
    barge_window: bool,
    /// Park in Error (instead of Idle) once the current utterance finishes.
    pending_error: Option<ErrorReason>,
    /// Capability probe result, taken once at session start.
    device_available: bool,
}

impl ConversationController {
    /// Start a session: probes the recognition capability, arms capture, and
    /// returns the presentation-layer handle.
    pub fn spawn(config: SessionConfig, devices: Devices) -> ControllerHandle {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (watch_tx, watch_rx) = watch::channel(Snapshot::default());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let controller = Self {
            config,
            devices,
            snapshot: Snapshot::default(),
            watch_tx,
            notice_tx,
            internal_tx: internal_tx.clone(),
            capture_tx,
            playback_tx,
            capture: None,
            playback: None,
            next_capture_id: 0,
            next_playback_id: 0,
            turn: 0,
            arm: 0,
            barge_window: false,
            pending_error: None,
            device_available: false,
        };
        tokio::spawn(controller.run(internal_rx, capture_rx, playback_rx));

        ControllerHandle {
            internal_tx,
            snapshot_rx: watch_rx,
            notices: notice_rx,
        }
    }

    async fn run(
        mut self,
        mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
        mut capture_rx: mpsc::UnboundedReceiver<(CaptureId, CaptureEvent)>,
        mut playback_rx: mpsc::UnboundedReceiver<(PlaybackId, PlaybackEvent)>,
    ) {
        self.device_available = self.devices.recognizer.is_available();
        if self.device_available {
            self.begin_capture().await;
        } else {
            self.notify(
                NoticeKind::DeviceUnsupported,
                "Speech recognition is not supported on this platform.",
            );
            self.enter_error(ErrorReason::DeviceUnsupported);
        }

        loop {
            tokio::select! {
                maybe = internal_rx.recv() => match maybe {
                    Some(InternalEvent::Shutdown) | None => break,
                    Some(event) => self.handle_internal(event).await,
                },
                Some((id, event)) = capture_rx.recv() => self.handle_capture(id, event).await,
                Some((id, event)) = playback_rx.recv() => self.handle_playback(id, event).await,
            }
        }

        // unmount: abort everything
        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.devices.output.stop();
        debug!("conversation controller stopped");
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Command(command) => self.handle_command(command).await,
            InternalEvent::InferenceSettled { turn, result } => {
                self.handle_inference(turn, result).await
            }
            InternalEvent::RearmElapsed { arm } => {
                if arm != self.arm {
                    return;
                }
                match self.snapshot.phase {
                    Phase::Idle => self.begin_capture().await,
                    Phase::Speaking if self.config.barge_in && self.capture.is_none() => {
                        self.begin_capture().await
                    }
                    _ => {}
                }
            }
            InternalEvent::SpeakDelayElapsed { turn } => {
                if turn != self.turn || self.snapshot.phase != Phase::Thinking {
                    return;
                }
                let response = self.snapshot.last_response.clone();
                self.begin_speaking(response).await;
            }
            InternalEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SubmitUtterance(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return;
                }
                match self.snapshot.phase {
                    Phase::Idle | Phase::Listening => {
                        self.play_tone(ToneKind::Confirmation);
                        self.accept_utterance(text).await;
                    }
                    Phase::Speaking => {
                        // user-initiated interruption through the text channel
                        if let Some(mut playback) = self.playback.take() {
                            playback.stop();
                        }
                        self.play_tone(ToneKind::Confirmation);
                        self.accept_utterance(text).await;
                    }
                    Phase::Thinking => {
                        debug!("utterance dropped, a turn is already in flight")
                    }
                    Phase::Error => debug!("utterance dropped in error phase"),
                }
            }
            Command::Reset => self.reset(),
            Command::SetBargeIn(enabled) => {
                self.config.barge_in = enabled;
                if self.snapshot.phase == Phase::Speaking {
                    if !enabled {
                        if let Some(mut capture) = self.capture.take() {
                            capture.abort();
                        }
                        self.barge_window = false;
                    } else if self.capture.is_none() && self.pending_error.is_none() {
                        self.begin_capture().await;
                    }
                }
            }
            Command::SetLanguage(code) => {
                info!(language = %code, "session language changed");
                self.config.language = code;
            }
        }
    }

    /// The only force-transition that bypasses the table: abort both handles
    /// unconditionally and return to Idle.
    fn reset(&mut self) {
        self.turn += 1;
        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.devices.output.stop();
        self.barge_window = false;
        self.pending_error = None;
        self.snapshot.phase = Phase::Idle;
        self.snapshot.error_reason = None;
        self.publish();
        self.schedule_rearm();
    }

    async fn handle_capture(&mut self, id: CaptureId, event: CaptureEvent) {
        if self.capture.as_ref().map(CaptureSession::id) != Some(id) {
            debug!(id, "stale capture event ignored");
            return;
        }
        match event {
            CaptureEvent::Started => {
                if self.snapshot.phase == Phase::Idle {
                    self.play_tone(ToneKind::ListenStart);
                    self.snapshot.phase = Phase::Listening;
                    self.publish();
                }
            }
            CaptureEvent::Result(text) => match self.snapshot.phase {
                Phase::Listening => {
                    self.play_tone(ToneKind::Confirmation);
                    self.accept_utterance(text).await;
                }
                Phase::Speaking if self.barge_window => {
                    // barge-in: cancel playback; its Interrupted failure is benign
                    if let Some(mut playback) = self.playback.take() {
                        playback.stop();
                    }
                    self.play_tone(ToneKind::Confirmation);
                    self.accept_utterance(text).await;
                }
                phase => debug!(?phase, "utterance ignored"),
            },
            ev @ (CaptureEvent::NoSpeech | CaptureEvent::Ended) => {
                let ended = matches!(ev, CaptureEvent::Ended);
                if let Some(mut capture) = self.capture.take() {
                    capture.abort();
                }
                match self.snapshot.phase {
                    Phase::Listening => {
                        if ended {
                            self.play_tone(ToneKind::ListenEnd);
                        }
                        self.snapshot.phase = Phase::Idle;
                        self.publish();
                        self.schedule_rearm();
                    }
                    Phase::Idle => self.schedule_rearm(),
                    // keep the barge window armed for the rest of the utterance
                    Phase::Speaking => self.schedule_rearm(),
                    _ => {}
                }
            }
            CaptureEvent::PermissionDenied => {
                if let Some(mut capture) = self.capture.take() {
                    capture.abort();
                }
                warn!("microphone permission denied, parking after the explanation");
                let explanation = self.config.permission_denied_text.clone();
                self.notify(NoticeKind::PermissionDenied, explanation.clone());
                self.pending_error = Some(ErrorReason::PermissionDenied);
                self.snapshot.last_response = explanation.clone();
                self.begin_speaking(explanation).await;
            }
            CaptureEvent::OtherError(code) => {
                warn!(code = %code, "recognition error");
            }
        }
    }

    async fn handle_playback(&mut self, id: PlaybackId, event: PlaybackEvent) {
        if self.playback.as_ref().map(PlaybackSession::id) != Some(id) {
            debug!(id, "stale playback event ignored");
            return;
        }
        match event {
            PlaybackEvent::Started => debug!(id, "playback started"),
            PlaybackEvent::Finished => {
                self.playback = None;
                self.finish_speaking().await;
            }
            PlaybackEvent::Failed(PlaybackFailure::Interrupted) => {
                // cancelled mid-utterance; not an error, but the turn is over
                debug!(id, "playback interrupted");
                self.playback = None;
                self.finish_speaking().await;
            }
            PlaybackEvent::Failed(failure) => {
                warn!(id, ?failure, "playback failed");
                self.notify(
                    NoticeKind::PlaybackFailed,
                    "Sorry, there was an error during speech playback.",
                );
                self.playback = None;
                self.finish_speaking().await;
            }
        }
    }

    async fn handle_inference(&mut self, turn: u64, result: Result<String, String>) {
        if turn != self.turn || self.snapshot.phase != Phase::Thinking {
            debug!(turn, "stale inference settle discarded");
            return;
        }
        let response = match result {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("inference returned empty text, substituting apology");
                self.config.apology_text.clone()
            }
            Err(error) => {
                warn!(%error, "inference failed, substituting apology");
                self.config.apology_text.clone()
            }
        };
        // recorded before the Speaking transition, so playback always has text
        self.snapshot.last_response = response.clone();

        if self.config.pre_speak_delay > Duration::ZERO {
            self.publish();
            let turn = self.turn;
            let delay = self.config.pre_speak_delay;
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(InternalEvent::SpeakDelayElapsed { turn });
            });
            return;
        }
        self.begin_speaking(response).await;
    }

    /// A non-empty utterance was accepted (capture result, barge-in, or the
    /// text channel). Stops capture, then either replays the last response
    /// (repeat command) or starts a new inference turn.
    async fn accept_utterance(&mut self, text: String) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.barge_window = false;
        self.snapshot.last_transcript = text.clone();

        if !self.snapshot.last_response.is_empty() && is_repeat(&text, &self.config.repeat_phrases)
        {
            info!("repeat command, replaying the last response");
            let response = self.snapshot.last_response.clone();
            self.begin_speaking(response).await;
            return;
        }

        self.snapshot.phase = Phase::Thinking;
        self.publish();

        self.turn += 1;
        let turn = self.turn;
        let backend = Arc::clone(&self.devices.inference);
        let deadline = self.config.inference_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let call = tokio::task::spawn_blocking(move || backend.respond(&text));
            let result = match tokio::time::timeout(deadline, call).await {
                Ok(Ok(Ok(response))) => Ok(response),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) => Err(format!("inference task failed: {}", e)),
                Err(_) => Err(format!("inference timed out after {:?}", deadline)),
            };
            let _ = tx.send(InternalEvent::InferenceSettled { turn, result });
        });
    }

    async fn begin_speaking(&mut self, text: String) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.next_playback_id += 1;
        let id = self.next_playback_id;
        let params = SpeechParams {
            language: self.config.language.clone(),
            voice_preferences: self.config.voice_preferences.clone(),
            rate: self.config.playback_rate,
        };
        self.playback = Some(PlaybackSession::start(
            id,
            text,
            params,
            Arc::clone(&self.devices.synthesizer),
            Arc::clone(&self.devices.output),
            self.playback_tx.clone(),
        ));
        self.snapshot.phase = Phase::Speaking;
        self.publish();

        if self.config.barge_in && self.pending_error.is_none() {
            if self.capture.is_none() {
                self.begin_capture().await;
            }
        } else if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
    }

    async fn finish_speaking(&mut self) {
        // the barge session does not outlive the utterance it was armed for
        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        self.barge_window = false;
        if let Some(reason) = self.pending_error.take() {
            self.enter_error(reason);
            return;
        }
        self.snapshot.phase = Phase::Idle;
        self.publish();
        self.schedule_rearm();
    }

    /// Arm a fresh capture session. While Speaking this opens the barge-in
    /// window; the flag is recorded here, at the moment of re-arm.
    async fn begin_capture(&mut self) {
        if !self.device_available {
            self.enter_error(ErrorReason::DeviceUnsupported);
            return;
        }
        if self.pending_error.is_some() {
            return;
        }
        // tear down the previous handle before creating a new one
        if let Some(mut old) = self.capture.take() {
            old.abort();
        }
        self.barge_window = self.snapshot.phase == Phase::Speaking;
        self.next_capture_id += 1;
        let id = self.next_capture_id;
        let options = CaptureOptions {
            mode: self.config.capture_mode,
            language: self.config.language.clone(),
        };
        match CaptureSession::start(
            Arc::clone(&self.devices.recognizer),
            options,
            id,
            self.capture_tx.clone(),
            self.config.restart_debounce,
        )
        .await
        {
            Ok(session) => {
                debug!(id, barge = self.barge_window, "capture armed");
                self.capture = Some(session);
            }
            Err(StartError::Unavailable) => {
                self.notify(
                    NoticeKind::DeviceUnsupported,
                    "Speech recognition is not supported on this platform.",
                );
                self.enter_error(ErrorReason::DeviceUnsupported);
            }
            Err(error) => {
                // NoSpeech-class: try again after the debounce
                debug!(id, %error, "capture start failed, re-arming");
                self.schedule_rearm();
            }
        }
    }

    fn enter_error(&mut self, reason: ErrorReason) {
        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.barge_window = false;
        self.arm += 1; // cancel any pending re-arm
        self.snapshot.phase = Phase::Error;
        self.snapshot.error_reason = Some(reason);
        self.publish();
    }

    fn schedule_rearm(&mut self) {
        self.arm += 1;
        let arm = self.arm;
        let delay = self.config.restart_debounce;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InternalEvent::RearmElapsed { arm });
        });
    }

    fn play_tone(&self, kind: ToneKind) {
        if !self.config.tones {
            return;
        }
        let pcm = tone::render(kind.spec(), tone::TONE_SAMPLE_RATE);
        self.devices.output.play_pcm(&pcm, tone::TONE_SAMPLE_RATE);
    }

    fn notify(&self, kind: NoticeKind, message: impl Into<String>) {
        let _ = self.notice_tx.send(Notice::new(kind, message));
    }

    /// One watch send per transition, suppressed when nothing changed.
    fn publish(&self) {
        let snapshot = self.snapshot.clone();
        self.watch_tx.send_if_modified(move |current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case- and punctuation-insensitive repeat-command match.
pub(crate) fn is_repeat(text: &str, phrases: &[String]) -> bool {
    let normalized = normalize(text);
    phrases.iter().any(|p| normalize(p) == normalized)
}

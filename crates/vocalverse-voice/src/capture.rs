//! Capture session wrapper: owns one live recognition stream at a time.
//!
//! The platform recognition engine sits behind `RecognitionDevice`; the
//! wrapper normalizes its raw callbacks into `CaptureEvent`s tagged with a
//! session id, so the controller can discard anything from a handle that is
//! no longer current. Teardown deregisters the forwarder before the device is
//! asked to stop, so a late callback can never reach a torn-down session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Recognition mode, supplied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// End the stream after the first finalized result.
    SingleUtterance,
    /// Keep recognizing until stopped.
    #[default]
    Continuous,
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub mode: CaptureMode,
    /// BCP-47 language tag.
    pub language: String,
}

/// Raw events emitted by a recognition stream.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    Started,
    /// Finalized result segments, in order. May be empty or whitespace-only.
    Result(Vec<String>),
    NoSpeech,
    PermissionDenied,
    Error(String),
    Ended,
}

/// Why a stream could not be opened.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    /// The engine reports a stream is already running (InvalidState). The
    /// wrapper retries once after a short delay before giving up.
    #[error("recognition engine busy")]
    Busy,
    /// No recognition capability on this platform.
    #[error("recognition unsupported on this platform")]
    Unavailable,
    #[error("recognition start failed: {0}")]
    Other(String),
}

/// The platform recognition engine. `open` must be called from within a tokio
/// runtime; implementations deliver events through the given sender from
/// whatever thread or task they own.
pub trait RecognitionDevice: Send + Sync {
    /// Capability probe, performed once at session start.
    fn is_available(&self) -> bool {
        true
    }

    fn open(
        &self,
        options: &CaptureOptions,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>, StartError>;
}

/// A live recognition stream.
pub trait RecognitionStream: Send {
    /// Graceful stop.
    fn stop(&mut self);
    /// Abort, discarding anything pending.
    fn abort(&mut self);
}

/// Monotonic session id; the controller ignores events from non-current ids.
pub type CaptureId = u64;

/// Normalized events surfaced to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started,
    /// Non-empty, whitespace-trimmed concatenation of the finalized segments.
    Result(String),
    NoSpeech,
    PermissionDenied,
    OtherError(String),
    /// Fires exactly once per session, after `Started`, however the session
    /// ended (result, error, or explicit stop).
    Ended,
}

/// One live capture session. Dropping it aborts the stream.
pub struct CaptureSession {
    id: CaptureId,
    stream: Option<Box<dyn RecognitionStream>>,
    detached: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    out_tx: mpsc::UnboundedSender<(CaptureId, CaptureEvent)>,
}

impl CaptureSession {
    /// Open a fresh stream and start forwarding its events, tagged with `id`.
    /// A `Busy` open is retried exactly once after `retry_delay`.
    pub async fn start(
        device: Arc<dyn RecognitionDevice>,
        options: CaptureOptions,
        id: CaptureId,
        out_tx: mpsc::UnboundedSender<(CaptureId, CaptureEvent)>,
        retry_delay: Duration,
    ) -> Result<Self, StartError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let stream = match device.open(&options, raw_tx.clone()) {
            Ok(s) => Ok(s),
            Err(StartError::Busy) => {
                debug!(id, "recognition engine busy, retrying once");
                tokio::time::sleep(retry_delay).await;
                device.open(&options, raw_tx)
            }
            Err(e) => Err(e),
        }?;

        let detached = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward(
            raw_rx,
            out_tx.clone(),
            id,
            Arc::clone(&detached),
            Arc::clone(&ended),
        ));

        Ok(Self {
            id,
            stream: Some(stream),
            detached,
            ended,
            out_tx,
        })
    }

    pub fn id(&self) -> CaptureId {
        self.id
    }

    /// Graceful stop: deregister first, then ask the device to stop.
    pub fn stop(&mut self) {
        self.teardown(true);
    }

    /// Abort: deregister first, then discard anything pending.
    pub fn abort(&mut self) {
        self.teardown(false);
    }

    fn teardown(&mut self, graceful: bool) {
        self.detached.store(true, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            if graceful {
                stream.stop();
            } else {
                stream.abort();
            }
            // the device may never report its own end once detached
            if !self.ended.swap(true, Ordering::SeqCst) {
                let _ = self.out_tx.send((self.id, CaptureEvent::Ended));
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown(false);
    }
}

async fn forward(
    mut raw_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
    out_tx: mpsc::UnboundedSender<(CaptureId, CaptureEvent)>,
    id: CaptureId,
    detached: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
) {
    let mut started = false;
    while let Some(event) = raw_rx.recv().await {
        if detached.load(Ordering::SeqCst) {
            continue;
        }
        let mapped = match event {
            RecognizerEvent::Started => {
                if started {
                    continue;
                }
                started = true;
                CaptureEvent::Started
            }
            RecognizerEvent::Result(segments) => {
                let text = segments.concat();
                let text = text.trim();
                if text.is_empty() {
                    CaptureEvent::NoSpeech
                } else {
                    CaptureEvent::Result(text.to_string())
                }
            }
            RecognizerEvent::NoSpeech => CaptureEvent::NoSpeech,
            RecognizerEvent::PermissionDenied => CaptureEvent::PermissionDenied,
            RecognizerEvent::Error(code) => CaptureEvent::OtherError(code),
            RecognizerEvent::Ended => {
                if !ended.swap(true, Ordering::SeqCst) {
                    let _ = out_tx.send((id, CaptureEvent::Ended));
                }
                return;
            }
        };
        if out_tx.send((id, mapped)).is_err() {
            return;
        }
    }
    // the device went away without reporting an end
    if !detached.load(Ordering::SeqCst) && !ended.swap(true, Ordering::SeqCst) {
        warn!(id, "recognition stream dropped without ending");
        let _ = out_tx.send((id, CaptureEvent::Ended));
    }
}

// -----------------------------------------------------------------------------
// Scripted device: deterministic sessions for tests and demos.
// -----------------------------------------------------------------------------

/// One step of a scripted recognition session.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Emit(RecognizerEvent),
    Wait(Duration),
}

/// A canned recognition session replayed on `open`.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    steps: Vec<ScriptedStep>,
}

impl ScriptedSession {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self { steps }
    }

    /// Start, then recognize `text` after a short pause. The stream stays
    /// open (continuous mode) until stopped.
    pub fn utterance(text: &str) -> Self {
        Self::utterance_after(text, Duration::from_millis(20))
    }

    pub fn utterance_after(text: &str, delay: Duration) -> Self {
        Self::new(vec![
            ScriptedStep::Emit(RecognizerEvent::Started),
            ScriptedStep::Wait(delay),
            ScriptedStep::Emit(RecognizerEvent::Result(vec![text.to_string()])),
        ])
    }

    /// Start, hear nothing, end.
    pub fn silence() -> Self {
        Self::new(vec![
            ScriptedStep::Emit(RecognizerEvent::Started),
            ScriptedStep::Wait(Duration::from_millis(20)),
            ScriptedStep::Emit(RecognizerEvent::NoSpeech),
            ScriptedStep::Emit(RecognizerEvent::Ended),
        ])
    }

    /// Start, then the platform denies microphone access.
    pub fn permission_denied() -> Self {
        Self::new(vec![
            ScriptedStep::Emit(RecognizerEvent::Started),
            ScriptedStep::Wait(Duration::from_millis(10)),
            ScriptedStep::Emit(RecognizerEvent::PermissionDenied),
            ScriptedStep::Emit(RecognizerEvent::Ended),
        ])
    }

    /// Start and stay silent until stopped.
    pub fn idle() -> Self {
        Self::new(vec![ScriptedStep::Emit(RecognizerEvent::Started)])
    }
}

/// Scripted recognition device: each `open` pops the next session and replays
/// it. Once the script runs out, further opens behave like `idle()`.
pub struct ScriptedRecognizer {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    busy_opens: AtomicUsize,
    opened: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            busy_opens: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
        }
    }

    /// Make the first `n` opens fail with `StartError::Busy`.
    pub fn with_busy_opens(self, n: usize) -> Self {
        self.busy_opens.store(n, Ordering::SeqCst);
        self
    }

    /// How many streams were successfully opened.
    pub fn opens(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl RecognitionDevice for ScriptedRecognizer {
    fn open(
        &self,
        _options: &CaptureOptions,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>, StartError> {
        if self
            .busy_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StartError::Busy);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let steps = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ScriptedSession::idle)
            .steps;
        let task = tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptedStep::Wait(d) => tokio::time::sleep(d).await,
                    ScriptedStep::Emit(ev) => {
                        if events.send(ev).is_err() {
                            return;
                        }
                    }
                }
            }
            // keep the stream (and its sender) open until stopped
            std::future::pending::<()>().await;
        });
        Ok(Box::new(ScriptedStream { task }))
    }
}

struct ScriptedStream {
    task: tokio::task::JoinHandle<()>,
}

impl RecognitionStream for ScriptedStream {
    fn stop(&mut self) {
        self.task.abort();
    }

    fn abort(&mut self) {
        self.task.abort();
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A platform with no recognition capability at all.
#[derive(Debug, Default)]
pub struct UnavailableRecognizer;

impl RecognitionDevice for UnavailableRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    fn open(
        &self,
        _options: &CaptureOptions,
        _events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>, StartError> {
        Err(StartError::Unavailable)
    }
}

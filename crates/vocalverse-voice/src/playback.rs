//! Playback session wrapper: owns one live spoken utterance at a time.
//!
//! `start` pins a voice, cancels whatever is audible system-wide, synthesizes
//! off the controller loop, and plays the clip through the shared output.
//! Exactly one of `Finished`/`Failed` follows each `Started`. An
//! `Interrupted` failure is the normal consequence of barge-in or reset, not
//! an error: it is never surfaced to the user.

use crate::output::AudioOutput;
use crate::synthesis::{SynthesisRequest, Synthesizer, Voice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Monotonic session id; the controller ignores events from non-current ids.
pub type PlaybackId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Finished,
    Failed(PlaybackFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackFailure {
    /// Cancelled mid-utterance (barge-in or reset). Benign.
    Interrupted,
    /// The synthesis collaborator failed.
    Synthesis(String),
    /// The audio device refused the clip.
    Audio(String),
}

/// Voice and language parameters pinned at `start`.
#[derive(Debug, Clone)]
pub struct SpeechParams {
    pub language: String,
    pub voice_preferences: Vec<String>,
    pub rate: f32,
}

/// Pin a voice: first preference present in the catalog, else the catalog
/// default for the session language, else the first available voice.
pub fn select_voice(catalog: &[Voice], preferences: &[String], language: &str) -> Option<String> {
    for pref in preferences {
        if catalog.iter().any(|v| v.name == *pref) {
            return Some(pref.clone());
        }
    }
    if let Some(v) = catalog
        .iter()
        .find(|v| v.default_for_language && v.language.eq_ignore_ascii_case(language))
    {
        return Some(v.name.clone());
    }
    catalog.first().map(|v| v.name.clone())
}

/// One live spoken utterance. Dropping it stops playback.
pub struct PlaybackSession {
    id: PlaybackId,
    interrupted: Arc<AtomicBool>,
    output: Arc<dyn AudioOutput>,
}

impl PlaybackSession {
    /// Cancel anything audible and begin speaking `text`. Events arrive on
    /// `out_tx`, tagged with `id`.
    pub fn start(
        id: PlaybackId,
        text: String,
        params: SpeechParams,
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        out_tx: mpsc::UnboundedSender<(PlaybackId, PlaybackEvent)>,
    ) -> Self {
        // only one spoken utterance may be audible at a time
        output.stop();

        let interrupted = Arc::new(AtomicBool::new(false));
        tokio::spawn(drive(
            id,
            text,
            params,
            synthesizer,
            Arc::clone(&output),
            out_tx,
            Arc::clone(&interrupted),
        ));

        Self {
            id,
            interrupted,
            output,
        }
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    /// Cancel the utterance. The session reports `Failed(Interrupted)`.
    pub fn stop(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.output.stop();
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drive(
    id: PlaybackId,
    text: String,
    params: SpeechParams,
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    out_tx: mpsc::UnboundedSender<(PlaybackId, PlaybackEvent)>,
    interrupted: Arc<AtomicBool>,
) {
    let voice = select_voice(&synthesizer.voices(), &params.voice_preferences, &params.language);
    let request = SynthesisRequest {
        text,
        language: params.language,
        voice,
        rate: params.rate,
    };

    let synth = Arc::clone(&synthesizer);
    let result = tokio::task::spawn_blocking(move || synth.synthesize(&request)).await;
    let speech = match result {
        Ok(Ok(speech)) => speech,
        Ok(Err(e)) => {
            let _ = out_tx.send((id, PlaybackEvent::Failed(PlaybackFailure::Synthesis(e.to_string()))));
            return;
        }
        Err(e) => {
            let _ = out_tx.send((
                id,
                PlaybackEvent::Failed(PlaybackFailure::Synthesis(format!(
                    "synthesis task failed: {}",
                    e
                ))),
            ));
            return;
        }
    };

    if interrupted.load(Ordering::SeqCst) {
        let _ = out_tx.send((id, PlaybackEvent::Failed(PlaybackFailure::Interrupted)));
        return;
    }
    if let Some(ref translation) = speech.translation {
        info!(%translation, "speaking translated text");
    }

    let _ = out_tx.send((id, PlaybackEvent::Started));
    match speech.clip {
        None => {
            debug!(id, "no audio to play, finishing immediately");
            let _ = out_tx.send((id, PlaybackEvent::Finished));
        }
        Some(clip) => {
            if let Err(e) = output.play(&clip) {
                let _ = out_tx.send((id, PlaybackEvent::Failed(PlaybackFailure::Audio(e.to_string()))));
                return;
            }
            let waiter = Arc::clone(&output);
            let _ = tokio::task::spawn_blocking(move || waiter.wait_idle()).await;
            let event = if interrupted.load(Ordering::SeqCst) {
                PlaybackEvent::Failed(PlaybackFailure::Interrupted)
            } else {
                PlaybackEvent::Finished
            };
            let _ = out_tx.send((id, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceResult;
    use crate::output::SilentOutput;
    use crate::synthesis::{decode_data_uri, SilentSynthesizer, SynthesizedSpeech};
    use std::time::Duration;

    fn catalog() -> Vec<Voice> {
        vec![
            Voice {
                name: "en-US-Neural2-J".to_string(),
                language: "en-US".to_string(),
                default_for_language: true,
            },
            Voice {
                name: "fr-FR-Neural2-D".to_string(),
                language: "fr-FR".to_string(),
                default_for_language: true,
            },
        ]
    }

    #[test]
    fn voice_preference_wins() {
        let picked = select_voice(
            &catalog(),
            &["fr-FR-Neural2-D".to_string()],
            "en-US",
        );
        assert_eq!(picked.as_deref(), Some("fr-FR-Neural2-D"));
    }

    #[test]
    fn voice_falls_back_to_language_default() {
        let picked = select_voice(&catalog(), &["missing".to_string()], "fr-FR");
        assert_eq!(picked.as_deref(), Some("fr-FR-Neural2-D"));
    }

    #[test]
    fn voice_falls_back_to_first_available() {
        let picked = select_voice(&catalog(), &[], "ja-JP");
        assert_eq!(picked.as_deref(), Some("en-US-Neural2-J"));
    }

    #[test]
    fn voice_empty_catalog_pins_nothing() {
        assert_eq!(select_voice(&[], &["x".to_string()], "en-US"), None);
    }

    fn params() -> SpeechParams {
        SpeechParams {
            language: "en-US".to_string(),
            voice_preferences: Vec::new(),
            rate: 1.0,
        }
    }

    #[tokio::test]
    async fn silent_session_starts_then_finishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = PlaybackSession::start(
            1,
            "hello".to_string(),
            params(),
            Arc::new(SilentSynthesizer),
            SilentOutput::new(),
            tx,
        );
        assert_eq!(rx.recv().await, Some((1, PlaybackEvent::Started)));
        assert_eq!(rx.recv().await, Some((1, PlaybackEvent::Finished)));
    }

    struct WavSynthesizer;

    impl Synthesizer for WavSynthesizer {
        fn synthesize(&self, _request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
            let uri = "data:audio/wav;base64,UklGRg==";
            Ok(SynthesizedSpeech {
                clip: Some(decode_data_uri(uri)?),
                translation: None,
            })
        }
    }

    #[tokio::test]
    async fn held_session_reports_interrupted_on_stop() {
        let output = SilentOutput::held();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = PlaybackSession::start(
            2,
            "hold on".to_string(),
            params(),
            Arc::new(WavSynthesizer),
            output,
            tx,
        );
        assert_eq!(rx.recv().await, Some((2, PlaybackEvent::Started)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.stop();
        assert_eq!(
            rx.recv().await,
            Some((2, PlaybackEvent::Failed(PlaybackFailure::Interrupted)))
        );
    }

    #[tokio::test]
    async fn held_session_finishes_when_drained() {
        let output = SilentOutput::held();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = PlaybackSession::start(
            3,
            "short".to_string(),
            params(),
            Arc::new(WavSynthesizer),
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            tx,
        );
        assert_eq!(rx.recv().await, Some((3, PlaybackEvent::Started)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        output.finish();
        assert_eq!(rx.recv().await, Some((3, PlaybackEvent::Finished)));
    }
}

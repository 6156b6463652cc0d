//! Conversation demo: a scripted exchange through the full turn-taking loop.
//!
//! - **Inference**: `HttpInference` if `INFERENCE_API_URL` is set, else canned
//!   echo replies.
//! - **Synthesis**: `HttpSynthesizer` if `SPEECH_API_URL` is set, else silent.
//! - **Output**: the default audio device if one exists, else silent.
//!
//! The recognizer is scripted, so the demo runs anywhere; swap in a real
//! `RecognitionDevice` to drive it from a microphone-backed engine.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vocalverse_voice::{
    AudioOutput, ConversationController, Devices, FnInference, HttpInference, HttpSynthesizer,
    InferenceBackend, RodioOutput, ScriptedRecognizer, ScriptedSession, SessionConfig,
    SilentOutput, SilentSynthesizer, Synthesizer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("VocalVerse demo: scripted conversation through the turn-taking core");
    info!("Set INFERENCE_API_URL / SPEECH_API_URL in .env for live collaborators.\n");

    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        ScriptedSession::utterance_after("Hello there", Duration::from_millis(400)),
        ScriptedSession::utterance_after("What can you do", Duration::from_millis(600)),
        ScriptedSession::utterance_after("Repeat that", Duration::from_millis(600)),
    ]));

    let inference: Arc<dyn InferenceBackend> = match HttpInference::from_env() {
        Ok(backend) => {
            info!(endpoint = %backend.endpoint, "inference: HTTP collaborator");
            Arc::new(backend)
        }
        Err(_) => {
            info!("inference: canned replies");
            Arc::new(FnInference::new(|text: &str| {
                Ok(format!("You said: {}.", text.trim()))
            }))
        }
    };

    let synthesizer: Arc<dyn Synthesizer> = match HttpSynthesizer::from_env() {
        Ok(backend) => {
            info!(endpoint = %backend.endpoint, "synthesis: HTTP collaborator");
            Arc::new(backend)
        }
        Err(_) => {
            info!("synthesis: silent");
            Arc::new(SilentSynthesizer)
        }
    };

    let output: Arc<dyn AudioOutput> = match RodioOutput::new() {
        Ok(out) => Arc::new(out),
        Err(e) => {
            info!(error = %e, "no audio device, running silent");
            SilentOutput::new()
        }
    };

    let handle = ConversationController::spawn(
        SessionConfig::default(),
        Devices {
            recognizer,
            synthesizer,
            output,
            inference,
        },
    );

    let mut watch = handle.watch();
    let watcher = tokio::spawn(async move {
        while watch.changed().await.is_ok() {
            let s = watch.borrow().clone();
            info!(
                phase = ?s.phase,
                transcript = %s.last_transcript,
                response = %s.last_response,
                "state"
            );
        }
    });

    tokio::time::sleep(Duration::from_secs(6)).await;
    handle.shutdown();
    let _ = watcher.await;
    Ok(())
}

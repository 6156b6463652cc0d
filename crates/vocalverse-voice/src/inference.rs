//! External inference collaborator: turns user text into assistant text.
//!
//! The controller guarantees at most one in-flight call per conversation and
//! substitutes a fixed apology when a call fails; there is no retry here.
//! Calls run off the controller loop via `spawn_blocking`.

use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;

/// Backend for the opaque `getResponse` call.
pub trait InferenceBackend: Send + Sync {
    fn respond(&self, transcription: &str) -> VoiceResult<String>;
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    response: String,
}

/// Production inference collaborator: posts `{"transcription": …}` and
/// expects `{"response": …}`. Non-2xx or a malformed body is an error.
#[derive(Debug, Clone)]
pub struct HttpInference {
    /// Full endpoint URL.
    pub endpoint: String,
    /// Optional bearer API key.
    pub api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpInference {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Inference(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    /// Build from environment: `INFERENCE_API_URL` (required),
    /// `INFERENCE_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = std::env::var("INFERENCE_API_URL")
            .map_err(|_| VoiceError::Config("INFERENCE_API_URL not set".to_string()))?;
        let api_key = std::env::var("INFERENCE_API_KEY").ok();
        Self::new(endpoint, api_key)
    }
}

impl InferenceBackend for HttpInference {
    fn respond(&self, transcription: &str) -> VoiceResult<String> {
        let body = serde_json::json!({ "transcription": transcription });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().map_err(|e| VoiceError::Inference(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Inference(format!(
                "inference API error {}: {}",
                status, body
            )));
        }
        let parsed: InferenceResponse = res
            .json()
            .map_err(|e| VoiceError::Inference(format!("malformed inference body: {}", e)))?;
        Ok(parsed.response)
    }
}

/// Closure-backed inference for tests and demos.
pub struct FnInference<F>(F);

impl<F> FnInference<F>
where
    F: Fn(&str) -> VoiceResult<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> InferenceBackend for FnInference<F>
where
    F: Fn(&str) -> VoiceResult<String> + Send + Sync,
{
    fn respond(&self, transcription: &str) -> VoiceResult<String> {
        (self.0)(transcription)
    }
}

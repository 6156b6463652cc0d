//! Speech synthesis collaborators: opaque text-to-audio transforms.
//!
//! Implement `Synthesizer` for any backend that can turn response text into a
//! playable clip. The HTTP implementations speak the flow-endpoint wire
//! shapes: `{text} -> {audioDataUri}` and, for the multilingual variant,
//! `{text, sourceLanguage, targetLanguage} -> {translation, audioDataUri}`.
//! The translation step sits ahead of synthesis and does not change the
//! turn-taking machine.

use crate::error::{VoiceError, VoiceResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::debug;

/// A decoded, playable audio container (WAV/MP3 bytes).
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// One voice the synthesis collaborator can speak with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP-47 language tag.
    pub language: String,
    /// Whether this is the collaborator's default voice for its language.
    pub default_for_language: bool,
}

/// A synthesis request with a pinned voice selection.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Session language (the source language in the translating variant).
    pub language: String,
    /// Pinned voice, if the selection policy found one.
    pub voice: Option<String>,
    pub rate: f32,
}

/// What a synthesis call produced. `clip` is `None` for silent backends.
#[derive(Debug, Clone, Default)]
pub struct SynthesizedSpeech {
    pub clip: Option<AudioClip>,
    /// Set by translating backends: the text that was actually spoken.
    pub translation: Option<String>,
}

/// Backend that turns response text into audio. Called off the controller
/// loop via `spawn_blocking`; implementations may block.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech>;

    /// Voice catalog for the selection policy. Empty when the collaborator
    /// picks its own voice.
    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }
}

/// Decode a self-describing `data:<mime>;base64,<payload>` URI into a clip.
pub fn decode_data_uri(uri: &str) -> VoiceResult<AudioClip> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| VoiceError::Synthesis(format!("not a data URI: {:.32}", uri)))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| VoiceError::Synthesis("data URI is not base64-encoded".to_string()))?;
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| VoiceError::Synthesis(format!("data URI decode failed: {}", e)))?;
    Ok(AudioClip {
        mime: mime.to_string(),
        bytes,
    })
}

/// Languages the translating collaborator supports, each with its pinned
/// high-quality voice.
pub fn language_catalog() -> Vec<Voice> {
    [
        ("en-US", "en-US-Neural2-J"),
        ("es-ES", "es-ES-Neural2-F"),
        ("fr-FR", "fr-FR-Neural2-D"),
        ("de-DE", "de-DE-Neural2-F"),
        ("it-IT", "it-IT-Neural2-A"),
        ("ja-JP", "ja-JP-Neural2-B"),
        ("ko-KR", "ko-KR-Wavenet-C"),
    ]
    .into_iter()
    .map(|(language, name)| Voice {
        name: name.to_string(),
        language: language.to_string(),
        default_for_language: true,
    })
    .collect()
}

/// Silent synthesizer: produces no audio. Use for headless runs and tests of
/// the turn-taking machine.
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

impl Synthesizer for SilentSynthesizer {
    fn synthesize(&self, _request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
        Ok(SynthesizedSpeech::default())
    }
}

#[derive(Debug, Deserialize)]
struct SpeakResponse {
    #[serde(rename = "audioDataUri")]
    audio_data_uri: String,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
    #[serde(rename = "audioDataUri")]
    audio_data_uri: String,
}

/// Production synthesis collaborator: posts `{text}` (plus the pinned voice,
/// if any) and expects `{audioDataUri}`.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    /// Full endpoint URL.
    pub endpoint: String,
    /// Optional bearer API key.
    pub api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    /// Build from environment: `SPEECH_API_URL` (required), `SPEECH_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = std::env::var("SPEECH_API_URL")
            .map_err(|_| VoiceError::Config("SPEECH_API_URL not set".to_string()))?;
        let api_key = std::env::var("SPEECH_API_KEY").ok();
        Self::new(endpoint, api_key)
    }

    fn post(&self, body: &serde_json::Value) -> VoiceResult<reqwest::blocking::Response> {
        let mut req = self.client.post(&self.endpoint).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "synthesis API error {}: {}",
                status, body
            )));
        }
        Ok(res)
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
        let text = request.text.trim();
        if text.is_empty() {
            return Ok(SynthesizedSpeech::default());
        }
        let mut body = serde_json::json!({ "text": text });
        if let Some(ref voice) = request.voice {
            body["voice"] = serde_json::Value::String(voice.clone());
        }
        let res = self.post(&body)?;
        let parsed: SpeakResponse = res
            .json()
            .map_err(|e| VoiceError::Synthesis(format!("malformed synthesis body: {}", e)))?;
        let clip = decode_data_uri(&parsed.audio_data_uri)?;
        debug!(mime = %clip.mime, bytes = clip.bytes.len(), "synthesized clip");
        Ok(SynthesizedSpeech {
            clip: Some(clip),
            translation: None,
        })
    }
}

/// Translating synthesis collaborator: translates from the session language
/// to `target_language` and speaks the translation.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    /// Full endpoint URL.
    pub endpoint: String,
    /// Optional bearer API key.
    pub api_key: Option<String>,
    /// BCP-47 tag of the language spoken back to the user.
    pub target_language: String,
    client: reqwest::blocking::Client,
}

impl HttpTranslator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        target_language: impl Into<String>,
    ) -> VoiceResult<Self> {
        let target_language = target_language.into();
        if !language_catalog()
            .iter()
            .any(|v| v.language.eq_ignore_ascii_case(&target_language))
        {
            return Err(VoiceError::Config(format!(
                "unsupported target language: {}",
                target_language
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            target_language,
            client,
        })
    }

    /// Build from environment: `TRANSLATE_API_URL`, `TRANSLATE_TARGET_LANG`
    /// (required), `TRANSLATE_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = std::env::var("TRANSLATE_API_URL")
            .map_err(|_| VoiceError::Config("TRANSLATE_API_URL not set".to_string()))?;
        let target = std::env::var("TRANSLATE_TARGET_LANG")
            .map_err(|_| VoiceError::Config("TRANSLATE_TARGET_LANG not set".to_string()))?;
        let api_key = std::env::var("TRANSLATE_API_KEY").ok();
        Self::new(endpoint, api_key, target)
    }
}

impl Synthesizer for HttpTranslator {
    fn synthesize(&self, request: &SynthesisRequest) -> VoiceResult<SynthesizedSpeech> {
        let text = request.text.trim();
        if text.is_empty() {
            return Ok(SynthesizedSpeech::default());
        }
        let body = serde_json::json!({
            "text": text,
            "sourceLanguage": request.language,
            "targetLanguage": self.target_language,
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "translation API error {}: {}",
                status, body
            )));
        }
        let parsed: TranslateResponse = res
            .json()
            .map_err(|e| VoiceError::Synthesis(format!("malformed translation body: {}", e)))?;
        let clip = decode_data_uri(&parsed.audio_data_uri)?;
        Ok(SynthesizedSpeech {
            clip: Some(clip),
            translation: Some(parsed.translation),
        })
    }

    fn voices(&self) -> Vec<Voice> {
        language_catalog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_wav_data_uri() {
        let uri = format!("data:audio/wav;base64,{}", BASE64.encode(b"RIFFdata"));
        let clip = decode_data_uri(&uri).unwrap();
        assert_eq!(clip.mime, "audio/wav");
        assert_eq!(clip.bytes, b"RIFFdata");
    }

    #[test]
    fn decode_rejects_non_data_uri() {
        assert!(decode_data_uri("https://example.com/a.wav").is_err());
        assert!(decode_data_uri("data:audio/wav,plain").is_err());
        assert!(decode_data_uri("data:audio/wav;base64,!!!").is_err());
    }

    #[test]
    fn catalog_has_defaults_per_language() {
        let catalog = language_catalog();
        assert_eq!(catalog.len(), 7);
        assert!(catalog.iter().all(|v| v.default_for_language));
        assert!(catalog
            .iter()
            .any(|v| v.language == "en-US" && v.name == "en-US-Neural2-J"));
    }

    #[test]
    fn silent_synthesizer_produces_no_clip() {
        let s = SilentSynthesizer;
        let out = s
            .synthesize(&SynthesisRequest {
                text: "hello".to_string(),
                language: "en-US".to_string(),
                voice: None,
                rate: 1.0,
            })
            .unwrap();
        assert!(out.clip.is_none());
        assert!(out.translation.is_none());
    }

    #[test]
    fn translator_rejects_unknown_target() {
        let t = HttpTranslator::new("http://localhost/flow", None, "xx-XX");
        assert!(t.is_err());
    }
}

//! Audio output seam: the single speaker device behind a trait.
//!
//! `RodioOutput` plays decoded clips and rendered tone PCM through one shared
//! `rodio::Sink`; `stop()` is the interruption kill-switch that clears the
//! queue and falls silent. `SilentOutput` is the headless stand-in.

use crate::error::{VoiceError, VoiceResult};
use crate::synthesis::AudioClip;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::{Arc, Condvar, Mutex};
use tracing::info;

/// The one audio output device. At most one utterance is audible at a time;
/// `stop()` cancels whatever is queued, system-wide.
pub trait AudioOutput: Send + Sync {
    /// Queue a decoded clip for playback.
    fn play(&self, clip: &AudioClip) -> VoiceResult<()>;

    /// Queue raw mono PCM (tone cues).
    fn play_pcm(&self, samples: &[f32], sample_rate: u32);

    /// Stop playback immediately and clear the queue.
    fn stop(&self);

    /// Whether anything is queued or audible.
    fn is_active(&self) -> bool;

    /// Block until the queue drains. Call from `spawn_blocking`, never from
    /// the controller loop.
    fn wait_idle(&self);
}

/// Speaker-backed output using rodio.
pub struct RodioOutput {
    sink: Arc<Sink>,
}

impl RodioOutput {
    /// Open the default output device.
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        // The OutputStream is !Send and must outlive the sink; it is leaked so
        // the device handle survives while this output moves across threads.
        std::mem::forget(stream);
        info!("RodioOutput: sink ready");
        Ok(Self {
            sink: Arc::new(sink),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn play(&self, clip: &AudioClip) -> VoiceResult<()> {
        if clip.bytes.is_empty() {
            return Ok(());
        }
        let cursor = Cursor::new(clip.bytes.clone());
        let source = rodio::Decoder::new(cursor)
            .map_err(|e| VoiceError::Playback(format!("decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    fn play_pcm(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }
        self.sink
            .append(SamplesBuffer::new(1, sample_rate, samples.to_vec()));
    }

    fn stop(&self) {
        self.sink.stop();
    }

    fn is_active(&self) -> bool {
        !self.sink.empty()
    }

    fn wait_idle(&self) {
        self.sink.sleep_until_end();
    }
}

/// Headless output. In the default mode every clip finishes instantly; in
/// `held` mode a clip stays audible until `finish()` or `stop()`, which lets
/// tests keep the session in the Speaking phase while they barge in.
#[derive(Default)]
pub struct SilentOutput {
    hold: bool,
    active: Mutex<bool>,
    drained: Condvar,
}

impl SilentOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn held() -> Arc<Self> {
        Arc::new(Self {
            hold: true,
            ..Self::default()
        })
    }

    /// Complete the held clip as if it played to the end.
    pub fn finish(&self) {
        let mut active = self.active.lock().unwrap();
        *active = false;
        self.drained.notify_all();
    }
}

impl AudioOutput for SilentOutput {
    fn play(&self, _clip: &AudioClip) -> VoiceResult<()> {
        if self.hold {
            *self.active.lock().unwrap() = true;
        }
        Ok(())
    }

    fn play_pcm(&self, _samples: &[f32], _sample_rate: u32) {}

    fn stop(&self) {
        self.finish();
    }

    fn is_active(&self) -> bool {
        *self.active.lock().unwrap()
    }

    fn wait_idle(&self) {
        let mut active = self.active.lock().unwrap();
        while *active {
            active = self.drained.wait(active).unwrap();
        }
    }
}

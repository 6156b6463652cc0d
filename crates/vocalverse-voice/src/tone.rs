//! Tone feedback unit: short audible cues rendered to PCM.
//!
//! Stateless: the controller renders a cue and hands the samples to the
//! shared audio output. Envelope: 10ms linear attack to peak gain, then
//! exponential decay toward silence; the confirmation cue sweeps upward.

use std::time::Duration;

/// Sample rate the cues are rendered at.
pub const TONE_SAMPLE_RATE: u32 = 44_100;

/// Decay target relative to peak gain (the tail rings down to -80dB).
const DECAY_FLOOR: f32 = 1.0e-4;

/// The three audible cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneKind {
    /// Capture started listening.
    ListenStart,
    /// Capture stopped listening.
    ListenEnd,
    /// An utterance was accepted.
    Confirmation,
}

/// Oscillator parameters for one cue.
#[derive(Debug, Clone, Copy)]
pub struct ToneSpec {
    pub start_hz: f32,
    pub end_hz: f32,
    pub duration: Duration,
    pub peak_gain: f32,
}

impl ToneKind {
    pub fn spec(self) -> ToneSpec {
        match self {
            ToneKind::ListenStart => ToneSpec {
                start_hz: 440.0,
                end_hz: 440.0,
                duration: Duration::from_millis(100),
                peak_gain: 0.1,
            },
            ToneKind::ListenEnd => ToneSpec {
                start_hz: 330.0,
                end_hz: 330.0,
                duration: Duration::from_millis(100),
                peak_gain: 0.1,
            },
            ToneKind::Confirmation => ToneSpec {
                start_hz: 523.25,
                end_hz: 783.99,
                duration: Duration::from_millis(150),
                peak_gain: 0.1,
            },
        }
    }
}

/// Render a cue to mono f32 PCM at the given sample rate.
pub fn render(spec: ToneSpec, sample_rate: u32) -> Vec<f32> {
    let total = (spec.duration.as_secs_f32() * sample_rate as f32) as usize;
    let attack = ((sample_rate as f32) * 0.010) as usize;
    let mut samples = Vec::with_capacity(total);
    let mut phase = 0.0f32;

    for i in 0..total {
        let t = i as f32 / total.max(1) as f32;
        let freq = spec.start_hz + (spec.end_hz - spec.start_hz) * t;
        phase += 2.0 * std::f32::consts::PI * freq / sample_rate as f32;

        let env = if i < attack {
            spec.peak_gain * i as f32 / attack as f32
        } else {
            let d = (i - attack) as f32 / (total.saturating_sub(attack)).max(1) as f32;
            spec.peak_gain * DECAY_FLOOR.powf(d)
        };
        samples.push(phase.sin() * env);
    }
    samples
}

//! Voice-activity detection trait boundary (spec §4.4 / GLOSSARY: "the
//! energy/noise-floor heuristic of §4.4 is the default VAD, but a plugin
//! VAD may replace it"). `EnergyVad` carries the recognizer's own loudness
//! heuristic so it can be swapped out uniformly with any other `Vad`
//! implementation through the same `PluginRegistry` seam as STT/hotword.

use crate::audio::AudioFrame;

const DAMPING: f64 = 0.15;

/// Per-frame speech/non-speech classifier fed one frame at a time by the
/// recognizer's `Recording` state (spec §4.4).
pub trait Vad: Send {
    fn is_loud(&mut self, frame: &AudioFrame, chunk_duration_secs: f64) -> bool;
}

/// The spec's default VAD: an adaptive RMS threshold. `threshold` tracks
/// ambient energy via exponential damping; a frame is loud iff its energy
/// exceeds `threshold * multiplier`.
pub struct EnergyVad {
    multiplier: f64,
    energy_ratio: f64,
    threshold: f64,
}

impl EnergyVad {
    pub fn new(multiplier: f64, energy_ratio: f64) -> Self {
        Self {
            multiplier,
            energy_ratio,
            threshold: 0.0,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(1.0, 1.5)
    }
}

impl Vad for EnergyVad {
    fn is_loud(&mut self, frame: &AudioFrame, chunk_duration_secs: f64) -> bool {
        let energy = frame.rms();
        let damping_factor = DAMPING.powf(chunk_duration_secs);
        self.threshold = damping_factor * self.threshold + (1.0 - damping_factor) * energy * self.energy_ratio;
        energy > self.threshold * self.multiplier
    }
}

/// Neural VAD backed by `voice_activity_detector` (grounded in the teacher's
/// `speech_listener.rs` `EndOfSpeechDetector`, which wraps the same crate).
/// Unlike `EnergyVad` this model expects a fixed `chunk_size`/`sample_rate`
/// it was built with; frames of a different shape are rejected at
/// construction time by the underlying builder.
pub struct SileroVad {
    detector: voice_activity_detector::VoiceActivityDetector,
    probability_threshold: f32,
}

impl SileroVad {
    pub fn new(sample_rate: u32, chunk_size: usize, probability_threshold: f32) -> crate::error::Result<Self> {
        let detector = voice_activity_detector::VoiceActivityDetector::builder()
            .sample_rate(sample_rate)
            .chunk_size(chunk_size)
            .build()
            .map_err(|e| crate::error::ListenerError::PluginLoad {
                plugin_id: "silero_vad".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            detector,
            probability_threshold,
        })
    }
}

impl Vad for SileroVad {
    fn is_loud(&mut self, frame: &AudioFrame, _chunk_duration_secs: f64) -> bool {
        let samples: Vec<f32> = frame
            .bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect();
        self.detector.predict(samples) > self.probability_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amp: i16) -> AudioFrame {
        AudioFrame {
            bytes: (0..160).flat_map(|_| amp.to_le_bytes()).collect(),
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
        }
    }

    #[test]
    fn energy_vad_adapts_threshold_upward_after_loud_frames() {
        let mut vad = EnergyVad::default();
        assert!(!vad.is_loud(&tone(0), 0.01));
        let first = vad.is_loud(&tone(20000), 0.01);
        assert!(first);
        // After the threshold has adapted to a loud run, the same amplitude
        // should eventually stop registering as newly "loud" relative to it.
        for _ in 0..50 {
            vad.is_loud(&tone(20000), 0.01);
        }
        assert!(vad.threshold > 0.0);
    }
}

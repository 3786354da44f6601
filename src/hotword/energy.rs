//! Reference hot-word engine: an RMS-threshold matcher.
//!
//! Not an acoustic wake-word model: a deliberately simple, dependency-free
//! `HotwordEngine` used as the crate's degrade-gracefully default and in
//! tests, standing in for the ONNX/Precise-class plugins real deployments
//! configure (spec §1: concrete wake-word algorithms are a plugin concern).

use crate::audio::AudioFrame;
use crate::hotword::HotwordEngine;

pub struct EnergyHotword {
    /// RMS threshold normalized to `[0, 1]` of full scale.
    threshold: f64,
    /// Minimum fraction of the test window that must be above threshold.
    min_active_fraction: f64,
}

impl EnergyHotword {
    pub fn new(threshold: f64, min_active_fraction: f64) -> Self {
        Self {
            threshold,
            min_active_fraction,
        }
    }

    fn window_rms_norm(window: &[u8]) -> f64 {
        if window.len() < 2 {
            return 0.0;
        }
        let samples: Vec<i16> = window
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_sq / samples.len() as f64).sqrt();
        rms / 32768.0
    }
}

impl HotwordEngine for EnergyHotword {
    fn update(&mut self, _frame: &AudioFrame) {}

    fn found_wake_word(&mut self, window: &[u8]) -> bool {
        if window.is_empty() {
            return false;
        }
        // Split into 20ms-equivalent sub-windows (assume 16kHz/16-bit mono:
        // 640 bytes) to estimate what fraction of the window is loud enough.
        const SUB_WINDOW_BYTES: usize = 640;
        let sub_windows: Vec<&[u8]> = window.chunks(SUB_WINDOW_BYTES.min(window.len().max(2))).collect();
        if sub_windows.is_empty() {
            return false;
        }
        let loud = sub_windows
            .iter()
            .filter(|w| Self::window_rms_norm(w) > self.threshold)
            .count();
        (loud as f64 / sub_windows.len() as f64) >= self.min_active_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_amplitude(amp: i16, samples: usize) -> Vec<u8> {
        (0..samples).flat_map(|_| amp.to_le_bytes()).collect()
    }

    #[test]
    fn silence_never_triggers() {
        let mut engine = EnergyHotword::new(0.1, 0.5);
        let window = frame_with_amplitude(0, 4000);
        assert!(!engine.found_wake_word(&window));
    }

    #[test]
    fn loud_tone_triggers_above_threshold() {
        let mut engine = EnergyHotword::new(0.1, 0.5);
        let window = frame_with_amplitude(20000, 4000);
        assert!(engine.found_wake_word(&window));
    }

    #[test]
    fn update_is_a_no_op_but_callable() {
        let mut engine = EnergyHotword::new(0.1, 0.5);
        let frame = AudioFrame::silence(160, 16000, 2, 1);
        engine.update(&frame);
    }
}

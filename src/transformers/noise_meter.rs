//! Built-in background-noise meter (spec §4.2).
//!
//! Maintains a rolling ≤5s window of per-frame loudness, excludes the
//! ~0.7s immediately before the most recent wake-word detection (that
//! window is typically dominated by the wake phrase itself, not ambient
//! noise), and reports the average as `noise_level` (dB) on utterance end.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audio::{AudioClip, AudioFrame};
use crate::error::Result;
use crate::transformers::{AudioTransformer, Context};

const WINDOW: Duration = Duration::from_secs(5);
const WW_EXCLUDE: Duration = Duration::from_millis(700);

pub struct BackgroundNoiseMeter {
    samples: VecDeque<(Instant, f64)>,
    last_wakeword_at: Option<Instant>,
}

impl Default for BackgroundNoiseMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundNoiseMeter {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            last_wakeword_at: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn excluded(&self, t: Instant) -> bool {
        match self.last_wakeword_at {
            Some(ww) if ww >= t => ww.duration_since(t) <= WW_EXCLUDE,
            _ => false,
        }
    }

    fn noise_level_db(&self) -> f64 {
        let values: Vec<f64> = self
            .samples
            .iter()
            .filter(|(t, _)| !self.excluded(*t))
            .map(|(_, db)| *db)
            .filter(|db| db.is_finite())
            .collect();
        if values.is_empty() {
            return -f64::INFINITY;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl AudioTransformer for BackgroundNoiseMeter {
    fn name(&self) -> &str {
        "background_noise_meter"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn on_audio(&mut self, frame: &AudioFrame) {
        let now = Instant::now();
        self.samples.push_back((now, frame.dbfs()));
        self.prune(now);
    }

    fn on_hotword(&mut self, _frame: &AudioFrame) {
        self.last_wakeword_at = Some(Instant::now());
    }

    fn on_speech_end(&mut self, clip: AudioClip) -> Result<(AudioClip, Context)> {
        let mut ctx = Context::new();
        let level = self.noise_level_db();
        if level.is_finite() {
            ctx.insert(
                "noise_level".into(),
                Value::from(serde_json::Number::from_f64(level).unwrap_or(0.into())),
            );
        }
        Ok((clip, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_average_of_rolling_window() {
        let mut meter = BackgroundNoiseMeter::new();
        let quiet = AudioFrame::silence(160, 16000, 2, 1);
        for _ in 0..5 {
            meter.on_audio(&quiet);
        }
        let clip = AudioClip::new(16000, 2, 1);
        let (_clip, ctx) = meter.on_speech_end(clip).unwrap();
        // Pure silence is -inf dBFS, which we don't report.
        assert!(!ctx.contains_key("noise_level"));
    }
}

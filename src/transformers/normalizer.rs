//! Built-in silence trimmer/normalizer (spec §4.2).
//!
//! Trims leading/trailing silence at `clip.dBFS() + 10 dB`, applies gain to
//! reach a target loudness (default −18 dBFS), and writes the result to a
//! temporary WAV file, adding `audio_filename` to the transformer context.

use serde_json::Value;
use std::path::PathBuf;

use crate::audio::AudioClip;
use crate::error::{ListenerError, Result};
use crate::transformers::{AudioTransformer, Context};

const WINDOW_MS: u64 = 20;
const SILENCE_THRESHOLD_OFFSET_DB: f64 = 10.0;

pub struct SilenceNormalizer {
    target_dbfs: f64,
    temp_dir: PathBuf,
}

impl SilenceNormalizer {
    pub fn new(target_dbfs: f64, temp_dir: PathBuf) -> Self {
        Self { target_dbfs, temp_dir }
    }

    fn window_samples(sample_rate: u32) -> usize {
        ((sample_rate as u64 * WINDOW_MS) / 1000).max(1) as usize
    }

    fn window_dbfs(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return -f64::INFINITY;
        }
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_sq / samples.len() as f64).sqrt();
        if rms <= 0.0 {
            -f64::INFINITY
        } else {
            20.0 * (rms / 32768.0).log10()
        }
    }

    fn overall_dbfs(samples: &[i16]) -> f64 {
        Self::window_dbfs(samples)
    }

    fn trim_silence(samples: &[i16], sample_rate: u32) -> &[i16] {
        let window = Self::window_samples(sample_rate);
        if samples.len() <= window {
            return samples;
        }
        let overall = Self::overall_dbfs(samples);
        let threshold = overall + SILENCE_THRESHOLD_OFFSET_DB;

        let windows: Vec<&[i16]> = samples.chunks(window).collect();
        let first_loud = windows
            .iter()
            .position(|w| Self::window_dbfs(w) > threshold)
            .unwrap_or(0);
        let last_loud = windows
            .iter()
            .rposition(|w| Self::window_dbfs(w) > threshold)
            .unwrap_or(windows.len() - 1);
        if first_loud > last_loud {
            return samples;
        }
        let start = first_loud * window;
        let end = ((last_loud + 1) * window).min(samples.len());
        &samples[start..end]
    }

    fn write_temp_wav(&self, samples: &[i16], clip: &AudioClip) -> Result<PathBuf> {
        let filename = format!("neon_listener_{}.wav", uuid::Uuid::new_v4());
        let path = self.temp_dir.join(filename);
        let spec = hound::WavSpec {
            channels: clip.channels,
            sample_rate: clip.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| ListenerError::Decode(e.to_string()))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| ListenerError::Decode(e.to_string()))?;
        }
        writer.finalize().map_err(|e| ListenerError::Decode(e.to_string()))?;
        Ok(path)
    }
}

impl AudioTransformer for SilenceNormalizer {
    fn name(&self) -> &str {
        "silence_normalizer"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn on_speech_end(&mut self, clip: AudioClip) -> Result<(AudioClip, Context)> {
        if clip.is_empty() {
            return Ok((clip, Context::new()));
        }
        let samples: Vec<i16> = clip
            .bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        let trimmed = Self::trim_silence(&samples, clip.sample_rate);
        let current_dbfs = Self::overall_dbfs(trimmed);
        let gain_db = if current_dbfs.is_finite() {
            self.target_dbfs - current_dbfs
        } else {
            0.0
        };
        let gain_linear = 10f64.powf(gain_db / 20.0);

        let gained: Vec<i16> = trimmed
            .iter()
            .map(|&s| {
                let scaled = s as f64 * gain_linear;
                scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
            })
            .collect();

        let mut out = AudioClip::new(clip.sample_rate, clip.sample_width, clip.channels);
        out.bytes = gained.iter().flat_map(|s| s.to_le_bytes()).collect();

        let path = self.write_temp_wav(&gained, &out)?;

        let mut ctx = Context::new();
        ctx.insert(
            "audio_filename".into(),
            Value::String(path.to_string_lossy().into_owned()),
        );
        Ok((out, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_clip(seconds: f64, amplitude: i16) -> AudioClip {
        let sample_rate = 16000u32;
        let n = (sample_rate as f64 * seconds) as usize;
        let mut clip = AudioClip::new(sample_rate, 2, 1);
        clip.bytes = (0..n).flat_map(|_| amplitude.to_le_bytes()).collect();
        clip
    }

    #[test]
    fn trims_leading_and_trailing_silence() {
        let mut clip = tone_clip(0.05, 0);
        clip.bytes.extend(tone_clip(0.2, 20000).bytes);
        clip.bytes.extend(tone_clip(0.05, 0).bytes);

        let mut n = SilenceNormalizer::new(-18.0, std::env::temp_dir());
        let (out, ctx) = n.on_speech_end(clip.clone()).unwrap();
        assert!(out.bytes.len() < clip.bytes.len());
        assert!(ctx.contains_key("audio_filename"));
    }

    #[test]
    fn normalizes_towards_target_loudness() {
        let clip = tone_clip(0.1, 1000);
        let mut n = SilenceNormalizer::new(-18.0, std::env::temp_dir());
        let (out, _ctx) = n.on_speech_end(clip).unwrap();
        let samples: Vec<i16> = out
            .bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        let dbfs = SilenceNormalizer::overall_dbfs(&samples);
        assert!((dbfs - (-18.0)).abs() < 1.0);
    }
}

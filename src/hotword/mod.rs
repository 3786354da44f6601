//! C3: hot-word engine set (spec §4.3).

pub mod energy;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audio::AudioFrame;

pub const SEC_BETWEEN_WW_CHECKS: Duration = Duration::from_millis(200);
/// Default phoneme duration in milliseconds (spec §4.3, `phoneme_duration`
/// config default in §6).
pub const DEFAULT_PHONEME_DURATION_MS: u64 = 120;

/// Configuration for one named hot-word (spec §3).
#[derive(Debug, Clone)]
pub struct HotwordSpec {
    pub name: String,
    pub engine_id: String,
    pub active: bool,
    pub listen: bool,
    pub utterance: Option<String>,
    pub sound: Option<PathBuf>,
    pub phonemes: Option<String>,
    pub config: serde_json::Map<String, Value>,
}

impl HotwordSpec {
    /// `TEST_WW_SEC = max(10, longest_phoneme_count) * phoneme_duration_ms / 1000`.
    /// `longest_phoneme_count` is the number of space-separated phonemes in
    /// this word's `phonemes` field; absent phonemes fall back to 10.
    pub fn test_ww_secs(&self, phoneme_duration_ms: u64) -> f64 {
        let count = self
            .phonemes
            .as_deref()
            .map(|p| p.split_whitespace().count())
            .unwrap_or(0)
            .max(10) as f64;
        count * phoneme_duration_ms as f64 / 1000.0
    }
}

/// Contract every wake/hot-word engine implements (spec §4.3).
pub trait HotwordEngine: Send {
    /// Streaming update, called once per audio frame for every active engine.
    fn update(&mut self, frame: &AudioFrame);

    /// Point query over the last `TEST_WW_SEC` of audio, polled every
    /// `SEC_BETWEEN_WW_CHECKS`.
    fn found_wake_word(&mut self, window: &[u8]) -> bool;
}

#[derive(Debug, Clone)]
pub struct HotwordDetection {
    pub name: String,
    pub listen: bool,
    pub utterance: Option<String>,
}

/// Shared, lock-guarded table of hot-word specs (spec §4.7: `get_wake_words`/
/// `enable_wake_word`/`disable_wake_word` read and mutate this from the bus
/// facade, while the producer thread reads it once per `process_frame` call
/// to decide which engines are active). Kept separate from the engines
/// themselves so C7 never needs a handle onto producer-owned engine state.
pub type SharedSpecs = Arc<Mutex<Vec<HotwordSpec>>>;

struct Entry {
    name: String,
    engine: Box<dyn HotwordEngine>,
}

/// Holds the active set of hot-word engines, feeds every frame to every
/// active engine, and polls `found_wake_word` on a fixed cadence.
pub struct HotwordRegistry {
    specs: SharedSpecs,
    entries: Vec<Entry>,
    rolling: VecDeque<u8>,
    max_window_bytes: usize,
    bytes_per_sec: usize,
    last_check: Instant,
    phoneme_duration_ms: u64,
}

impl HotwordRegistry {
    pub fn new(
        entries: Vec<(HotwordSpec, Box<dyn HotwordEngine>)>,
        sample_rate: u32,
        sample_width: u16,
        channels: u16,
        phoneme_duration_ms: u64,
    ) -> Self {
        let bytes_per_sec = sample_rate as usize * sample_width as usize * channels as usize;
        let max_test_secs = entries
            .iter()
            .map(|(spec, _)| spec.test_ww_secs(phoneme_duration_ms))
            .fold(0.0_f64, f64::max)
            .max(1.0);
        let mut specs = Vec::with_capacity(entries.len());
        let mut built = Vec::with_capacity(entries.len());
        for (spec, engine) in entries {
            built.push(Entry {
                name: spec.name.clone(),
                engine,
            });
            specs.push(spec);
        }
        Self {
            specs: Arc::new(Mutex::new(specs)),
            entries: built,
            rolling: VecDeque::new(),
            max_window_bytes: (max_test_secs * bytes_per_sec as f64) as usize,
            bytes_per_sec,
            last_check: Instant::now(),
            phoneme_duration_ms,
        }
    }

    /// A clone of the shared spec table handle, given to the `Service`/bus
    /// facade so C7 handlers can inspect and mutate hot-word state without
    /// reaching into producer-owned engine internals.
    pub fn shared_specs(&self) -> SharedSpecs {
        self.specs.clone()
    }

    /// C8 reload (spec §4.8): swaps the active engine set in place, reusing
    /// the existing `shared_specs()` handle so any outstanding `Arc` the bus
    /// facade holds observes the new hot-words immediately rather than
    /// going stale.
    pub fn replace_entries(
        &mut self,
        entries: Vec<(HotwordSpec, Box<dyn HotwordEngine>)>,
        sample_rate: u32,
        sample_width: u16,
        channels: u16,
        phoneme_duration_ms: u64,
    ) {
        let bytes_per_sec = sample_rate as usize * sample_width as usize * channels as usize;
        let max_test_secs = entries
            .iter()
            .map(|(spec, _)| spec.test_ww_secs(phoneme_duration_ms))
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut new_specs = Vec::with_capacity(entries.len());
        let mut new_entries = Vec::with_capacity(entries.len());
        for (spec, engine) in entries {
            new_entries.push(Entry {
                name: spec.name.clone(),
                engine,
            });
            new_specs.push(spec);
        }

        *self.specs.lock().expect("hotword spec table poisoned") = new_specs;
        self.entries = new_entries;
        self.rolling.clear();
        self.max_window_bytes = (max_test_secs * bytes_per_sec as f64) as usize;
        self.bytes_per_sec = bytes_per_sec;
        self.phoneme_duration_ms = phoneme_duration_ms;
    }

    /// Sets the `active` flag of the named spec, if it exists. Used by the
    /// producer thread when applying a `ProducerCommand::SetHotwordActive`.
    pub fn set_active(&self, name: &str, active: bool) {
        if let Some(spec) = self
            .specs
            .lock()
            .expect("hotword spec table poisoned")
            .iter_mut()
            .find(|s| s.name == name)
        {
            spec.active = active;
        }
    }

    /// Count of currently active, `listen=true` hot-words (spec §8 invariant:
    /// this must never reach 0 after a `disable_wake_word` call).
    pub fn active_listen_count(&self) -> usize {
        self.specs
            .lock()
            .expect("hotword spec table poisoned")
            .iter()
            .filter(|s| s.active && s.listen)
            .count()
    }

    /// Feed one frame to every active engine and, on the `SEC_BETWEEN_WW_CHECKS`
    /// cadence, poll `found_wake_word` across the rolling window. Returns any
    /// detections from this call (usually empty).
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Vec<HotwordDetection> {
        let specs = self.specs.lock().expect("hotword spec table poisoned").clone();
        let active_names: std::collections::HashSet<&str> = specs
            .iter()
            .filter(|s| s.active)
            .map(|s| s.name.as_str())
            .collect();

        for entry in self.entries.iter_mut().filter(|e| active_names.contains(e.name.as_str())) {
            entry.engine.update(frame);
        }

        self.rolling.extend(frame.bytes.iter().copied());
        while self.rolling.len() > self.max_window_bytes {
            self.rolling.pop_front();
        }

        let now = Instant::now();
        if now.duration_since(self.last_check) < SEC_BETWEEN_WW_CHECKS {
            return Vec::new();
        }
        self.last_check = now;

        let rolling_contig: Vec<u8> = self.rolling.iter().copied().collect();
        let mut detections = Vec::new();
        for entry in self.entries.iter_mut() {
            let Some(spec) = specs.iter().find(|s| s.name == entry.name) else {
                continue;
            };
            if !spec.active {
                continue;
            }
            let window_secs = spec.test_ww_secs(self.phoneme_duration_ms);
            let window_bytes = (window_secs * self.bytes_per_sec as f64) as usize;
            let start = rolling_contig.len().saturating_sub(window_bytes);
            if entry.engine.found_wake_word(&rolling_contig[start..]) {
                detections.push(HotwordDetection {
                    name: spec.name.clone(),
                    listen: spec.listen,
                    utterance: spec.utterance.clone(),
                });
            }
        }
        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotword::energy::EnergyHotword;

    fn spec(name: &str, listen: bool) -> HotwordSpec {
        HotwordSpec {
            name: name.into(),
            engine_id: "energy".into(),
            active: true,
            listen,
            utterance: None,
            sound: None,
            phonemes: Some("h ey".into()),
            config: Default::default(),
        }
    }

    #[test]
    fn test_ww_secs_floors_at_ten_phonemes() {
        let s = spec("hey", true);
        assert_eq!(s.test_ww_secs(120), 10.0 * 0.12);
    }

    #[test]
    fn active_listen_count_reflects_active_and_listen_flags() {
        let entries: Vec<(HotwordSpec, Box<dyn HotwordEngine>)> = vec![
            (spec("a", true), Box::new(EnergyHotword::new(0.5, 0.1))),
            (spec("b", false), Box::new(EnergyHotword::new(0.5, 0.1))),
        ];
        let registry = HotwordRegistry::new(entries, 16000, 2, 1, 120);
        assert_eq!(registry.active_listen_count(), 1);
    }
}

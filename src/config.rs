//! Configuration surface (spec §6) and the `ConfigProvider` trait boundary
//! (spec §1: "configuration file parsing and XDG lookup as a *system*" is
//! out of scope; one concrete file-backed provider is supplied).

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ListenerError, Result};

/// `listener.VAD` config sub-section (spec §6, GLOSSARY): which `Vad`
/// plugin backs the recognizer's loud/quiet classification during
/// `Recording`. `"energy"` is the built-in default; other ids are resolved
/// through the `PluginRegistry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub module: String,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            module: "energy".into(),
            config: Default::default(),
        }
    }
}

/// `listener` config section (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub sample_rate: u32,
    pub sample_width: u16,
    pub channels: u16,
    pub wake_word_enabled: bool,
    pub phoneme_duration_ms: u64,
    pub save_utterances: bool,
    /// Persist the pre-roll wake-word frame buffer alongside a recorded
    /// utterance, as an "optional debugging side-effect" (spec §1
    /// Non-goals carve-out); not yet wired to a disk writer.
    pub record_wake_words: bool,
    pub multiplier: f64,
    pub energy_ratio: f64,
    pub stand_up_word: String,
    /// Mute the mic while audio output is playing (spec §6); the bus topic
    /// a TTS/output service would emit to drive this isn't in this crate's
    /// consumed-topic table, so this is carried but unwired.
    pub mute_during_output: bool,
    /// Gates `neon.get_stt`/`neon.audio_input` (spec §4.7 supplement).
    pub enable_stt_api: bool,
    /// Gates whether `Service::bootstrap` spawns the producer/consumer
    /// pipeline at all (spec §6 supplement).
    pub enable_voice_loop: bool,
    pub vad: VadConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
            wake_word_enabled: true,
            phoneme_duration_ms: 120,
            save_utterances: false,
            record_wake_words: false,
            multiplier: 1.0,
            energy_ratio: 1.5,
            stand_up_word: "wake up".into(),
            mute_during_output: true,
            enable_stt_api: true,
            enable_voice_loop: true,
            vad: VadConfig::default(),
        }
    }
}

/// `stt` config section (spec §4.5 selection rules).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SttConfig {
    pub module: Option<String>,
    pub fallback_module: Option<String>,
    pub offline_module: Option<String>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

/// One entry of the `hotwords` config section (spec §3 `HotwordSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotwordConfigEntry {
    pub module: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub listen: bool,
    pub utterance: Option<String>,
    pub sound: Option<PathBuf>,
    pub phonemes: Option<String>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Top-level config (spec §6: YAML, `listener`/`stt`/`hotwords`/`lang`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub stt: SttConfig,
    pub hotwords: std::collections::BTreeMap<String, HotwordConfigEntry>,
    pub lang: String,
}

/// Persistence boundary (spec §1): `load`/`persist` against whatever
/// backing store holds the config. A full XDG search path resolver is
/// explicitly out of scope; `FileConfigProvider` below is the one concrete
/// implementation this crate ships.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<Config>;
    fn persist(&self, config: &Config) -> Result<()>;
}

/// Reads/writes a single YAML file path, via `serde_norway` (spec §1
/// ambient stack, matching the pack's `voiceterm` crate's YAML usage).
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `dirs`-based default location, standing in for full XDG search
    /// (spec §1: a single concrete provider, not a search-path resolver).
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| ListenerError::ConfigInvalid("no config directory".into()))?;
        Ok(Self::new(base.join("neon-listener").join("listener.yaml")))
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let text = fs::read_to_string(&self.path).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))?;
        serde_norway::from_str(&text).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))
    }

    fn persist(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))?;
        }
        let text = serde_norway::to_string(config).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))
    }
}

/// Recursive JSON-object merge (spec §4.8 supplement): object keys merge
/// key-by-key, scalars/arrays are replaced wholesale by the patch's value.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// Applies a JSON patch to a `Config` by round-tripping through
/// `serde_json::Value` (spec §4.8 supplement).
pub fn apply_patch(config: &Config, patch: &Value) -> Result<Config> {
    let mut value = serde_json::to_value(config).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))?;
    deep_merge(&mut value, patch);
    serde_json::from_value(value).map_err(|e| ListenerError::ConfigInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_replaces_scalars_and_merges_objects() {
        let mut base = json_helper();
        let patch = serde_json::json!({"listener": {"sample_rate": 44100}, "lang": "es-ES"});
        deep_merge(&mut base, &patch);
        assert_eq!(base["listener"]["sample_rate"], 44100);
        assert_eq!(base["listener"]["channels"], 1);
        assert_eq!(base["lang"], "es-ES");
    }

    fn json_helper() -> Value {
        serde_json::to_value(Config::default()).unwrap()
    }

    #[test]
    fn apply_patch_round_trips_through_config() {
        let config = Config::default();
        let patched = apply_patch(&config, &serde_json::json!({"lang": "fr-FR"})).unwrap();
        assert_eq!(patched.lang, "fr-FR");
        assert_eq!(patched.listener.sample_rate, 16000);
    }
}

//! `PluginRegistry` trait boundary (spec §1: "plugin discovery/installation
//! as a *system*" is out of scope; concrete built-ins are registered
//! directly here rather than discovered via dynamic loading).

use std::collections::HashMap;

use crate::error::{ListenerError, Result};
use crate::hotword::HotwordEngine;
use crate::hotword::energy::EnergyHotword;
use crate::stt::SttPlugin;
use crate::stt::google::GoogleSttPlugin;
use crate::stt::whisper::WhisperSttPlugin;
use crate::transformers::AudioTransformer;
use crate::transformers::noise_meter::BackgroundNoiseMeter;
use crate::transformers::normalizer::SilenceNormalizer;
use crate::vad::{EnergyVad, SileroVad, Vad};

/// String-keyed factories returning trait objects, one map per plugin kind
/// (spec §1 design note). `build_stt`/`build_hotword`/`build_transformer`
/// are passed the plugin's own `config` JSON blob from the `Config`.
pub trait PluginRegistry: Send + Sync {
    fn build_stt(&self, id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn SttPlugin>>;
    fn build_hotword(&self, engine_id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn HotwordEngine>>;
    fn build_transformer(&self, id: &str) -> Result<Box<dyn AudioTransformer>>;
    fn known_transformer_ids(&self) -> Vec<String>;
    fn build_vad(&self, id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn Vad>>;
}

type SttFactory = Box<dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn SttPlugin>> + Send + Sync>;
type HotwordFactory = Box<dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn HotwordEngine>> + Send + Sync>;
type TransformerFactory = Box<dyn Fn() -> Box<dyn AudioTransformer> + Send + Sync>;
type VadFactory = Box<dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn Vad>> + Send + Sync>;

/// The default registry: built-in STT (`whisper`, `google`), hotword
/// (`energy`), transformer (`silence_normalizer`, `background_noise_meter`),
/// and VAD (`energy`, `silero`) plugins, keyed by string id.
pub struct StaticPluginRegistry {
    stt: HashMap<String, SttFactory>,
    hotword: HashMap<String, HotwordFactory>,
    transformer: HashMap<String, TransformerFactory>,
    vad: HashMap<String, VadFactory>,
}

impl Default for StaticPluginRegistry {
    fn default() -> Self {
        let mut registry = Self {
            stt: HashMap::new(),
            hotword: HashMap::new(),
            transformer: HashMap::new(),
            vad: HashMap::new(),
        };

        registry.stt.insert(
            "google".into(),
            Box::new(|config| {
                let api_key = config
                    .get("api_key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ListenerError::PluginLoad {
                        plugin_id: "google".into(),
                        reason: "missing api_key".into(),
                    })?;
                let sample_rate = config.get("sample_rate").and_then(|v| v.as_u64()).unwrap_or(16000) as u32;
                Ok(Box::new(GoogleSttPlugin::new(
                    secrecy::SecretString::from(api_key.to_string()),
                    sample_rate,
                )) as Box<dyn SttPlugin>)
            }),
        );
        registry.stt.insert(
            "whisper".into(),
            Box::new(|config| {
                let model_path = config
                    .get("model_path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ListenerError::PluginLoad {
                        plugin_id: "whisper".into(),
                        reason: "missing model_path".into(),
                    })?;
                Ok(Box::new(WhisperSttPlugin::new(model_path)?) as Box<dyn SttPlugin>)
            }),
        );

        registry.hotword.insert(
            "energy".into(),
            Box::new(|config| {
                let threshold = config.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.05);
                let min_active_fraction = config.get("min_active_fraction").and_then(|v| v.as_f64()).unwrap_or(0.5);
                Ok(Box::new(EnergyHotword::new(threshold, min_active_fraction)) as Box<dyn HotwordEngine>)
            }),
        );

        registry
            .transformer
            .insert("background_noise_meter".into(), Box::new(|| Box::new(BackgroundNoiseMeter::new())));
        registry.transformer.insert(
            "silence_normalizer".into(),
            Box::new(|| Box::new(SilenceNormalizer::new(-18.0, std::env::temp_dir()))),
        );

        registry.vad.insert(
            "energy".into(),
            Box::new(|config| {
                let multiplier = config.get("multiplier").and_then(|v| v.as_f64()).unwrap_or(1.0);
                let energy_ratio = config.get("energy_ratio").and_then(|v| v.as_f64()).unwrap_or(1.5);
                Ok(Box::new(EnergyVad::new(multiplier, energy_ratio)) as Box<dyn Vad>)
            }),
        );
        registry.vad.insert(
            "silero".into(),
            Box::new(|config| {
                let sample_rate = config.get("sample_rate").and_then(|v| v.as_u64()).unwrap_or(16000) as u32;
                let chunk_size = config.get("chunk_size").and_then(|v| v.as_u64()).unwrap_or(512) as usize;
                let threshold = config.get("probability_threshold").and_then(|v| v.as_f64()).unwrap_or(0.75) as f32;
                Ok(Box::new(SileroVad::new(sample_rate, chunk_size, threshold)?) as Box<dyn Vad>)
            }),
        );

        registry
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn build_stt(&self, id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn SttPlugin>> {
        let factory = self.stt.get(id).ok_or_else(|| ListenerError::PluginLoad {
            plugin_id: id.to_string(),
            reason: "unknown stt plugin id".into(),
        })?;
        factory(config)
    }

    fn build_hotword(&self, engine_id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn HotwordEngine>> {
        let factory = self.hotword.get(engine_id).ok_or_else(|| ListenerError::PluginLoad {
            plugin_id: engine_id.to_string(),
            reason: "unknown hotword engine id".into(),
        })?;
        factory(config)
    }

    fn build_transformer(&self, id: &str) -> Result<Box<dyn AudioTransformer>> {
        let factory = self.transformer.get(id).ok_or_else(|| ListenerError::PluginLoad {
            plugin_id: id.to_string(),
            reason: "unknown transformer id".into(),
        })?;
        Ok(factory())
    }

    fn known_transformer_ids(&self) -> Vec<String> {
        self.transformer.keys().cloned().collect()
    }

    fn build_vad(&self, id: &str, config: &serde_json::Map<String, serde_json::Value>) -> Result<Box<dyn Vad>> {
        let factory = self.vad.get(id).ok_or_else(|| ListenerError::PluginLoad {
            plugin_id: id.to_string(),
            reason: "unknown vad module id".into(),
        })?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stt_id_is_a_plugin_load_error() {
        let registry = StaticPluginRegistry::default();
        let result = registry.build_stt("not-a-real-plugin", &Default::default());
        assert!(matches!(result, Err(ListenerError::PluginLoad { .. })));
    }

    #[test]
    fn energy_hotword_builds_with_defaults() {
        let registry = StaticPluginRegistry::default();
        assert!(registry.build_hotword("energy", &Default::default()).is_ok());
    }
}

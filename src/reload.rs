//! C8: config/hotword reload controller (spec §4.8): applies a patch,
//! persists it, and rebuilds C3 (and C5 if `stt.module` changed) without
//! tearing down C1.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::{Config, apply_patch};
use crate::error::{ListenerError, Result};
use crate::hotword::{HotwordEngine, HotwordSpec};
use crate::plugin_registry::PluginRegistry;
use crate::stt::SttAdapter;

/// Bounds on how long a reload may take before it's rolled back (spec
/// §4.8: "15-30s timeout with rollback").
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_hotword_entries(
    config: &Config,
    registry: &dyn PluginRegistry,
) -> Result<Vec<(HotwordSpec, Box<dyn HotwordEngine>)>> {
    let mut entries = Vec::new();
    for (name, entry) in &config.hotwords {
        let engine = registry.build_hotword(&entry.module, &entry.config)?;
        let spec = HotwordSpec {
            name: name.clone(),
            engine_id: entry.module.clone(),
            active: entry.active,
            listen: entry.listen,
            utterance: entry.utterance.clone(),
            sound: entry.sound.clone(),
            phonemes: entry.phonemes.clone(),
            config: entry.config.clone(),
        };
        entries.push((spec, engine));
    }
    Ok(entries)
}

pub(crate) fn build_stt_adapter(config: &Config, registry: &dyn PluginRegistry) -> Result<SttAdapter> {
    let primary_id = config.stt.module.as_deref().unwrap_or("google");
    let primary = match registry.build_stt(primary_id, &config.stt.config) {
        Ok(plugin) => plugin,
        Err(e) => {
            warn!(plugin = primary_id, error = %e, "primary stt plugin failed to load, trying fallback");
            let fallback_id = config.stt.fallback_module.as_deref().unwrap_or("google");
            registry.build_stt(fallback_id, &config.stt.config)?
        }
    };
    let fallback = config
        .stt
        .fallback_module
        .as_deref()
        .filter(|id| Some(*id) != config.stt.module.as_deref())
        .and_then(|id| registry.build_stt(id, &config.stt.config).ok());
    Ok(SttAdapter::new(primary, fallback, config.lang.clone()))
}

/// Builds an `SttAdapter` with `module_id` forced as primary regardless of
/// `config.stt.module` (spec §4.7 supplement: offline mode swaps to
/// `stt.offline_module` without otherwise touching the configured fallback).
pub(crate) fn build_stt_adapter_with_module(
    config: &Config,
    registry: &dyn PluginRegistry,
    module_id: &str,
) -> Result<SttAdapter> {
    let primary = registry.build_stt(module_id, &config.stt.config)?;
    let fallback = config
        .stt
        .fallback_module
        .as_deref()
        .filter(|id| *id != module_id)
        .and_then(|id| registry.build_stt(id, &config.stt.config).ok());
    Ok(SttAdapter::new(primary, fallback, config.lang.clone()))
}

/// Validates that a patch at least parses into a well-formed `Config`
/// before the bus facade's `apply_config_patch` commits to rebuilding
/// plugins; a patch that produces an invalid config is rejected without
/// mutating anything (spec §7: `ConfigInvalid` rolls back rather than
/// partially applying).
pub fn validate_patch(current: &Config, patch: &Value) -> Result<()> {
    apply_patch(current, patch).map(|_| ()).map_err(|e| {
        ListenerError::ConfigInvalid(format!("rejected reload patch: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_registry::StaticPluginRegistry;
    use std::collections::BTreeMap;

    fn config_with_hotword() -> Config {
        let mut hotwords = BTreeMap::new();
        hotwords.insert(
            "hey_neon".to_string(),
            crate::config::HotwordConfigEntry {
                module: "energy".into(),
                active: true,
                listen: true,
                utterance: None,
                sound: None,
                phonemes: None,
                config: Default::default(),
            },
        );
        Config {
            hotwords,
            lang: "en-US".into(),
            ..Default::default()
        }
    }

    #[test]
    fn build_hotword_entries_carries_spec_fields_from_config() {
        let config = config_with_hotword();
        let registry = StaticPluginRegistry::default();
        let entries = build_hotword_entries(&config, &registry).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.name, "hey_neon");
        assert!(entries[0].0.listen);
    }

    #[test]
    fn build_stt_adapter_falls_back_to_google_when_module_unset() {
        let config = Config::default();
        let registry = StaticPluginRegistry::default();
        let err = build_stt_adapter(&config, &registry).unwrap_err();
        assert!(matches!(err, ListenerError::PluginLoad { .. }));
    }

    #[test]
    fn invalid_patch_is_rejected_without_mutation() {
        let config = config_with_hotword();
        let result = validate_patch(&config, &serde_json::json!({"listener": {"sample_rate": "not-a-number"}}));
        assert!(result.is_err());
    }
}

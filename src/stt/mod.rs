//! C5: STT adapter (spec §4.5), a uniform interface over batch and
//! streaming speech recognizers.

pub mod google;
pub mod whisper;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// One `(text, confidence)` transcription alternative.
pub type Transcription = (String, f32);

/// Settable/readable end-of-speech signal a streaming plugin can use to
/// tell the recognizer its stream is done server-side (spec §4.5).
#[derive(Clone, Default)]
pub struct ResultsReady(Arc<AtomicBool>);

impl ResultsReady {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Contract every STT backend implements. A plugin that is only batch
/// leaves the streaming methods at their default (`unimplemented`-style)
/// `Err`; the adapter checks `supports_streaming()` before calling them.
pub trait SttPlugin: Send {
    fn id(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Batch transcription of a complete utterance.
    fn execute(&mut self, clip_bytes: &[u8], lang: &str) -> Result<Vec<Transcription>>;

    fn stream_start(&mut self, _lang: &str) -> Result<()> {
        Err(crate::error::ListenerError::PluginRuntime {
            plugin_id: self.id().to_string(),
            reason: "plugin does not support streaming".into(),
        })
    }

    fn stream_data(&mut self, _frame_bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<Vec<Transcription>> {
        Err(crate::error::ListenerError::PluginRuntime {
            plugin_id: self.id().to_string(),
            reason: "plugin does not support streaming".into(),
        })
    }

    fn results_ready(&self) -> Option<ResultsReady> {
        None
    }

    fn available_languages(&self) -> HashSet<String> {
        HashSet::new()
    }
}

/// Normalizes a BCP-47-ish language tag to `xx-XX` (spec §4.5 / §9):
/// lowercase primary subtag, uppercase region subtag. Idempotent.
pub fn normalize_lang(lang: &str) -> String {
    let mut parts = lang.split(['-', '_']);
    let primary = parts.next().unwrap_or("").to_lowercase();
    match parts.next() {
        Some(region) if !region.is_empty() => format!("{primary}-{}", region.to_uppercase()),
        _ => primary,
    }
}

/// Selects and owns the active STT plugin plus its configured fallback
/// (spec §4.5 selection rule: configured `module` -> `fallback_module` ->
/// documented default `"google"`).
pub struct SttAdapter {
    primary: Box<dyn SttPlugin>,
    fallback: Option<Box<dyn SttPlugin>>,
    default_lang: String,
}

impl SttAdapter {
    pub fn new(primary: Box<dyn SttPlugin>, fallback: Option<Box<dyn SttPlugin>>, default_lang: String) -> Self {
        Self {
            primary,
            fallback,
            default_lang: normalize_lang(&default_lang),
        }
    }

    pub fn can_stream(&self) -> bool {
        self.primary.supports_streaming()
    }

    /// Plugin id of the currently active primary (spec §4.7 supplement:
    /// `handle_internet_connected` compares this against the configured
    /// `stt.module` to decide whether a reload is needed).
    pub fn primary_id(&self) -> &str {
        self.primary.id()
    }

    pub fn results_ready(&self) -> Option<ResultsReady> {
        self.primary.results_ready()
    }

    pub fn available_languages(&self) -> HashSet<String> {
        self.primary.available_languages()
    }

    fn resolve_lang(&self, lang: Option<&str>) -> String {
        lang.map(normalize_lang).unwrap_or_else(|| self.default_lang.clone())
    }

    /// Batch transcription with transparent fallback on primary failure
    /// (spec §4.5). Used by C6's consumer and by C7's `neon.get_stt` path.
    pub fn execute(&mut self, clip_bytes: &[u8], lang: Option<&str>) -> Result<Vec<Transcription>> {
        let lang = self.resolve_lang(lang);
        match self.primary.execute(clip_bytes, &lang) {
            Ok(result) => Ok(result),
            Err(primary_err) => {
                if let Some(fallback) = self.fallback.as_mut() {
                    fallback.execute(clip_bytes, &lang)
                } else {
                    Err(primary_err)
                }
            }
        }
    }

    pub fn stream_start(&mut self, lang: Option<&str>) -> Result<()> {
        let lang = self.resolve_lang(lang);
        self.primary.stream_start(&lang)
    }

    pub fn stream_data(&mut self, frame_bytes: &[u8]) -> Result<()> {
        self.primary.stream_data(frame_bytes)
    }

    pub fn stream_stop(&mut self) -> Result<Vec<Transcription>> {
        self.primary.stream_stop()
    }

    pub fn swap_primary(&mut self, plugin: Box<dyn SttPlugin>) {
        self.primary = plugin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingPlugin;
    impl SttPlugin for FailingPlugin {
        fn id(&self) -> &str {
            "failing"
        }
        fn execute(&mut self, _clip_bytes: &[u8], _lang: &str) -> Result<Vec<Transcription>> {
            Err(crate::error::ListenerError::PluginRuntime {
                plugin_id: "failing".into(),
                reason: "network down".into(),
            })
        }
    }

    struct EchoPlugin(&'static str);
    impl SttPlugin for EchoPlugin {
        fn id(&self) -> &str {
            self.0
        }
        fn execute(&mut self, _clip_bytes: &[u8], _lang: &str) -> Result<Vec<Transcription>> {
            Ok(vec![(self.0.to_string(), 0.9)])
        }
    }

    #[test]
    fn normalize_lang_is_idempotent() {
        for input in ["en-us", "EN-US", "en_US", "en"] {
            let once = normalize_lang(input);
            let twice = normalize_lang(&once);
            assert_eq!(once, twice);
        }
        assert_eq!(normalize_lang("en-us"), "en-US");
    }

    #[test]
    fn falls_back_on_primary_failure() {
        let mut adapter = SttAdapter::new(
            Box::new(FailingPlugin),
            Some(Box::new(EchoPlugin("fallback"))),
            "en-US".into(),
        );
        let result = adapter.execute(&[], None).unwrap();
        assert_eq!(result[0].0, "fallback");
    }

    #[test]
    fn no_fallback_propagates_primary_error() {
        let mut adapter = SttAdapter::new(Box::new(FailingPlugin), None, "en-US".into());
        assert!(adapter.execute(&[], None).is_err());
    }
}

//! C2: audio transformer chain (spec §4.2).

pub mod noise_meter;
pub mod normalizer;

use serde_json::{Map, Value};
use tracing::warn;

use crate::audio::{AudioClip, AudioFrame};
use crate::error::Result;

pub type Context = Map<String, Value>;

/// One stage of the transformer chain. `priority` controls execution order
/// (ascending). `on_audio`/`on_hotword`/`on_speech` are fire-and-forget
/// observation hooks; `on_speech_end` may rewrite the recorded clip and
/// contributes a context delta merged into the final result.
pub trait AudioTransformer: Send {
    fn name(&self) -> &str;
    fn priority(&self) -> i32;

    fn on_audio(&mut self, _frame: &AudioFrame) {}
    fn on_hotword(&mut self, _frame: &AudioFrame) {}
    fn on_speech(&mut self, _frame: &AudioFrame) {}

    /// Called once per completed utterance. Returning `Err` causes this
    /// transformer to be skipped for this utterance (logged, not fatal).
    fn on_speech_end(&mut self, clip: AudioClip) -> Result<(AudioClip, Context)> {
        Ok((clip, Context::new()))
    }
}

/// Merge `delta` into `base`: later transformer wins on scalar key
/// collision, arrays are concatenated (spec §4.2).
fn merge_context(base: &mut Context, delta: Context) {
    for (key, value) in delta {
        match (base.get_mut(&key), value) {
            (Some(Value::Array(existing)), Value::Array(mut incoming)) => {
                existing.append(&mut incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

pub struct TransformerChain {
    transformers: Vec<Box<dyn AudioTransformer>>,
}

impl TransformerChain {
    pub fn new(mut transformers: Vec<Box<dyn AudioTransformer>>) -> Self {
        transformers.sort_by_key(|t| t.priority());
        Self { transformers }
    }

    pub fn on_audio(&mut self, frame: &AudioFrame) {
        for t in &mut self.transformers {
            t.on_audio(frame);
        }
    }

    pub fn on_hotword(&mut self, frame: &AudioFrame) {
        for t in &mut self.transformers {
            t.on_hotword(frame);
        }
    }

    pub fn on_speech(&mut self, frame: &AudioFrame) {
        for t in &mut self.transformers {
            t.on_speech(frame);
        }
    }

    /// Run every transformer's `on_speech_end` in priority order, feeding
    /// each the previous transformer's (possibly rewritten) clip, and merge
    /// their context deltas. A transformer that errors is logged and its
    /// clip/context contribution is skipped; the pipeline continues.
    pub fn on_speech_end(&mut self, mut clip: AudioClip) -> (AudioClip, Context) {
        let mut context = Context::new();
        for t in &mut self.transformers {
            match t.on_speech_end(clip.clone()) {
                Ok((new_clip, delta)) => {
                    clip = new_clip;
                    merge_context(&mut context, delta);
                }
                Err(e) => {
                    warn!(transformer = t.name(), error = %e, "transformer failed, skipping");
                }
            }
        }
        (clip, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagger(&'static str, i32);
    impl AudioTransformer for Tagger {
        fn name(&self) -> &str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        fn on_speech_end(&mut self, clip: AudioClip) -> Result<(AudioClip, Context)> {
            let mut ctx = Context::new();
            ctx.insert("order".into(), Value::Array(vec![Value::String(self.0.into())]));
            Ok((clip, ctx))
        }
    }

    struct Failing;
    impl AudioTransformer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn priority(&self) -> i32 {
            0
        }
        fn on_speech_end(&mut self, _clip: AudioClip) -> Result<(AudioClip, Context)> {
            Err(crate::error::ListenerError::PluginRuntime {
                plugin_id: "failing".into(),
                reason: "boom".into(),
            })
        }
    }

    #[test]
    fn runs_in_ascending_priority_and_concatenates_lists() {
        let mut chain = TransformerChain::new(vec![
            Box::new(Tagger("second", 2)),
            Box::new(Tagger("first", 1)),
        ]);
        let clip = AudioClip::new(16000, 2, 1);
        let (_clip, ctx) = chain.on_speech_end(clip);
        let order = ctx.get("order").unwrap().as_array().unwrap();
        assert_eq!(order[0], Value::String("first".into()));
        assert_eq!(order[1], Value::String("second".into()));
    }

    #[test]
    fn failing_transformer_does_not_abort_pipeline() {
        let mut chain = TransformerChain::new(vec![Box::new(Failing), Box::new(Tagger("ok", 1))]);
        let clip = AudioClip::new(16000, 2, 1);
        let (_clip, ctx) = chain.on_speech_end(clip);
        assert!(ctx.contains_key("order"));
    }
}

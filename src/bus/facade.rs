//! C7: service facade (spec §4.7): the bus-facing request/response surface.
//! Grounded in `original_source/neon_speech/service.py`'s handler methods,
//! reshaped into one `Facade` struct holding the shared handles a `Service`
//! (§4.9) wires up at startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tracing::warn;

use crate::audio::resampler::Resampler;
use crate::bus::{BusClient, BusMessage, DEFAULT_RESPONSE_TIMEOUT};
use crate::config::{Config, ConfigProvider, apply_patch};
use crate::error::{ListenerError, Result};
use crate::hotword::SharedSpecs;
use crate::pipeline::{ConsumerCommand, ProducerCommand};
use crate::plugin_registry::PluginRegistry;
use crate::recognizer::ListenMode;
use crate::reload::{RELOAD_TIMEOUT, build_hotword_entries, build_stt_adapter, build_stt_adapter_with_module, validate_patch};
use crate::stt::{SttAdapter, normalize_lang};
use crate::transformers::TransformerChain;

const STT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// The default profile attached to outbound utterance context (spec §3
/// supplement), seeded `username = "local"` and mutated in place by
/// `neon.profile_update`.
#[derive(Debug, Clone)]
pub struct DefaultUserProfile {
    pub username: String,
    pub content: Value,
}

impl DefaultUserProfile {
    pub fn seed() -> Self {
        Self {
            username: "local".into(),
            content: json!({"user": {"username": "local"}, "speech": {}}),
        }
    }
}

/// Everything a C7 handler needs, gathered in one place so handlers stay
/// free functions taking `&Facade` rather than methods on a God object with
/// a dozen unrelated fields (spec §4.9: constructed once, handed by
/// reference into every handler).
pub struct Facade {
    pub stt: TokioMutex<SttAdapter>,
    pub transformers: TokioMutex<TransformerChain>,
    pub hotwords: SharedSpecs,
    pub producer_commands: crossbeam_channel::Sender<ProducerCommand>,
    pub consumer_commands: crossbeam_channel::Sender<ConsumerCommand>,
    pub bus: Arc<BusClient>,
    pub profile: StdMutex<DefaultUserProfile>,
    pub config: TokioMutex<Config>,
    pub config_provider: Arc<dyn ConfigProvider>,
    pub registry: Arc<dyn PluginRegistry>,
    pub wake_word_gating: std::sync::atomic::AtomicBool,
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

impl Facade {
    /// Shared by `handle_get_stt`/`handle_audio_input` (spec §4.7
    /// supplement): decode, acquire the STT mutex with a 30s timeout, run
    /// STT (streaming the whole clip if the plugin supports it), then run
    /// the result through the transformer chain.
    async fn get_stt_from_file(
        &self,
        clip_bytes: &[u8],
        lang: Option<&str>,
    ) -> Result<(Vec<(String, f32)>, crate::transformers::Context)> {
        let mut stt = match timeout(STT_LOCK_TIMEOUT, self.stt.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Err(ListenerError::Timeout("Timed out acquiring lock".into())),
        };

        let transcripts = if stt.can_stream() {
            stt.stream_start(lang)?;
            stt.stream_data(clip_bytes)?;
            stt.stream_stop()?
        } else {
            stt.execute(clip_bytes, lang)?
        };
        drop(stt);

        let listener = self.config.lock().await.listener.clone();
        let clip = crate::audio::AudioClip {
            bytes: clip_bytes.to_vec(),
            sample_rate: listener.sample_rate,
            sample_width: listener.sample_width,
            channels: listener.channels,
        };
        let (_clip, context) = self.transformers.lock().await.on_speech_end(clip);
        Ok((transcripts, context))
    }

    /// `neon.get_stt` (spec §4.7 table + supplement). Gated by
    /// `listener.enable_stt_api` (spec §6 supplement).
    pub async fn handle_get_stt(&self, request: &BusMessage) -> BusMessage {
        if !self.config.lock().await.listener.enable_stt_api {
            return request.reply(json!({"error": "stt api disabled"}));
        }
        let lang = request.data.get("lang").and_then(Value::as_str);
        let audio_bytes = match self.decode_request_audio(request).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return request.reply(json!({"error": "audio_file not specified!"}));
            }
            Err(e) => return request.reply(json!({"error": e.to_string()})),
        };

        match self.get_stt_from_file(&audio_bytes, lang).await {
            Ok((transcripts, context)) => {
                let transcripts_with_conf: Vec<Value> = transcripts
                    .iter()
                    .map(|(t, c)| json!({"text": t, "confidence": c}))
                    .collect();
                let transcript_texts: Vec<&str> = transcripts.iter().map(|(t, _)| t.as_str()).collect();
                request.reply(json!({
                    "parser_data": Value::Object(context),
                    "transcripts": transcript_texts,
                    "transcripts_with_conf": transcripts_with_conf,
                }))
            }
            Err(e) => request.reply(json!({"error": e.to_string()})),
        }
    }

    /// `neon.audio_input` (spec §4.7 table + supplement): as `get_stt` plus
    /// a `recognizer_loop:utterance` forward to skills and `skills_recv`.
    pub async fn handle_audio_input(&self, request: &BusMessage) -> BusMessage {
        if !self.config.lock().await.listener.enable_stt_api {
            return request.reply(json!({"error": "stt api disabled"}));
        }
        let lang = request.data.get("lang").and_then(Value::as_str);
        let audio_bytes = match self.decode_request_audio(request).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return request.reply(json!({"error": "audio_file not specified!"})),
            Err(e) => return request.reply(json!({"error": e.to_string()})),
        };

        let (transcripts, _context) = match self.get_stt_from_file(&audio_bytes, lang).await {
            Ok(result) => result,
            Err(e) => return request.reply(json!({"error": e.to_string()})),
        };

        let utterances: Vec<&str> = transcripts.iter().map(|(t, _)| t.as_str()).collect();
        let skills_recv = self.emit_utterance_to_skills(&utterances, &request.context, lang).await;
        request.reply(json!({"skills_recv": skills_recv}))
    }

    /// Reads `audio_file` (a path) or `audio_data` (base64, written to a
    /// temp file first per spec §4.7) from the request, decodes the WAV to
    /// mono 16-bit PCM, and resamples to the configured sample rate if the
    /// source differs (spec §4.7: "decoded to mono PCM at the configured
    /// sample rate and width"). `Ok(None)` means neither field was supplied.
    async fn decode_request_audio(&self, request: &BusMessage) -> Result<Option<Vec<u8>>> {
        let wav_bytes = if let Some(path) = request.data.get("audio_file").and_then(Value::as_str) {
            let expanded = shellexpand_home(path);
            std::fs::read(&expanded).map_err(|e| ListenerError::Decode(e.to_string()))?
        } else if let Some(b64) = request.data.get("audio_data").and_then(Value::as_str) {
            use base64::Engine;
            let raw = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| ListenerError::Decode(e.to_string()))?;
            let tmp_path = std::env::temp_dir().join(format!("neon_listener_input_{}.wav", uuid::Uuid::new_v4()));
            std::fs::write(&tmp_path, &raw).map_err(|e| ListenerError::Decode(e.to_string()))?;
            std::fs::read(&tmp_path).map_err(|e| ListenerError::Decode(e.to_string()))?
        } else {
            return Ok(None);
        };

        let target_rate = self.config.lock().await.listener.sample_rate;
        Ok(Some(decode_and_resample_wav(&wav_bytes, target_rate)?))
    }

    /// `_emit_utterance_to_skills` (spec §4.7 supplement): builds the
    /// outbound context defaults, emits `recognizer_loop:utterance` as a
    /// request, and waits up to 10s for any reply. `base_context` seeds the
    /// outgoing context: the inbound request's context for `neon.audio_input`,
    /// or the transformer chain's accumulated context for a plain consumer-
    /// thread STT outcome. `lang` is the request's `lang`, if any, falling
    /// back to `config.lang` (spec §9: never silently `en-us`), normalized
    /// at this boundary.
    async fn emit_utterance_to_skills(&self, utterances: &[&str], base_context: &Value, lang: Option<&str>) -> bool {
        let ident = format!("{}", unix_millis());
        let profile = self.profile.lock().expect("profile lock poisoned").clone();
        let lang = match lang {
            Some(lang) => normalize_lang(lang),
            None => normalize_lang(&self.config.lock().await.lang),
        };

        let mut context = base_context.as_object().cloned().unwrap_or_default();
        context.entry("client_name".into()).or_insert(json!("mycroft_listener"));
        context.entry("client".into()).or_insert(json!("api"));
        context.entry("source".into()).or_insert(json!("speech_api"));
        context.insert("ident".into(), json!(ident));
        context.insert("username".into(), json!(profile.username));
        context.insert("user_profiles".into(), json!([profile.content]));
        context.insert("destination".into(), json!(["skills"]));
        context
            .entry("timing")
            .or_insert(json!({}))
            .as_object_mut()
            .map(|t| t.insert("transcribed".into(), json!(unix_millis() as f64 / 1000.0)));

        let message = BusMessage::new(
            "recognizer_loop:utterance",
            json!({"utterances": utterances, "lang": lang}),
            Value::Object(context),
        );

        match self.bus.request(&message, ident, DEFAULT_RESPONSE_TIMEOUT).await {
            Ok(Some(_reply)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "failed to emit utterance to skills");
                false
            }
        }
    }

    /// `neon.wake_words_state` (spec §4.7 table).
    pub async fn handle_wake_words_state(&self, request: &BusMessage) -> Option<BusMessage> {
        let enabled = request.data.get("enabled").and_then(Value::as_bool)?;
        let mode = if enabled { ListenMode::Wakeword } else { ListenMode::Continuous };
        let _ = self.producer_commands.send(ProducerCommand::SetListenMode(mode));
        self.wake_word_gating
            .store(enabled, std::sync::atomic::Ordering::SeqCst);
        None
    }

    /// `neon.query_wake_words_state` (spec §4.7 table).
    pub fn handle_query_wake_words_state(&self, request: &BusMessage) -> BusMessage {
        let enabled = self.wake_word_gating.load(std::sync::atomic::Ordering::SeqCst);
        request.reply(json!({"enabled": enabled}))
    }

    /// `neon.get_wake_words` (spec §4.7 table: "map of listen-hot-words with
    /// `active` flags").
    pub fn handle_get_wake_words(&self, request: &BusMessage) -> BusMessage {
        let specs = self.hotwords.lock().expect("hotword spec table poisoned");
        let mut map = HashMap::new();
        for spec in specs.iter().filter(|s| s.listen) {
            map.insert(spec.name.clone(), json!({"active": spec.active}));
        }
        request.reply(json!(map))
    }

    /// `neon.enable_wake_word` / `neon.disable_wake_word` (spec §4.7 table +
    /// supplement): three-way branch mirroring `service.py`.
    pub fn handle_set_wake_word(&self, request: &BusMessage, enable: bool) -> BusMessage {
        let Some(wake_word) = request.data.get("wake_word").and_then(Value::as_str) else {
            return request.reply(json!({"error": "ww not configured"}));
        };

        let mut specs = self.hotwords.lock().expect("hotword spec table poisoned");
        let Some(spec) = specs.iter_mut().find(|s| s.name == wake_word) else {
            return request.reply(json!({"error": "ww not configured", "wake_word": wake_word}));
        };

        if spec.active == enable {
            let state = if enable { "enabled" } else { "disabled" };
            return request.reply(json!({"error": format!("ww already {state}")}));
        }

        if !enable && spec.listen {
            let active_listen_count = specs.iter().filter(|s| s.active && s.listen).count();
            if active_listen_count <= 1 {
                return request.reply(json!({
                    "error": "only one active ww",
                    "active": true,
                    "wake_word": wake_word,
                }));
            }
        }

        spec.active = enable;
        let name = spec.name.clone();
        drop(specs);
        let _ = self
            .producer_commands
            .send(ProducerCommand::SetHotwordActive { name, active: enable });

        request.reply(json!({"error": false, "active": enable, "wake_word": wake_word}))
    }

    /// `neon.profile_update` (spec §4.7 table + supplement).
    pub async fn handle_profile_update(&self, request: &BusMessage) -> Option<BusMessage> {
        let profile_update = request.data.get("profile")?;
        let username = profile_update.get("user")?.get("username")?.as_str()?;

        let mut profile = self.profile.lock().expect("profile lock poisoned");
        if profile.username != username {
            return None;
        }
        let previous_lang = profile
            .content
            .get("speech")
            .and_then(|s| s.get("stt_language"))
            .and_then(Value::as_str)
            .map(str::to_string);
        profile.content = profile_update.clone();
        drop(profile);

        if let Some(new_lang) = profile_update
            .get("speech")
            .and_then(|s| s.get("stt_language"))
            .and_then(Value::as_str)
        {
            if previous_lang.as_deref() != Some(new_lang) {
                let mut config = self.config.lock().await;
                config.lang = new_lang.to_string();
                if let Err(e) = self.config_provider.persist(&config) {
                    warn!(error = %e, "failed to persist language change");
                }
                let new_config = config.clone();
                drop(config);
                self.rebuild_stt_for_config(&new_config).await;
            }
        }
        None
    }

    /// Rebuilds and swaps both the facade's and the consumer thread's STT
    /// adapter against `config` (spec §4.7: a `stt_language` change must
    /// reach live transcription, not just the persisted config, since
    /// `SttAdapter` caches its default language at construction).
    async fn rebuild_stt_for_config(&self, config: &Config) {
        match build_stt_adapter(config, self.registry.as_ref()) {
            Ok(new_facade_stt) => {
                *self.stt.lock().await = new_facade_stt;
                match build_stt_adapter(config, self.registry.as_ref()) {
                    Ok(consumer_adapter) => {
                        let _ = self.consumer_commands.send(ConsumerCommand::ReplaceStt(consumer_adapter));
                    }
                    Err(e) => warn!(error = %e, "failed to rebuild consumer stt adapter for language change"),
                }
            }
            Err(e) => warn!(error = %e, "failed to rebuild stt adapter for language change"),
        }
    }

    /// `mycroft.internet.connected` (spec §4.7 table + supplement):
    /// reloads the STT plugin only if its configured `module` differs from
    /// the currently active one, otherwise just re-arms the results-ready
    /// signal.
    pub async fn handle_internet_connected(&self) {
        let config = self.config.lock().await.clone();
        let configured = config.stt.module.clone().unwrap_or_else(|| "google".into());

        let mut stt = self.stt.lock().await;
        if stt.primary_id() == configured {
            if let Some(signal) = stt.results_ready() {
                signal.clear();
            }
            return;
        }
        drop(stt);

        match build_stt_adapter(&config, self.registry.as_ref()) {
            Ok(new_adapter) => {
                *self.stt.lock().await = new_adapter;
                match build_stt_adapter(&config, self.registry.as_ref()) {
                    Ok(consumer_adapter) => {
                        let _ = self.consumer_commands.send(ConsumerCommand::ReplaceStt(consumer_adapter));
                    }
                    Err(e) => warn!(error = %e, "failed to rebuild consumer stt adapter on reconnect"),
                }
            }
            Err(e) => warn!(error = %e, module = %configured, "failed to reload stt plugin on reconnect"),
        }
    }

    /// `ovos.phal.wifi.plugin.fully_offline` (spec §4.7 table + supplement):
    /// swaps to `stt.offline_module` if configured, else re-arms the current
    /// plugin's results-ready signal.
    pub async fn handle_offline(&self) {
        let config = self.config.lock().await.clone();
        let Some(offline_module) = config.stt.offline_module.clone() else {
            if let Some(signal) = self.stt.lock().await.results_ready() {
                signal.clear();
            }
            return;
        };

        match build_stt_adapter_with_module(&config, self.registry.as_ref(), &offline_module) {
            Ok(new_adapter) => {
                *self.stt.lock().await = new_adapter;
                match build_stt_adapter_with_module(&config, self.registry.as_ref(), &offline_module) {
                    Ok(consumer_adapter) => {
                        let _ = self.consumer_commands.send(ConsumerCommand::ReplaceStt(consumer_adapter));
                    }
                    Err(e) => warn!(error = %e, "failed to rebuild consumer stt adapter for offline module"),
                }
            }
            Err(e) => warn!(error = %e, module = %offline_module, "failed to load offline stt module"),
        }
    }

    /// `mycroft.mic.mute` / `mycroft.mic.unmute` (spec §6 consumed topics):
    /// the saturating mute counter (spec §3), not `Sleeping`: muting only
    /// silences frames the source hands back, it doesn't touch the wake-word
    /// state machine.
    pub fn handle_mic_mute(&self, mute: bool) {
        let cmd = if mute { ProducerCommand::Mute } else { ProducerCommand::Unmute };
        let _ = self.producer_commands.send(cmd);
    }

    /// `mycroft.mic.get_status` (spec §6 consumed topics).
    pub fn handle_mic_get_status(&self, request: &BusMessage) -> BusMessage {
        let wake_word_gating = self.wake_word_gating.load(std::sync::atomic::Ordering::SeqCst);
        request.reply(json!({"wake_word_gating": wake_word_gating}))
    }

    /// `mycroft.stop` (spec §5 cancellation): force the mute counter to 0.
    pub fn handle_stop(&self) {
        let _ = self.producer_commands.send(ProducerCommand::ForceUnmute);
    }

    /// `recognizer_loop:sleep` (spec §6 supplement): enters `Sleeping`.
    pub fn handle_sleep(&self) {
        let _ = self.producer_commands.send(ProducerCommand::SetSleeping(true));
    }

    /// Consumer-thread STT outcome (spec §4.6 → §4.7): an empty transcript
    /// list becomes `recognizer_loop:speech.recognition.unknown` (suppressed
    /// while wake-word gating is off, spec §4.6), otherwise forwarded to
    /// skills exactly as `neon.audio_input` does.
    pub async fn handle_stt_outcome(&self, outcome: crate::pipeline::SttOutcome) {
        if outcome.transcriptions.is_empty() {
            if self.wake_word_gating.load(std::sync::atomic::Ordering::SeqCst) {
                let message = BusMessage::new(
                    "recognizer_loop:speech.recognition.unknown",
                    json!({}),
                    Value::Object(outcome.context),
                );
                let _ = self.bus.emit(&message).await;
            }
            return;
        }
        let utterances: Vec<&str> = outcome.transcriptions.iter().map(|(t, _)| t.as_str()).collect();
        self.emit_utterance_to_skills(&utterances, &Value::Object(outcome.context), Some(&outcome.lang))
            .await;
    }

    /// `configuration.patch` (spec §4.8): validate, rebuild C3 (and C5 if
    /// `stt.module` changed) within `RELOAD_TIMEOUT`, persist, and only then
    /// commit the in-memory config. Anything that fails before the persist
    /// leaves the running config, hotwords, and STT plugin untouched: the
    /// "rollback" half of spec §4.8's "15-30s timeout with rollback".
    pub async fn handle_config_patch(&self, request: &BusMessage) -> BusMessage {
        let patch = request.data.clone();
        match timeout(RELOAD_TIMEOUT, self.apply_config_patch(&patch)).await {
            Ok(Ok(())) => request.reply(json!({"error": false})),
            Ok(Err(e)) => request.reply(json!({"error": e.to_string()})),
            Err(_) => request.reply(json!({"error": "reload timed out, rolled back"})),
        }
    }

    async fn apply_config_patch(&self, patch: &Value) -> Result<()> {
        let mut config = self.config.lock().await;
        validate_patch(&config, patch)?;
        let new_config = apply_patch(&config, patch)?;

        let stt_changed = new_config.stt.module != config.stt.module;
        let hotword_entries = build_hotword_entries(&new_config, self.registry.as_ref())?;

        let new_facade_stt = if stt_changed {
            let new_consumer_stt = build_stt_adapter(&new_config, self.registry.as_ref())?;
            let new_facade_stt = build_stt_adapter(&new_config, self.registry.as_ref())?;
            self.consumer_commands
                .send(ConsumerCommand::ReplaceStt(new_consumer_stt))
                .map_err(|_| ListenerError::BusDisconnected("consumer thread gone".into()))?;
            Some(new_facade_stt)
        } else {
            None
        };

        self.producer_commands
            .send(ProducerCommand::ReplaceHotwords {
                entries: hotword_entries,
                sample_rate: new_config.listener.sample_rate,
                sample_width: new_config.listener.sample_width,
                channels: new_config.listener.channels,
                phoneme_duration_ms: new_config.listener.phoneme_duration_ms,
            })
            .map_err(|_| ListenerError::BusDisconnected("producer thread gone".into()))?;

        self.config_provider.persist(&new_config)?;

        if let Some(new_facade_stt) = new_facade_stt {
            *self.stt.lock().await = new_facade_stt;
        }
        *config = new_config;
        Ok(())
    }

    /// Routes one inbound (non-reply) bus message to its handler and emits
    /// any resulting reply. Spec §6's consumed-topic table plus §4.7's
    /// request/response table, in one place so `BusClient`'s reader task
    /// never needs to know about handler internals.
    pub async fn dispatch(&self, message: BusMessage) {
        let reply = match message.msg_type.as_str() {
            "neon.get_stt" => Some(self.handle_get_stt(&message).await),
            "neon.audio_input" => Some(self.handle_audio_input(&message).await),
            "neon.wake_words_state" => self.handle_wake_words_state(&message).await,
            "neon.query_wake_words_state" => Some(self.handle_query_wake_words_state(&message)),
            "neon.get_wake_words" => Some(self.handle_get_wake_words(&message)),
            "neon.enable_wake_word" => Some(self.handle_set_wake_word(&message, true)),
            "neon.disable_wake_word" => Some(self.handle_set_wake_word(&message, false)),
            "neon.profile_update" => self.handle_profile_update(&message).await,
            "mycroft.internet.connected" => {
                self.handle_internet_connected().await;
                None
            }
            "ovos.phal.wifi.plugin.fully_offline" => {
                self.handle_offline().await;
                None
            }
            "mycroft.mic.mute" => {
                self.handle_mic_mute(true);
                None
            }
            "mycroft.mic.unmute" => {
                self.handle_mic_mute(false);
                None
            }
            "mycroft.mic.get_status" => Some(self.handle_mic_get_status(&message)),
            "mycroft.stop" => {
                self.handle_stop();
                None
            }
            "recognizer_loop:sleep" => {
                self.handle_sleep();
                None
            }
            "configuration.patch" => Some(self.handle_config_patch(&message).await),
            _ => None,
        };
        if let Some(reply) = reply {
            if let Err(e) = self.bus.emit(&reply).await {
                warn!(error = %e, msg_type = %message.msg_type, "failed to emit bus reply");
            }
        }
    }
}

/// Decodes a WAV byte buffer to mono 16-bit PCM at `target_rate`, downmixing
/// multi-channel input by averaging and resampling via linear interpolation
/// (spec §4.7 audio decode).
fn decode_and_resample_wav(wav_bytes: &[u8], target_rate: u32) -> Result<Vec<u8>> {
    let mut reader =
        hound::WavReader::new(std::io::Cursor::new(wav_bytes)).map_err(|e| ListenerError::Decode(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ListenerError::Decode(e.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ListenerError::Decode(e.to_string()))?,
    };

    let mono: Vec<i16> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect()
    } else {
        samples
    };

    if spec.sample_rate == target_rate {
        return Ok(mono.iter().flat_map(|s| s.to_le_bytes()).collect());
    }

    let floats: Vec<f32> = mono.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut resampler = Resampler::new(spec.sample_rate, target_rate, floats.len().max(1));
    let resampled: Vec<i16> = resampler
        .resample(&floats)
        .into_iter()
        .flatten()
        .map(|f| (f.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    Ok(resampled.iter().flat_map(|s| s.to_le_bytes()).collect())
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shellexpand_home_rewrites_tilde_prefix() {
        let expanded = shellexpand_home("~/invalid_file.wav");
        assert!(!expanded.starts_with('~'));
    }
}

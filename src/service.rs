//! C9: service wiring (spec §4.9 ambient section): constructs every
//! component once from a `Config` + `ConfigProvider` + `PluginRegistry` and
//! hands shared handles by reference into the bus handlers and background
//! threads. No module-level singletons.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use serde_json::{Value, json};
use tracing::info;

use crate::audio::CHUNK;
use crate::audio::source::{AudioSource, CpalAudioSource};
use crate::bus::facade::{DefaultUserProfile, Facade};
use crate::bus::{BusClient, PendingRequests};
use crate::config::{Config, ConfigProvider};
use crate::error::Result;
use crate::hotword::HotwordRegistry;
use crate::bus::BusMessage;
use crate::pipeline::{Producer, PipelineObserver, spawn_consumer};
use crate::plugin_registry::PluginRegistry;
use crate::recognizer::{ExternalTriggers, ListenMode, ListenerState, Recognizer, RecognizerEvent};
use crate::reload::{build_hotword_entries, build_stt_adapter};
use crate::transformers::TransformerChain;

const PRODUCER_COMMAND_QUEUE: usize = 16;

/// Forwards recognizer lifecycle events to `tracing` and, via an unbounded
/// channel, to an async task that turns them into `recognizer_loop:*` bus
/// emissions (spec §6), the same sync-to-async bridge pattern `handle_stt_outcome`
/// uses for the consumer thread's STT results.
struct BusEventObserver {
    tx: tokio::sync::mpsc::UnboundedSender<BusMessage>,
}

impl BusEventObserver {
    fn emit(&self, msg_type: &str, data: Value) {
        let _ = self.tx.send(BusMessage::new(msg_type, data, json!({})));
    }
}

impl PipelineObserver for BusEventObserver {
    fn on_event(&mut self, event: &RecognizerEvent) {
        info!(?event, "recognizer event");
        match event {
            RecognizerEvent::HotwordDetected { name } => {
                self.emit("recognizer_loop:hotword", json!({"hotword": name}));
            }
            RecognizerEvent::RecordBegin => {
                self.emit("recognizer_loop:record_begin", json!({}));
            }
            RecognizerEvent::RecordEnd { .. } => {
                self.emit("recognizer_loop:record_end", json!({}));
            }
            RecognizerEvent::Awoken => {
                self.emit("recognizer_loop:awoken", json!({}));
            }
        }
    }
    fn on_audio_discarded(&mut self, reason: &str) {
        info!(reason, "audio discarded");
    }
}

/// Everything the bootstrap binary (C9) needs to run the service to
/// completion: the bus facade (shared with the async bus-handler tasks),
/// the bus reader task, and the producer thread's join handle.
pub struct Service {
    pub facade: Arc<Facade>,
    pub bus_reader: tokio::task::JoinHandle<()>,
    producer_thread: Option<thread::JoinHandle<()>>,
    consumer_thread: Option<thread::JoinHandle<()>>,
}

impl Service {
    /// Builds every component from `config`, connects to the bus at
    /// `bus_url`, and spawns the producer and consumer threads. This is the
    /// one place that owns "start everything"; `main.rs` only calls this
    /// and then waits for a shutdown signal.
    pub async fn bootstrap(
        config: Config,
        config_provider: Arc<dyn ConfigProvider>,
        registry: Arc<dyn PluginRegistry>,
        bus_url: &str,
    ) -> Result<Self> {
        let hotword_entries = build_hotword_entries(&config, registry.as_ref())?;
        let hotwords = HotwordRegistry::new(
            hotword_entries,
            config.listener.sample_rate,
            config.listener.sample_width,
            config.listener.channels,
            config.listener.phoneme_duration_ms,
        );
        let shared_specs = hotwords.shared_specs();

        let (command_tx, command_rx) = bounded(PRODUCER_COMMAND_QUEUE);
        // Bridges the consumer thread's sync `on_outcome` callback into the
        // async world so `Facade::handle_stt_outcome` can emit bus replies;
        // `UnboundedSender::send` never blocks, so it's safe to call from
        // the consumer's plain OS thread.
        let (outcome_tx, mut outcome_rx) = tokio::sync::mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

        // `listener.enable_voice_loop = false` (spec §6 supplement, mirroring
        // the original's server-only deployment mode) skips opening a mic
        // and spawning the producer/consumer pair entirely; the facade still
        // serves `neon.get_stt`/`neon.audio_input` against file/base64 audio.
        let (consumer_commands, producer_thread, consumer_thread) = if config.listener.enable_voice_loop {
            let source = CpalAudioSource::default_device(config.listener.sample_rate, config.listener.channels)?;

            let listen_mode = if config.listener.wake_word_enabled {
                ListenMode::Wakeword
            } else {
                ListenMode::Continuous
            };
            let listener_state = ListenerState::new(listen_mode, source.mute_counter());

            let producer_stt = build_stt_adapter(&config, registry.as_ref())?;
            let can_stream = producer_stt.can_stream();
            let chunk_duration = Duration::from_secs_f64(CHUNK as f64 / config.listener.sample_rate as f64);
            let mut vad_config = config.listener.vad.config.clone();
            vad_config
                .entry("multiplier".into())
                .or_insert(json!(config.listener.multiplier));
            vad_config
                .entry("energy_ratio".into())
                .or_insert(json!(config.listener.energy_ratio));
            let vad = registry.build_vad(&config.listener.vad.module, &vad_config)?;
            let recognizer = Recognizer::with_vad(listener_state, chunk_duration, can_stream, vad);

            let transformer_chain = TransformerChain::new(build_transformers(registry.as_ref())?);

            let lang = config.lang.clone();
            let (item_tx, consumer_commands, consumer_thread) = spawn_consumer(
                producer_stt,
                move |outcome| {
                    let _ = outcome_tx.send(outcome);
                },
                lang,
            );

            let observer = BusEventObserver { tx: event_tx };
            let mut producer = Producer::new(source, hotwords, recognizer, transformer_chain, observer, item_tx);
            let producer_thread = thread::spawn(move || {
                if let Err(e) = producer.run(&command_rx, ExternalTriggers::default) {
                    tracing::error!(error = %e, "producer thread exited");
                }
            });

            (consumer_commands, Some(producer_thread), Some(consumer_thread))
        } else {
            info!("listener.enable_voice_loop is false, running in API-only mode without a mic");
            let (consumer_commands, _unused_rx) = crossbeam_channel::unbounded();
            (consumer_commands, None, None)
        };

        let pending = PendingRequests::new();
        let (bus, bus_reader, mut inbound_rx) = BusClient::connect(bus_url, pending).await?;

        let facade_transformers = TransformerChain::new(build_transformers(registry.as_ref())?);
        let facade_stt = build_stt_adapter(&config, registry.as_ref())?;
        let facade = Arc::new(Facade {
            stt: tokio::sync::Mutex::new(facade_stt),
            transformers: tokio::sync::Mutex::new(facade_transformers),
            hotwords: shared_specs,
            producer_commands: command_tx,
            consumer_commands,
            bus,
            profile: std::sync::Mutex::new(DefaultUserProfile::seed()),
            config: tokio::sync::Mutex::new(config),
            config_provider,
            registry,
            wake_word_gating: std::sync::atomic::AtomicBool::new(true),
        });

        let outcome_facade = facade.clone();
        tokio::spawn(async move {
            while let Some(outcome) = outcome_rx.recv().await {
                outcome_facade.handle_stt_outcome(outcome).await;
            }
        });

        let event_bus = facade.bus.clone();
        tokio::spawn(async move {
            while let Some(message) = event_rx.recv().await {
                if let Err(e) = event_bus.emit(&message).await {
                    tracing::warn!(error = %e, "failed to emit recognizer_loop event");
                }
            }
        });

        let dispatch_facade = facade.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                dispatch_facade.dispatch(message).await;
            }
        });

        Ok(Self {
            facade,
            bus_reader,
            producer_thread,
            consumer_thread,
        })
    }

    /// Blocks until the producer thread exits (audio source closed or a
    /// fatal error). Called from `main.rs` after a shutdown signal sets
    /// `ListenerState::running` to false via the recognizer's own path, or
    /// when the producer errors out on its own.
    pub fn join_producer(&mut self) {
        if let Some(handle) = self.producer_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.consumer_thread.take() {
            let _ = handle.join();
        }
    }
}

fn build_transformers(registry: &dyn PluginRegistry) -> Result<Vec<Box<dyn crate::transformers::AudioTransformer>>> {
    registry
        .known_transformer_ids()
        .iter()
        .map(|id| registry.build_transformer(id))
        .collect()
}

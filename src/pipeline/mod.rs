//! C6: producer/consumer pipeline (spec §4.6): the producer thread pulls
//! frames from an `AudioSource` and steps the hotword/recognizer/transformer
//! stack; the consumer thread drains a bounded queue of finished work and
//! forwards it to the STT adapter. Grounded on the teacher's
//! `speech_listener::create_stream` split between a realtime capture
//! callback and an `mpsc` channel drained by an independent consumer,
//! generalized from one `cpal` callback into a dedicated producer thread so
//! the recognizer/hotword/transformer work never runs inside the audio
//! callback itself (SPEC_FULL §4.1 redesign note).

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, warn};

use crate::audio::source::{AudioSource, MAX_MIC_RESTARTS};
use crate::audio::AudioClip;
use crate::hotword::HotwordRegistry;
use crate::recognizer::{ExternalTriggers, Recognizer, RecognizerEvent};
use crate::stt::SttAdapter;
use crate::transformers::{Context, TransformerChain};

/// Discard a finished phrase shorter than this (spec §4.6): almost
/// certainly a false trigger, not worth an STT round trip.
pub const MIN_AUDIO_SIZE: Duration = Duration::from_millis(500);
/// Backpressure ceiling for buffered-but-undrained `StreamData` frames
/// before the producer starts dropping them (spec §4.6).
pub const MAX_STREAM_BUFFER: Duration = Duration::from_secs(2);
/// How long a `StreamData` frame may sit undrained before it's dropped,
/// independent of total buffered duration.
pub const MAX_STREAM_FRAME_AGE: Duration = Duration::from_secs(1);
/// Consumer poll cadence when the queue is empty (spec §4.6).
const CONSUMER_POLL: Duration = Duration::from_millis(500);
const QUEUE_CAPACITY: usize = 64;

/// Commands the bus facade (C7) sends into the producer thread. Spec §5
/// requires `ListenerState` to be mutated only by the producer, so the
/// facade never reaches into the recognizer/hotword registry directly;
/// it queues a command here and the producer applies it between frames.
pub enum ProducerCommand {
    SetListenMode(crate::recognizer::ListenMode),
    SetSleeping(bool),
    SetHotwordActive { name: String, active: bool },
    /// `mycroft.mic.mute` / `mycroft.mic.unmute` (spec §6 consumed topics):
    /// increments/decrements the shared mute counter (spec §3 saturating
    /// semantics).
    Mute,
    Unmute,
    /// `handle_stop` (spec §5 cancellation): force the mute counter to 0.
    ForceUnmute,
    /// C8 reload (spec §4.8): swap in a rebuilt hotword engine set without
    /// tearing down C1. Carries the rebuilt entries plus the audio shape
    /// they were built against, applied via `HotwordRegistry::replace_entries`
    /// so the facade's existing `SharedSpecs` handle stays valid.
    ReplaceHotwords {
        entries: Vec<(crate::hotword::HotwordSpec, Box<dyn crate::hotword::HotwordEngine>)>,
        sample_rate: u32,
        sample_width: u16,
        channels: u16,
        phoneme_duration_ms: u64,
    },
    /// Graceful shutdown (spec §4.9 bootstrap binary): clears
    /// `ListenerState::running` so `Producer::run`'s loop exits on its next
    /// iteration and closes the audio source.
    Shutdown,
}

/// One unit of work handed from the producer to the consumer.
pub enum PipelineItem {
    /// A finished, transformer-processed utterance ready for batch STT.
    Audio(AudioClip, Context),
    StreamStart,
    StreamData(Vec<u8>),
    StreamStop,
}

/// Sink the producer reports recognizer/hotword lifecycle events to, so the
/// bus facade (C7) can emit `recognizer_loop:*` messages without the
/// pipeline depending on the bus client directly.
pub trait PipelineObserver: Send {
    fn on_event(&mut self, event: &RecognizerEvent) {
        let _ = event;
    }
    fn on_audio_discarded(&mut self, reason: &str) {
        let _ = reason;
    }
}

impl PipelineObserver for () {}

/// Runs the producer side: reads frames, feeds the hotword/recognizer/
/// transformer stack, and pushes finished work onto a bounded queue. Lives
/// on its own thread; `triggers_poll` is called once per frame to pick up
/// the current external-trigger snapshot (bus-set flags).
pub struct Producer<S: AudioSource, O: PipelineObserver> {
    source: S,
    hotwords: HotwordRegistry,
    recognizer: Recognizer,
    transformers: TransformerChain,
    observer: O,
    item_tx: Sender<PipelineItem>,
    streaming: bool,
    stream_buffer_secs: f64,
    stream_last_drain: Instant,
    mic_restarts: u32,
}

impl<S: AudioSource, O: PipelineObserver> Producer<S, O> {
    pub fn new(
        source: S,
        hotwords: HotwordRegistry,
        recognizer: Recognizer,
        transformers: TransformerChain,
        observer: O,
        item_tx: Sender<PipelineItem>,
    ) -> Self {
        Self {
            source,
            hotwords,
            recognizer,
            transformers,
            observer,
            item_tx,
            streaming: false,
            stream_buffer_secs: 0.0,
            stream_last_drain: Instant::now(),
            mic_restarts: 0,
        }
    }

    /// Runs until the recognizer's `ListenerState::running` is cleared or
    /// the audio source errors out. `commands` carries `ProducerCommand`s
    /// from the bus facade; `triggers_poll` is called once per frame to pick
    /// up the current external-trigger snapshot (bus-set flags).
    pub fn run(
        &mut self,
        commands: &Receiver<ProducerCommand>,
        mut triggers_poll: impl FnMut() -> ExternalTriggers,
    ) -> crate::error::Result<()> {
        self.source.open()?;
        loop {
            if !self.recognizer.state().running {
                break;
            }
            while let Ok(cmd) = commands.try_recv() {
                self.apply_command(cmd);
            }
            let frame = match self.source.read_frame() {
                Ok(frame) => {
                    self.mic_restarts = 0;
                    frame
                }
                Err(e) => self.recover_from_audio_io_error(e)?,
            };
            let triggers = triggers_poll();

            self.transformers.on_audio(&frame);
            let detections = self.hotwords.process_frame(&frame);
            if !detections.is_empty() {
                self.transformers.on_hotword(&frame);
            }

            let should_stream = self.recognizer.should_forward_to_stt_stream(&triggers);
            if self.streaming && should_stream {
                self.forward_stream_frame(&frame);
            }

            let events = self.recognizer.step(&frame, &detections, &triggers);
            for event in &events {
                self.observer.on_event(event);
                match event {
                    RecognizerEvent::RecordBegin => {
                        if self.recognizer.streaming_bypass_active() {
                            self.begin_stream();
                        }
                    }
                    RecognizerEvent::RecordEnd { clip } => {
                        if self.streaming {
                            self.end_stream();
                        } else {
                            self.finish_clip(clip.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        self.source.close();
        Ok(())
    }

    /// Classifies a `read_frame` failure as recoverable (spec §4.1/§7): retry
    /// via `restart()` up to `MAX_MIC_RESTARTS` times, escalating to a fatal
    /// error once exhausted.
    fn recover_from_audio_io_error(
        &mut self,
        first_error: crate::error::ListenerError,
    ) -> crate::error::Result<crate::audio::AudioFrame> {
        let mut last_error = first_error;
        while self.mic_restarts < MAX_MIC_RESTARTS {
            self.mic_restarts += 1;
            warn!(
                attempt = self.mic_restarts,
                max = MAX_MIC_RESTARTS,
                error = %last_error,
                "audio source errored, restarting"
            );
            self.observer.on_audio_discarded("mic_restart");
            if let Err(e) = self.source.restart() {
                last_error = e;
                continue;
            }
            match self.source.read_frame() {
                Ok(frame) => {
                    self.mic_restarts = 0;
                    return Ok(frame);
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn begin_stream(&mut self) {
        self.streaming = true;
        self.stream_buffer_secs = 0.0;
        self.stream_last_drain = Instant::now();
        let _ = self.item_tx.send(PipelineItem::StreamStart);
    }

    fn forward_stream_frame(&mut self, frame: &crate::audio::AudioFrame) {
        let frame_secs = frame.duration_secs();
        let undrained = self.stream_last_drain.elapsed();
        if self.stream_buffer_secs + frame_secs > MAX_STREAM_BUFFER.as_secs_f64()
            || undrained > MAX_STREAM_FRAME_AGE
        {
            warn!("dropping StreamData frame under backpressure");
            self.observer.on_audio_discarded("stream_backpressure");
            return;
        }
        match self.item_tx.try_send(PipelineItem::StreamData(frame.bytes.clone())) {
            Ok(()) => {
                self.stream_buffer_secs += frame_secs;
                self.stream_last_drain = Instant::now();
            }
            Err(TrySendError::Full(_)) => {
                warn!("pipeline queue full, dropping StreamData frame");
                self.observer.on_audio_discarded("queue_full");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn end_stream(&mut self) {
        self.streaming = false;
        let _ = self.item_tx.send(PipelineItem::StreamStop);
    }

    fn apply_command(&mut self, cmd: ProducerCommand) {
        match cmd {
            ProducerCommand::SetListenMode(mode) => self.recognizer.state_mut().listen_mode = mode,
            ProducerCommand::SetSleeping(sleeping) => self.recognizer.state_mut().sleeping = sleeping,
            ProducerCommand::SetHotwordActive { name, active } => self.hotwords.set_active(&name, active),
            ProducerCommand::Mute => self.source.mute(),
            ProducerCommand::Unmute => self.source.unmute(),
            ProducerCommand::ForceUnmute => self.recognizer.state().force_unmute(),
            ProducerCommand::Shutdown => self.recognizer.state_mut().running = false,
            ProducerCommand::ReplaceHotwords {
                entries,
                sample_rate,
                sample_width,
                channels,
                phoneme_duration_ms,
            } => self
                .hotwords
                .replace_entries(entries, sample_rate, sample_width, channels, phoneme_duration_ms),
        }
    }

    fn finish_clip(&mut self, clip: AudioClip) {
        if clip.duration_secs() < MIN_AUDIO_SIZE.as_secs_f64() {
            debug!(duration = clip.duration_secs(), "discarding short utterance");
            self.observer.on_audio_discarded("below_min_audio_size");
            self.recognizer.state().force_unmute();
            return;
        }
        let (clip, context) = self.transformers.on_speech_end(clip);
        let _ = self.item_tx.send(PipelineItem::Audio(clip, context));
    }
}

/// Result handed back from the consumer for one `Audio` item, so the bus
/// facade (C7) can turn it into `recognizer_loop:utterance`/`*.unknown`.
pub struct SttOutcome {
    pub transcriptions: Vec<(String, f32)>,
    pub context: Context,
    pub lang: String,
}

/// C8 reload command delivered to the consumer thread (spec §4.8: "rebuild
/// ... C5 if `stt.module` changed" without the consumer owning a lock the
/// bus facade would otherwise need to reach through).
pub enum ConsumerCommand {
    ReplaceStt(SttAdapter),
}

/// Runs the consumer side: drains the bounded queue on `CONSUMER_POLL`
/// cadence and forwards completed items to the `SttAdapter`. `commands` is
/// polled once per queue-drain cycle so an `stt.module` reload takes effect
/// without restarting the thread.
pub fn run_consumer(
    item_rx: Receiver<PipelineItem>,
    mut stt: SttAdapter,
    mut on_outcome: impl FnMut(SttOutcome),
    lang: &str,
    commands: &Receiver<ConsumerCommand>,
) {
    loop {
        while let Ok(ConsumerCommand::ReplaceStt(new_stt)) = commands.try_recv() {
            stt = new_stt;
        }
        match item_rx.recv_timeout(CONSUMER_POLL) {
            Ok(PipelineItem::Audio(clip, context)) => {
                match stt.execute(&clip.bytes, Some(lang)) {
                    Ok(transcriptions) => on_outcome(SttOutcome {
                        transcriptions,
                        context,
                        lang: lang.to_string(),
                    }),
                    Err(e) => warn!(error = %e, "stt execute failed"),
                }
            }
            Ok(PipelineItem::StreamStart) => {
                if let Err(e) = stt.stream_start(Some(lang)) {
                    warn!(error = %e, "stt stream_start failed");
                }
            }
            Ok(PipelineItem::StreamData(bytes)) => {
                if let Err(e) = stt.stream_data(&bytes) {
                    warn!(error = %e, "stt stream_data failed");
                }
            }
            Ok(PipelineItem::StreamStop) => match stt.stream_stop() {
                Ok(transcriptions) => on_outcome(SttOutcome {
                    transcriptions,
                    context: Context::new(),
                    lang: lang.to_string(),
                }),
                Err(e) => warn!(error = %e, "stt stream_stop failed"),
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Spawns the consumer on its own OS thread, returning the item sender the
/// producer should use, the `ConsumerCommand` sender C8 reload uses to swap
/// the STT plugin live, and the thread handle.
pub fn spawn_consumer(
    stt: SttAdapter,
    on_outcome: impl FnMut(SttOutcome) + Send + 'static,
    lang: String,
) -> (Sender<PipelineItem>, Sender<ConsumerCommand>, thread::JoinHandle<()>) {
    let (item_tx, item_rx) = bounded(QUEUE_CAPACITY);
    let (command_tx, command_rx) = bounded(4);
    let handle = thread::spawn(move || {
        let mut on_outcome = on_outcome;
        run_consumer(item_rx, stt, &mut on_outcome, &lang, &command_rx);
    });
    (item_tx, command_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::BufferedAudioSource;
    use crate::audio::AudioFrame;
    use crate::hotword::HotwordRegistry;
    use crate::recognizer::{ListenerState, ListenMode};
    use crate::stt::{SttPlugin, Transcription};
    use crate::error::Result as ListenerResult;

    struct StubStt;
    impl SttPlugin for StubStt {
        fn id(&self) -> &str {
            "stub"
        }
        fn execute(&mut self, _clip_bytes: &[u8], _lang: &str) -> ListenerResult<Vec<Transcription>> {
            Ok(vec![("hello world".into(), 0.99)])
        }
    }

    fn loud_frame() -> AudioFrame {
        AudioFrame {
            bytes: (0..1600).flat_map(|_| 20000i16.to_le_bytes()).collect(),
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
        }
    }

    #[test]
    fn short_utterance_is_discarded_before_reaching_the_queue() {
        let source = BufferedAudioSource::new(vec![], 16000, 2, 1);
        let hotwords = HotwordRegistry::new(vec![], 16000, 2, 1, 120);
        let recognizer = Recognizer::new(
            ListenerState::new(ListenMode::Wakeword, crate::audio::source::MuteCounter::new()),
            Duration::from_millis(100),
            false,
        );
        let transformers = TransformerChain::new(vec![]);
        let (item_tx, item_rx) = bounded(QUEUE_CAPACITY);
        let mut producer = Producer::new(source, hotwords, recognizer, transformers, (), item_tx);

        let short_clip = AudioClip::new(16000, 2, 1);
        producer.finish_clip(short_clip);

        assert!(item_rx.try_recv().is_err());
    }

    #[test]
    fn long_enough_clip_is_forwarded_to_the_queue() {
        let source = BufferedAudioSource::new(vec![], 16000, 2, 1);
        let hotwords = HotwordRegistry::new(vec![], 16000, 2, 1, 120);
        let recognizer = Recognizer::new(
            ListenerState::new(ListenMode::Wakeword, crate::audio::source::MuteCounter::new()),
            Duration::from_millis(100),
            false,
        );
        let transformers = TransformerChain::new(vec![]);
        let (item_tx, item_rx) = bounded(QUEUE_CAPACITY);
        let mut producer = Producer::new(source, hotwords, recognizer, transformers, (), item_tx);

        let mut clip = AudioClip::new(16000, 2, 1);
        for _ in 0..20 {
            clip.push_frame(&loud_frame());
        }
        producer.finish_clip(clip);

        assert!(matches!(item_rx.try_recv(), Ok(PipelineItem::Audio(_, _))));
    }
}

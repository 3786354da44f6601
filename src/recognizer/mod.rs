//! C4: responsive recognizer, the central state machine (spec §4.4).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::audio::{AudioClip, AudioFrame};
use crate::audio::source::MuteCounter;
use crate::hotword::HotwordDetection;
use crate::vad::{EnergyVad, Vad};

pub const RECORDING_TIMEOUT: Duration = Duration::from_secs(10);
pub const MIN_SILENCE_AT_END: Duration = Duration::from_millis(250);
pub const RECORDING_TIMEOUT_WITH_SILENCE: Duration = Duration::from_secs(3);
/// Minimum amount of loud audio a phrase must contain before a trailing
/// silence is accepted as end-of-phrase (not specified numerically upstream;
/// resolved as an Open Question in DESIGN.md).
pub const MIN_LOUD_SEC_PER_PHRASE: Duration = Duration::from_millis(300);
/// Cap on the rolling wake-word phrase buffer (spec §3 `PhraseBuffer`).
pub const SAVED_WW_SEC: f64 = 10.0;
/// Max frames retained in the `ww_frames` deque across the hotword→recording
/// transition (spec §3).
pub const MAX_WW_FRAMES: usize = 7;

const NOISE_FLOOR_CAP: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Wakeword,
    Continuous,
    Hybrid,
}

/// Mirrors spec §3 `ListenerState`. `muted_depth`/`is_muted` are backed by
/// the same `MuteCounter` the owning `AudioSource` uses, so both sides agree
/// on mute state without duplicated bookkeeping (spec §5: only the producer
/// thread mutates this; other threads take atomic snapshots).
#[derive(Clone)]
pub struct ListenerState {
    pub running: bool,
    pub sleeping: bool,
    pub listen_mode: ListenMode,
    mute_counter: MuteCounter,
}

impl ListenerState {
    pub fn new(listen_mode: ListenMode, mute_counter: MuteCounter) -> Self {
        Self {
            running: true,
            sleeping: false,
            listen_mode,
            mute_counter,
        }
    }

    pub fn muted_depth(&self) -> usize {
        self.mute_counter.depth()
    }

    pub fn is_muted(&self) -> bool {
        self.mute_counter.is_muted()
    }

    pub fn mute_counter(&self) -> MuteCounter {
        self.mute_counter.clone()
    }

    /// `handle_stop` forces the mute counter to 0 regardless of prior calls
    /// (spec §5 cancellation).
    pub fn force_unmute(&self) {
        self.mute_counter.force_unmute();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ListeningForWakeword,
    Recording,
    Finalizing,
}

/// What triggered (or should trigger) the `ListeningForWakeword -> Recording`
/// transition this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTrigger {
    ListenHotword,
    BusTriggerListen,
    ButtonPress,
    ContinuousMode,
}

#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    HotwordDetected { name: String },
    RecordBegin,
    /// `clip` is the full recorded phrase, including any preserved
    /// `ww_frames` prefix.
    RecordEnd { clip: AudioClip },
    Awoken,
}

/// External signals the producer observes alongside raw audio frames.
#[derive(Debug, Clone, Default)]
pub struct ExternalTriggers {
    pub trigger_listen: bool,
    pub button_press: bool,
    pub stt_result_ready: bool,
    pub assistant_is_speaking: bool,
}

struct RecordingProgress {
    clip: AudioClip,
    num_chunks: u32,
    loud_chunks: u32,
    trailing_silent_chunks: u32,
    total_silent_chunks: u32,
    elapsed: Duration,
}

/// The C4 state machine. Owns no audio source; the producer feeds it one
/// frame at a time alongside this cycle's hotword detections and external
/// triggers, and reacts to the returned events.
pub struct Recognizer {
    phase: Phase,
    state: ListenerState,
    chunk_duration: Duration,
    vad: Box<dyn Vad>,
    noise_floor: f64,
    ww_frames: VecDeque<AudioFrame>,
    recording: Option<RecordingProgress>,
    can_stream_stt: bool,
}

impl Recognizer {
    pub fn new(state: ListenerState, chunk_duration: Duration, can_stream_stt: bool) -> Self {
        Self::with_vad(state, chunk_duration, can_stream_stt, Box::new(EnergyVad::default()))
    }

    /// As `new`, but with an explicit VAD plugin (spec GLOSSARY: "a plugin
    /// VAD may replace" the default energy heuristic).
    pub fn with_vad(state: ListenerState, chunk_duration: Duration, can_stream_stt: bool, vad: Box<dyn Vad>) -> Self {
        Self {
            phase: Phase::Idle,
            state,
            chunk_duration,
            vad,
            noise_floor: 0.0,
            ww_frames: VecDeque::new(),
            recording: None,
            can_stream_stt,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ListenerState {
        &mut self.state
    }

    fn update_noise_floor(&mut self, loud: bool) {
        let delta = if loud { 200.0 } else { -100.0 } * self.chunk_duration.as_secs_f64();
        self.noise_floor = (self.noise_floor + delta).clamp(0.0, NOISE_FLOOR_CAP);
    }

    fn quiet_enough(&self) -> bool {
        self.noise_floor <= 0.0
    }

    fn continuous_streaming_bypass(&self) -> bool {
        self.state.listen_mode == ListenMode::Continuous && self.can_stream_stt
    }

    /// Whether the streaming bypass (spec §4.4) is active: continuous listen
    /// mode with an STT adapter that supports streaming.
    pub fn streaming_bypass_active(&self) -> bool {
        self.continuous_streaming_bypass()
    }

    fn push_ww_frame(&mut self, frame: AudioFrame) {
        if self.ww_frames.len() >= MAX_WW_FRAMES {
            self.ww_frames.pop_front();
        }
        self.ww_frames.push_back(frame);
    }

    fn begin_recording(&mut self, clip_format: (u32, u16, u16)) -> RecordingProgress {
        let mut clip = AudioClip::new(clip_format.0, clip_format.1, clip_format.2);
        for frame in self.ww_frames.drain(..) {
            clip.push_frame(&frame);
        }
        RecordingProgress {
            clip,
            num_chunks: 0,
            loud_chunks: 0,
            trailing_silent_chunks: 0,
            total_silent_chunks: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Advance the state machine by one frame. Returns any events raised
    /// this step (often empty).
    pub fn step(
        &mut self,
        frame: &AudioFrame,
        hotword_detections: &[HotwordDetection],
        triggers: &ExternalTriggers,
    ) -> Vec<RecognizerEvent> {
        let mut events = Vec::new();

        if !self.state.running {
            return events;
        }

        if self.state.sleeping {
            // Sleeping diverts everything into the wake-up detector; the
            // caller is expected to only pass the stand-up word's engine
            // while we're asleep, so any detection here means a match.
            if !hotword_detections.is_empty() {
                self.state.sleeping = false;
                self.phase = Phase::Idle;
                events.push(RecognizerEvent::Awoken);
            }
            return events;
        }

        match self.phase {
            Phase::Idle => {
                self.phase = Phase::ListeningForWakeword;
                self.step_listening(frame, hotword_detections, triggers, &mut events);
            }
            Phase::ListeningForWakeword => {
                self.step_listening(frame, hotword_detections, triggers, &mut events);
            }
            Phase::Recording => {
                self.step_recording(frame, triggers, &mut events);
            }
            Phase::Finalizing => {
                self.phase = Phase::Idle;
            }
        }

        events
    }

    fn step_listening(
        &mut self,
        frame: &AudioFrame,
        hotword_detections: &[HotwordDetection],
        triggers: &ExternalTriggers,
        events: &mut Vec<RecognizerEvent>,
    ) {
        for d in hotword_detections {
            events.push(RecognizerEvent::HotwordDetected { name: d.name.clone() });
        }

        self.push_ww_frame(frame.clone());

        let listen_hotword_hit = hotword_detections.iter().any(|d| d.listen);
        let continuous_entry = self.state.listen_mode == ListenMode::Continuous;

        let trigger = if listen_hotword_hit {
            Some(RecordTrigger::ListenHotword)
        } else if triggers.trigger_listen {
            Some(RecordTrigger::BusTriggerListen)
        } else if triggers.button_press {
            Some(RecordTrigger::ButtonPress)
        } else if continuous_entry {
            Some(RecordTrigger::ContinuousMode)
        } else {
            None
        };

        if let Some(_trigger) = trigger {
            self.phase = Phase::Recording;
            let format = (frame.sample_rate, frame.sample_width, frame.channels);
            self.recording = Some(self.begin_recording(format));
            events.push(RecognizerEvent::RecordBegin);
        }
    }

    fn step_recording(&mut self, frame: &AudioFrame, triggers: &ExternalTriggers, events: &mut Vec<RecognizerEvent>) {
        let loud = self.vad.is_loud(frame, self.chunk_duration.as_secs_f64());
        self.update_noise_floor(loud);

        let progress = self
            .recording
            .as_mut()
            .expect("Recording phase without progress state");

        progress.clip.push_frame(frame);
        progress.num_chunks += 1;
        progress.elapsed += self.chunk_duration;

        if loud {
            progress.loud_chunks += 1;
            progress.trailing_silent_chunks = 0;
        } else if self.quiet_enough() {
            progress.trailing_silent_chunks += 1;
            progress.total_silent_chunks += 1;
        }

        let trailing_silence_secs = progress.trailing_silent_chunks as f64 * self.chunk_duration.as_secs_f64();
        let loud_secs = progress.loud_chunks as f64 * self.chunk_duration.as_secs_f64();
        let total_silent_secs = progress.total_silent_chunks as f64 * self.chunk_duration.as_secs_f64();

        let timed_out = progress.elapsed >= RECORDING_TIMEOUT;
        let silence_with_content = trailing_silence_secs >= MIN_SILENCE_AT_END.as_secs_f64()
            && (loud_secs >= MIN_LOUD_SEC_PER_PHRASE.as_secs_f64()
                || total_silent_secs >= RECORDING_TIMEOUT_WITH_SILENCE.as_secs_f64());
        let streaming_done = self.continuous_streaming_bypass() && triggers.stt_result_ready;
        let button_press = triggers.button_press;

        if timed_out || silence_with_content || streaming_done || button_press {
            let clip = self.recording.take().unwrap().clip;
            self.phase = Phase::Finalizing;
            events.push(RecognizerEvent::RecordEnd { clip });
        }
    }

    /// Whether the current frame should be withheld from the streaming STT
    /// forward path (spec §4.4: "filters out frames while the assistant's
    /// own TTS is speaking"). The frame is still recorded into the clip the
    /// transformer chain sees; only the live STT stream is gated.
    pub fn should_forward_to_stt_stream(&self, triggers: &ExternalTriggers) -> bool {
        !(self.continuous_streaming_bypass() && triggers.assistant_is_speaking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MuteCounter;

    fn frame(amp: i16) -> AudioFrame {
        AudioFrame {
            bytes: (0..160).flat_map(|_| amp.to_le_bytes()).collect(),
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
        }
    }

    fn recognizer() -> Recognizer {
        let state = ListenerState::new(ListenMode::Wakeword, MuteCounter::new());
        Recognizer::new(state, Duration::from_millis(10), false)
    }

    #[test]
    fn idle_advances_to_listening_without_events() {
        let mut r = recognizer();
        let events = r.step(&frame(0), &[], &ExternalTriggers::default());
        assert!(events.is_empty());
        assert_eq!(r.phase(), Phase::ListeningForWakeword);
    }

    #[test]
    fn listen_hotword_opens_recording() {
        let mut r = recognizer();
        r.step(&frame(0), &[], &ExternalTriggers::default());
        let det = vec![HotwordDetection {
            name: "hey".into(),
            listen: true,
            utterance: None,
        }];
        let events = r.step(&frame(0), &det, &ExternalTriggers::default());
        assert_eq!(r.phase(), Phase::Recording);
        assert!(events.iter().any(|e| matches!(e, RecognizerEvent::RecordBegin)));
    }

    #[test]
    fn recording_times_out_after_recording_timeout() {
        let mut r = recognizer();
        r.step(&frame(0), &[], &ExternalTriggers::default());
        let det = vec![HotwordDetection {
            name: "hey".into(),
            listen: true,
            utterance: None,
        }];
        r.step(&frame(0), &det, &ExternalTriggers::default());
        assert_eq!(r.phase(), Phase::Recording);

        let chunks_for_timeout = (RECORDING_TIMEOUT.as_secs_f64() / 0.01).ceil() as usize + 1;
        let mut ended = false;
        for _ in 0..chunks_for_timeout {
            let events = r.step(&frame(20000), &[], &ExternalTriggers::default());
            if events.iter().any(|e| matches!(e, RecognizerEvent::RecordEnd { .. })) {
                ended = true;
                break;
            }
        }
        assert!(ended, "expected a RecordEnd before the cap");
    }

    #[test]
    fn button_press_force_ends_recording() {
        let mut r = recognizer();
        r.step(&frame(0), &[], &ExternalTriggers::default());
        let det = vec![HotwordDetection {
            name: "hey".into(),
            listen: true,
            utterance: None,
        }];
        r.step(&frame(0), &det, &ExternalTriggers::default());
        let triggers = ExternalTriggers {
            button_press: true,
            ..Default::default()
        };
        let events = r.step(&frame(0), &[], &triggers);
        assert!(events.iter().any(|e| matches!(e, RecognizerEvent::RecordEnd { .. })));
    }

    #[test]
    fn sleeping_withholds_normal_hotword_open() {
        let mut r = recognizer();
        r.state_mut().sleeping = true;
        let events = r.step(&frame(0), &[], &ExternalTriggers::default());
        assert!(events.is_empty());
        assert_eq!(r.phase(), Phase::Idle);
    }
}

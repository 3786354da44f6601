//! C1: audio source (spec §4.1).
//!
//! `open`/`read_frame`/`mute`/`unmute`/`is_muted`/`restart`/`close`, fed to
//! the producer thread. `read_frame` blocks until `CHUNK` samples are ready;
//! while muted it still returns frames in real time, but of silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, warn};

use crate::audio::{AudioFrame, CHUNK};
use crate::error::{ListenerError, Result};

/// Saturating mute counter shared between an `AudioSource` and whatever
/// mirrors it into `ListenerState` (spec §3: mute increments, unmute
/// decrements saturating at 0, `force_unmute` resets to 0).
#[derive(Debug, Clone, Default)]
pub struct MuteCounter(Arc<AtomicUsize>);

impl MuteCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    pub fn mute(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)));
    }

    pub fn force_unmute(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    pub fn depth(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub const MAX_MIC_RESTARTS: u32 = 20;

pub trait AudioSource: Send {
    fn open(&mut self) -> Result<()>;
    fn read_frame(&mut self) -> Result<AudioFrame>;
    fn mute(&self);
    fn unmute(&self);
    fn is_muted(&self) -> bool;
    fn restart(&mut self) -> Result<()>;
    fn close(&mut self);
    fn sample_rate(&self) -> u32;
    fn sample_width(&self) -> u16;
    fn channels(&self) -> u16;
}

/// Live microphone source backed by `cpal`.
///
/// Grounded in the teacher crate's `cpal` input-stream setup, redesigned per
/// SPEC_FULL §4.1: the `cpal` callback only pushes raw samples into a bounded
/// channel; `read_frame` assembles `CHUNK`-sized frames on the calling
/// (producer) thread instead of doing recognizer work inside the realtime
/// audio callback.
pub struct CpalAudioSource {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    rx: Option<Receiver<Vec<f32>>>,
    mute_counter: MuteCounter,
    pending: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl CpalAudioSource {
    pub fn default_device(sample_rate: u32, channels: u16) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ListenerError::AudioIo("no default input device".into()))?;
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        Ok(Self {
            device,
            config,
            stream: None,
            rx: None,
            mute_counter: MuteCounter::new(),
            pending: Vec::new(),
            sample_rate,
            channels,
        })
    }

    pub fn mute_counter(&self) -> MuteCounter {
        self.mute_counter.clone()
    }

    fn pop_chunk(&mut self, samples: usize) -> Option<Vec<f32>> {
        if self.pending.len() >= samples {
            Some(self.pending.drain(..samples).collect())
        } else {
            None
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                |err| error!(error = %err, "cpal input stream error"),
                None,
            )
            .map_err(|e| ListenerError::AudioIo(e.to_string()))?;
        stream
            .play()
            .map_err(|e| ListenerError::AudioIo(e.to_string()))?;
        self.stream = Some(stream);
        self.rx = Some(rx);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<AudioFrame> {
        loop {
            if let Some(samples) = self.pop_chunk(CHUNK) {
                return Ok(self.samples_to_frame(samples));
            }
            let rx = self
                .rx
                .as_ref()
                .ok_or_else(|| ListenerError::AudioIo("audio source not opened".into()))?;
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ListenerError::AudioIo("mic read timed out".into()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ListenerError::AudioIo("mic stream disconnected".into()));
                }
            }
        }
    }

    fn mute(&self) {
        self.mute_counter.mute();
    }

    fn unmute(&self) {
        self.mute_counter.unmute();
    }

    fn is_muted(&self) -> bool {
        self.mute_counter.is_muted()
    }

    fn restart(&mut self) -> Result<()> {
        warn!("restarting audio source after overflow");
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.stream = None;
        self.rx = None;
        self.pending.clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_width(&self) -> u16 {
        2
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl CpalAudioSource {
    fn samples_to_frame(&self, samples: Vec<f32>) -> AudioFrame {
        if self.is_muted() {
            return AudioFrame::silence(samples.len(), self.sample_rate, 2, self.channels);
        }
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let v = (clamped * i16::MAX as f32) as i16;
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        AudioFrame {
            bytes,
            sample_rate: self.sample_rate,
            sample_width: 2,
            channels: self.channels,
        }
    }
}

/// Deterministic source replaying a fixed list of frames, used in tests and
/// for driving the producer/consumer pipeline against fixture audio.
pub struct BufferedAudioSource {
    frames: std::collections::VecDeque<AudioFrame>,
    mute_counter: MuteCounter,
    sample_rate: u32,
    sample_width: u16,
    channels: u16,
    exhausted_is_eof: bool,
}

impl BufferedAudioSource {
    pub fn new(frames: Vec<AudioFrame>, sample_rate: u32, sample_width: u16, channels: u16) -> Self {
        Self {
            frames: frames.into(),
            mute_counter: MuteCounter::new(),
            sample_rate,
            sample_width,
            channels,
            exhausted_is_eof: true,
        }
    }
}

impl AudioSource for BufferedAudioSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<AudioFrame> {
        if self.is_muted() {
            return Ok(AudioFrame::silence(
                CHUNK,
                self.sample_rate,
                self.sample_width,
                self.channels,
            ));
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None if self.exhausted_is_eof => Err(ListenerError::AudioIo("end of fixture audio".into())),
            None => Ok(AudioFrame::silence(
                CHUNK,
                self.sample_rate,
                self.sample_width,
                self.channels,
            )),
        }
    }

    fn mute(&self) {
        self.mute_counter.mute();
    }

    fn unmute(&self) {
        self.mute_counter.unmute();
    }

    fn is_muted(&self) -> bool {
        self.mute_counter.is_muted()
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.frames.clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_width(&self) -> u16 {
        self.sample_width
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_counter_saturates_and_force_unmutes() {
        let c = MuteCounter::new();
        c.unmute(); // unmute below 0 is a no-op
        assert!(!c.is_muted());
        c.mute();
        c.mute();
        c.unmute();
        assert!(c.is_muted());
        c.force_unmute();
        assert!(!c.is_muted());
    }

    #[test]
    fn buffered_source_returns_silence_when_muted() {
        let frame = AudioFrame {
            bytes: vec![1, 2, 3, 4],
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
        };
        let mut src = BufferedAudioSource::new(vec![frame], 16000, 2, 1);
        src.mute();
        let out = src.read_frame().unwrap();
        assert!(out.bytes.iter().all(|&b| b == 0));
    }
}

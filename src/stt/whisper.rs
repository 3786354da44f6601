//! `WhisperSttPlugin`: local, offline batch transcription via `whisper-rs`
//! (spec §4.5). Grounded on the teacher's `SpeechDetector`/`SpeechToTextClient`
//! worker-thread-plus-`oneshot` pattern (`speech.rs`), generalized from a
//! single hardcoded client into one `SttPlugin` implementation the adapter
//! can select by id.

use std::sync::mpsc;
use std::thread;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use crate::error::{ListenerError, Result};
use crate::stt::{SttPlugin, Transcription};

enum Job {
    Transcribe {
        samples: Vec<f32>,
        response_tx: oneshot::Sender<Result<Vec<Transcription>>>,
    },
    Shutdown,
}

/// Owns the whisper model on a dedicated worker thread; `whisper-rs`'s
/// `WhisperState` is not `Send` across calls under load, so every request
/// is funneled through a single-threaded worker rather than shared directly.
pub struct WhisperSttPlugin {
    job_tx: mpsc::Sender<Job>,
    worker: Option<thread::JoinHandle<()>>,
    stream_buffer: Vec<f32>,
    streaming: bool,
}

impl WhisperSttPlugin {
    pub fn new(model_path: &str) -> Result<Self> {
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| ListenerError::PluginLoad {
                plugin_id: "whisper".into(),
                reason: e.to_string(),
            })?;
        let mut state: WhisperState = ctx
            .create_state()
            .map_err(|e| ListenerError::PluginLoad {
                plugin_id: "whisper".into(),
                reason: e.to_string(),
            })?;

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let worker = thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                match job {
                    Job::Transcribe { samples, response_tx } => {
                        let result = run_inference(&mut state, &samples);
                        let _ = response_tx.send(result);
                    }
                    Job::Shutdown => break,
                }
            }
        });

        Ok(Self {
            job_tx,
            worker: Some(worker),
            stream_buffer: Vec::new(),
            streaming: false,
        })
    }

    fn transcribe(&self, samples: Vec<f32>) -> Result<Vec<Transcription>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.job_tx
            .send(Job::Transcribe { samples, response_tx })
            .map_err(|_| ListenerError::PluginRuntime {
                plugin_id: "whisper".into(),
                reason: "worker thread is gone".into(),
            })?;
        response_rx.recv().map_err(|_| ListenerError::PluginRuntime {
            plugin_id: "whisper".into(),
            reason: "worker thread dropped the response channel".into(),
        })?
    }
}

impl Drop for WhisperSttPlugin {
    fn drop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_inference(state: &mut WhisperState, samples: &[f32]) -> Result<Vec<Transcription>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    state.full(params, samples).map_err(|e| ListenerError::PluginRuntime {
        plugin_id: "whisper".into(),
        reason: e.to_string(),
    })?;

    let mut out = Vec::new();
    for segment in state.as_iter() {
        out.push((segment.to_string(), 1.0));
    }
    Ok(out)
}

/// Decodes little-endian 16-bit PCM bytes into whisper's expected `[-1, 1]`
/// mono f32 samples.
fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

impl SttPlugin for WhisperSttPlugin {
    fn id(&self) -> &str {
        "whisper"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn execute(&mut self, clip_bytes: &[u8], _lang: &str) -> Result<Vec<Transcription>> {
        self.transcribe(pcm16_to_f32(clip_bytes))
    }

    // Whisper's decoder works over a complete utterance; we model
    // "streaming" here by buffering frames and running one batch pass at
    // `stream_stop`, rather than claiming word-by-word partials we can't
    // actually produce.
    fn stream_start(&mut self, _lang: &str) -> Result<()> {
        self.stream_buffer.clear();
        self.streaming = true;
        Ok(())
    }

    fn stream_data(&mut self, frame_bytes: &[u8]) -> Result<()> {
        if !self.streaming {
            return Err(ListenerError::PluginRuntime {
                plugin_id: "whisper".into(),
                reason: "stream_data called before stream_start".into(),
            });
        }
        self.stream_buffer.extend(pcm16_to_f32(frame_bytes));
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<Vec<Transcription>> {
        self.streaming = false;
        let samples = std::mem::take(&mut self.stream_buffer);
        self.transcribe(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_decode_round_trips_amplitude() {
        let bytes = 1000_i16.to_le_bytes().repeat(4);
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 4);
        assert!((samples[0] - 1000.0 / 32768.0).abs() < 1e-6);
    }
}

//! Linear-interpolation resampler, grounded in the teacher crate's
//! `audio_resampler.rs`. Used to bring mic-rate audio down to the 16kHz
//! rate most STT/hotword/VAD plugins expect, and to rechunk the result to a
//! target chunk size.

pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    buffer: Vec<f32>,
    target_chunk_size: usize,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, target_chunk_size: usize) -> Self {
        Self {
            input_rate,
            output_rate,
            buffer: Vec::new(),
            target_chunk_size,
        }
    }

    /// Resample `input` and split the accumulated output into
    /// `target_chunk_size` chunks, carrying any remainder to the next call.
    pub fn resample(&mut self, input: &[f32]) -> Vec<Vec<f32>> {
        if self.input_rate == self.output_rate {
            self.buffer.extend_from_slice(input);
        } else {
            let ratio = self.output_rate as f64 / self.input_rate as f64;
            let output_len = (input.len() as f64 * ratio) as usize;
            let mut resampled = Vec::with_capacity(output_len);
            for i in 0..output_len {
                let src_index = i as f64 / ratio;
                let floor = src_index.floor() as usize;
                let ceil = (floor + 1).min(input.len().saturating_sub(1));
                let frac = src_index - floor as f64;
                if floor >= input.len() {
                    break;
                }
                let sample = input[floor] * (1.0 - frac) as f32 + input[ceil] * frac as f32;
                resampled.push(sample);
            }
            self.buffer.extend(resampled);
        }

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.target_chunk_size {
            let chunk: Vec<f32> = self.buffer.drain(..self.target_chunk_size).collect();
            chunks.push(chunk);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_rates_match() {
        let mut r = Resampler::new(16000, 16000, 4);
        let chunks = r.resample(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(chunks, vec![vec![0.1, 0.2, 0.3, 0.4]]);
    }

    #[test]
    fn downsamples_and_rechunks() {
        let mut r = Resampler::new(48000, 16000, 2);
        let input = vec![0.0f32; 48];
        let chunks = r.resample(&input);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.len() == 2));
    }
}

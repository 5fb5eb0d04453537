//! WAV file loading for replays and the benchmark.

use std::path::Path;

use anyhow::Context;

/// Interleaved float samples of a whole file.
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl WavAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels.max(1)) as f64 / self.sample_rate as f64
    }

    /// Interleaved blocks of `frames` frames (the last one may be short).
    pub fn blocks(&self, frames: usize) -> std::slice::Chunks<'_, f32> {
        self.samples.chunks(frames.max(1) * self.channels.max(1))
    }
}

pub fn read_wav(path: &Path) -> anyhow::Result<WavAudio> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            // Full scale is 2^(bits - 1) at every depth, 8-bit included.
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(WavAudio {
        samples,
        channels: usize::from(spec.channels.max(1)),
        sample_rate: spec.sample_rate,
    })
}

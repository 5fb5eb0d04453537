//! Typed audio chunk handed from the capture collaborator to the pipeline.

/// One ingestion callback's worth of PCM audio, one sequence per channel.
///
/// Immutable once built: stages that transform audio (the preprocessor)
/// return a new chunk, so a producer or observer still holding the original
/// never sees it change.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioChunk {
    /// Build a chunk from per-channel sample vectors.
    ///
    /// Channels of unequal length are truncated to the shortest one so every
    /// channel always covers the same frames.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(frames);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel chunk.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    /// Split an interleaved device buffer (`L R L R …`) into channels.
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(data: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        if channel_count == 0 {
            return Self::new(Vec::new(), sample_rate);
        }
        let frames = data.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in data.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn frame_len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Duration of this chunk in seconds (0 when the rate is unknown).
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_len() as f64 / self.sample_rate as f64
    }

    /// True for chunks that carry no audio: no channels, no frames, or no rate.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.frame_len() == 0 || self.sample_rate == 0
    }

    /// Average all channels into one mono vector.
    pub fn downmix(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let scale = 1.0 / n as f32;
                (0..self.frame_len())
                    .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_split_drops_partial_frame() {
        let chunk = AudioChunk::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5], 2, 48_000);
        assert_eq!(chunk.channel_count(), 2);
        assert_eq!(chunk.frame_len(), 2);
        assert_eq!(chunk.channel(0), Some(&[0.1, 0.3][..]));
        assert_eq!(chunk.channel(1), Some(&[0.2, 0.4][..]));
    }

    #[test]
    fn unequal_channels_are_truncated() {
        let chunk = AudioChunk::new(vec![vec![1.0; 10], vec![1.0; 7]], 16_000);
        assert_eq!(chunk.frame_len(), 7);
        assert!(chunk.channels().iter().all(|c| c.len() == 7));
    }

    #[test]
    fn downmix_averages_channels() {
        let chunk = AudioChunk::new(vec![vec![1.0, 0.0], vec![0.0, -1.0]], 16_000);
        assert_eq!(chunk.downmix(), vec![0.5, -0.5]);
    }

    #[test]
    fn empty_variants() {
        assert!(AudioChunk::new(Vec::new(), 16_000).is_empty());
        assert!(AudioChunk::mono(Vec::new(), 16_000).is_empty());
        assert!(AudioChunk::mono(vec![0.0; 4], 0).is_empty());
        assert!(!AudioChunk::mono(vec![0.0; 4], 16_000).is_empty());
    }

    #[test]
    fn duration_matches_frames() {
        let chunk = AudioChunk::mono(vec![0.0; 480], 48_000);
        assert!((chunk.duration_secs() - 0.01).abs() < 1e-12);
    }
}

//! Producer side of the chunk ring.
//!
//! `IngestHandle::ingest` is what a capture callback calls. It never blocks
//! and never waits for the worker: a full ring drops the chunk and counts it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    buffering::{chunk::AudioChunk, ChunkProducer, Observer, Producer},
    engine::pipeline::PipelineDiagnostics,
    error::{Result, WhistleError},
};

/// Hand-off point from an audio source into a running session.
///
/// One per session; `Send` so it can move into a device callback.
pub struct IngestHandle {
    producer: ChunkProducer,
    running: Arc<AtomicBool>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl IngestHandle {
    pub(crate) fn new(
        producer: ChunkProducer,
        running: Arc<AtomicBool>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            producer,
            running,
            diagnostics,
        }
    }

    /// Queue `chunk` for analysis.
    ///
    /// # Errors
    /// - `WhistleError::SessionClosed` once the engine has been stopped.
    /// - `WhistleError::ChunkRingFull` when the worker is behind; the chunk
    ///   is dropped.
    pub fn ingest(&mut self, chunk: AudioChunk) -> Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(WhistleError::SessionClosed);
        }
        let frames = chunk.frame_len();
        match self.producer.try_push(chunk) {
            Ok(()) => {
                self.diagnostics.chunks_in.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.frames_in.fetch_add(frames, Ordering::Relaxed);
                Ok(())
            }
            Err(_dropped) => {
                self.diagnostics
                    .chunks_dropped
                    .fetch_add(1, Ordering::Relaxed);
                Err(WhistleError::ChunkRingFull)
            }
        }
    }

    /// Convenience for callbacks that deliver interleaved frames.
    pub fn ingest_interleaved(
        &mut self,
        data: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<()> {
        self.ingest(AudioChunk::from_interleaved(data, channel_count, sample_rate))
    }

    /// Chunks the ring can take right now. File replays poll this instead of
    /// letting `ingest` drop.
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }

    /// False once the session this handle belongs to has stopped.
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for IngestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandle")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_chunk_ring, ChunkConsumer};

    fn handle(
        capacity: usize,
        open: bool,
    ) -> (IngestHandle, Arc<PipelineDiagnostics>, ChunkConsumer) {
        let (producer, consumer) = create_chunk_ring(capacity);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let h = IngestHandle::new(
            producer,
            Arc::new(AtomicBool::new(open)),
            Arc::clone(&diagnostics),
        );
        (h, diagnostics, consumer)
    }

    #[test]
    fn full_ring_drops_and_counts() {
        let (mut h, diagnostics, _consumer) = handle(2, true);
        assert!(h.ingest(AudioChunk::mono(vec![0.0; 10], 16_000)).is_ok());
        assert!(h.ingest(AudioChunk::mono(vec![0.0; 10], 16_000)).is_ok());
        assert!(matches!(
            h.ingest(AudioChunk::mono(vec![0.0; 10], 16_000)),
            Err(WhistleError::ChunkRingFull)
        ));
        assert_eq!(h.vacant(), 0);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.chunks_in, 2);
        assert_eq!(snap.frames_in, 20);
        assert_eq!(snap.chunks_dropped, 1);
    }

    #[test]
    fn closed_session_rejects_chunks() {
        let (mut h, diagnostics, _consumer) = handle(4, false);
        assert!(!h.is_open());
        assert!(matches!(
            h.ingest_interleaved(&[0.0; 8], 2, 48_000),
            Err(WhistleError::SessionClosed)
        ));
        assert_eq!(diagnostics.snapshot().chunks_in, 0);
    }
}

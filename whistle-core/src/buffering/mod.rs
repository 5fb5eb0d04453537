//! Lock-free SPSC handoff of whole chunks, plus the rolling analysis window.
//!
//! `ringbuf::HeapRb<AudioChunk>` gives a wait-free `try_push` that is safe to
//! call from the real-time capture callback. Chunk boundaries are preserved,
//! which the rolling window and the per-chunk decimation rely on.

pub mod chunk;
pub mod rolling;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

use chunk::AudioChunk;

/// Producer half — held by the capture collaborator.
pub type ChunkProducer = ringbuf::HeapProd<AudioChunk>;

/// Consumer half — held by the pipeline worker.
pub type ChunkConsumer = ringbuf::HeapCons<AudioChunk>;

/// Default ring depth: 512 chunks ≈ 5 s of 10 ms device buffers.
pub const DEFAULT_RING_CHUNKS: usize = 512;

/// Create a matched producer/consumer pair with room for `capacity` chunks.
pub fn create_chunk_ring(capacity: usize) -> (ChunkProducer, ChunkConsumer) {
    HeapRb::<AudioChunk>::new(capacity.max(1)).split()
}

//! Lock-free SPSC ring buffer carrying raw samples from the audio callback
//! thread to the pipeline thread. `push_slice`/`pop_slice` are wait-free and
//! allocation-free, which is the real-time audio callback's only hard
//! requirement.

use ringbuf::HeapRb;

pub use ringbuf::traits::{Consumer, Producer, Split};

pub type SampleProducer = ringbuf::HeapProd<f32>;
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// A few seconds of headroom at 24 kHz mono — this pipeline discards stale
/// audio rather than accumulate unbounded dictation, unlike an offline
/// transcription buffer.
pub const RING_CAPACITY: usize = 1 << 17;

pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

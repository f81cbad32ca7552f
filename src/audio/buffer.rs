//! Lock-free sample ring between the jitter drain and the output callback
//!
//! A single-producer single-consumer ring of f32 samples. The producer is the
//! render-drain thread, the consumer is the output device callback, so both
//! ends must stay wait-free. Overflow drops the newest samples, underflow is
//! padded with silence; both are counted rather than surfaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared overflow/underflow counters for one ring.
#[derive(Debug, Default)]
pub struct RingStats {
    overflow_samples: AtomicU64,
    underflow_samples: AtomicU64,
}

impl RingStats {
    pub fn overflow_samples(&self) -> u64 {
        self.overflow_samples.load(Ordering::Relaxed)
    }

    pub fn underflow_samples(&self) -> u64 {
        self.underflow_samples.load(Ordering::Relaxed)
    }
}

/// Producer half, owned by the render-drain thread.
pub struct RingProducer {
    inner: rtrb::Producer<f32>,
    stats: Arc<RingStats>,
}

/// Consumer half, owned by the output callback.
pub struct RingConsumer {
    inner: rtrb::Consumer<f32>,
    stats: Arc<RingStats>,
}

/// Create a bounded SPSC sample ring.
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let stats = Arc::new(RingStats::default());
    (
        RingProducer {
            inner: producer,
            stats: stats.clone(),
        },
        RingConsumer {
            inner: consumer,
            stats,
        },
    )
}

impl RingProducer {
    /// Write as many samples as fit. Samples that do not fit are dropped
    /// (newest first) and counted as overflow.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &sample in samples {
            if self.inner.push(sample).is_err() {
                break;
            }
            written += 1;
        }
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.stats
                .overflow_samples
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }

    /// Samples currently writable without overflow.
    pub fn space(&self) -> usize {
        self.inner.slots()
    }

    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}

impl RingConsumer {
    /// Fill `out` from the ring, zero-padding whatever is missing. The
    /// shortfall is counted as underflow. Wait-free.
    pub fn pop_slice(&mut self, out: &mut [f32]) -> usize {
        let mut read = 0;
        for slot in out.iter_mut() {
            match self.inner.pop() {
                Ok(sample) => {
                    *slot = sample;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        for slot in out[read..].iter_mut() {
            *slot = 0.0;
        }
        let missing = out.len() - read;
        if missing > 0 {
            self.stats
                .underflow_samples
                .fetch_add(missing as u64, Ordering::Relaxed);
        }
        read
    }

    /// Samples currently buffered.
    pub fn fill(&self) -> usize {
        self.inner.slots()
    }

    /// Discard everything buffered.
    pub fn drain(&mut self) {
        while self.inner.pop().is_ok() {}
    }

    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}

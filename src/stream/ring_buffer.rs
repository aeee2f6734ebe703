//! Sample ring buffer shared between the decode producer and the renderer
//!
//! Fixed-capacity circular buffer of interleaved normalized f32 samples.
//! Both sides signal backpressure through short writes/reads instead of
//! blocking:
//! - `write` stores at most the free space and returns the count actually
//!   written; a full buffer returns 0 and the producer must retry later.
//! - `read` returns at most what is buffered; an empty buffer returns 0 and
//!   the consumer fills the gap with silence.
//!
//! ## Thread Safety
//!
//! The buffer is split into producer and consumer halves at construction.
//! Each half is protected by its own Mutex, held only for the duration of
//! the slice copy (never across I/O). Occupancy is tracked by an atomic
//! counter so `len()` and `fill_percent()` never take a lock; the counter
//! always stays within `[0, capacity]`.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Thread-safe ring buffer of interleaved f32 samples
pub struct SampleRingBuffer {
    /// Producer half (decode worker writes)
    prod: Mutex<HeapProd<f32>>,

    /// Consumer half (renderer reads)
    cons: Mutex<HeapCons<f32>>,

    /// Current occupancy in samples
    len: AtomicUsize,

    /// Total capacity in samples (fixed at construction)
    capacity: usize,

    /// Short-write events (producer found the buffer full)
    short_writes: AtomicU64,

    /// Short-read events (consumer found the buffer drained)
    short_reads: AtomicU64,
}

impl SampleRingBuffer {
    /// Create a new ring buffer holding `capacity` interleaved samples
    pub fn new(capacity: usize) -> Self {
        debug!("Creating sample ring buffer: capacity={} samples", capacity);
        let (prod, cons) = HeapRb::<f32>::new(capacity).split();

        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            len: AtomicUsize::new(0),
            capacity,
            short_writes: AtomicU64::new(0),
            short_reads: AtomicU64::new(0),
        }
    }

    /// Write samples, returning how many were stored
    ///
    /// Writes at most the free space available and never blocks. A return
    /// value smaller than `samples.len()` (including 0 when full) is the
    /// backpressure signal; the producer retries the remainder later.
    pub fn write(&self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let written = {
            let mut prod = self.prod.lock().unwrap();
            prod.push_slice(samples)
        };

        if written > 0 {
            self.len.fetch_add(written, Ordering::Release);
        }
        if written < samples.len() {
            let count = self.short_writes.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                trace!(
                    "Ring buffer short write ({}/{} samples, total events: {})",
                    written,
                    samples.len(),
                    count
                );
            }
        }

        written
    }

    /// Read samples into `out`, returning how many were copied
    ///
    /// Returns at most what is available and never blocks; 0 when empty.
    pub fn read(&self, out: &mut [f32]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let read = {
            let mut cons = self.cons.lock().unwrap();
            cons.pop_slice(out)
        };

        if read > 0 {
            self.len.fetch_sub(read, Ordering::Release);
        }
        if read < out.len() {
            self.short_reads.fetch_add(1, Ordering::Relaxed);
        }

        read
    }

    /// Reset the buffer to empty
    ///
    /// Holds both halves for the duration of the drain so no concurrent
    /// write or read can interleave with the reset.
    pub fn clear(&self) {
        let _prod = self.prod.lock().unwrap();
        let mut cons = self.cons.lock().unwrap();
        let drained = cons.clear();
        self.len.store(0, Ordering::Release);
        debug!("Ring buffer cleared ({} samples discarded)", drained);
    }

    /// Current occupancy in samples
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True when no samples are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy as a percentage of capacity (0.0 - 100.0)
    pub fn fill_percent(&self) -> f32 {
        (self.len() as f32 / self.capacity as f32) * 100.0
    }
}

impl std::fmt::Debug for SampleRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("short_writes", &self.short_writes.load(Ordering::Relaxed))
            .field("short_reads", &self.short_reads.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let rb = SampleRingBuffer::new(16);
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(rb.write(&data), 8);
        assert_eq!(rb.len(), 8);

        let mut out = vec![0.0f32; 8];
        assert_eq!(rb.read(&mut out), 8);
        assert_eq!(out, data);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_short_write_when_full() {
        let rb = SampleRingBuffer::new(4);
        assert_eq!(rb.write(&[1.0, 2.0, 3.0, 4.0]), 4);

        // Full buffer: write returns 0 without blocking
        assert_eq!(rb.write(&[5.0]), 0);
        assert_eq!(rb.len(), 4);

        // Partial free space yields a partial write
        let mut out = vec![0.0f32; 2];
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(rb.write(&[5.0, 6.0, 7.0]), 2);
        assert_eq!(rb.len(), 4);
    }

    #[test]
    fn test_read_from_empty_returns_zero() {
        let rb = SampleRingBuffer::new(8);
        let mut out = vec![1.0f32; 4];
        assert_eq!(rb.read(&mut out), 0);
        // Output is untouched; the caller is responsible for silence-fill
        assert_eq!(out, vec![1.0f32; 4]);
    }

    #[test]
    fn test_zero_length_requests() {
        let rb = SampleRingBuffer::new(8);
        assert_eq!(rb.write(&[]), 0);
        let mut out: Vec<f32> = vec![];
        assert_eq!(rb.read(&mut out), 0);
    }

    #[test]
    fn test_wrap_around_preserves_data() {
        let rb = SampleRingBuffer::new(8);

        // Advance cursors near the end of the backing store
        assert_eq!(rb.write(&[0.0; 6]), 6);
        let mut scratch = vec![0.0f32; 6];
        assert_eq!(rb.read(&mut scratch), 6);

        // This write wraps across the boundary
        let data: Vec<f32> = (1..=7).map(|i| i as f32 / 10.0).collect();
        assert_eq!(rb.write(&data), 7);

        let mut out = vec![0.0f32; 7];
        assert_eq!(rb.read(&mut out), 7);
        assert_eq!(out, data);
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let rb = SampleRingBuffer::new(8);
        rb.write(&[1.0, 2.0, 3.0]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.fill_percent(), 0.0);

        // Buffer is reusable after clear
        assert_eq!(rb.write(&[4.0, 5.0]), 2);
        let mut out = vec![0.0f32; 2];
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(out, [4.0, 5.0]);
    }

    #[test]
    fn test_count_stays_within_bounds() {
        let rb = SampleRingBuffer::new(10);
        let chunk = [0.5f32; 7];
        let mut out = [0.0f32; 4];

        for _ in 0..50 {
            rb.write(&chunk);
            assert!(rb.len() <= rb.capacity());
            rb.read(&mut out);
            assert!(rb.len() <= rb.capacity());
        }
    }

    /// 10 seconds of stereo at 44.1kHz, written in 4096-sample chunks as
    /// fast as possible: occupancy plateaus at capacity and writes go short.
    #[test]
    fn test_fill_plateau_at_capacity() {
        let capacity = 441_000;
        let rb = SampleRingBuffer::new(capacity);
        let chunk = vec![0.25f32; 4096];

        let mut saw_short_write = false;
        for _ in 0..200 {
            let written = rb.write(&chunk);
            assert!(rb.len() <= capacity);
            if written < chunk.len() {
                saw_short_write = true;
            }
        }

        assert!(saw_short_write);
        assert_eq!(rb.len(), capacity);
        assert_eq!(rb.write(&chunk), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        use std::sync::Arc;

        let rb = Arc::new(SampleRingBuffer::new(1024));
        let writer = {
            let rb = Arc::clone(&rb);
            std::thread::spawn(move || {
                let mut next = 0u32;
                while next < 10_000 {
                    let chunk: Vec<f32> = (next..next + 64).map(|i| i as f32).collect();
                    let mut offset = 0;
                    while offset < chunk.len() {
                        let n = rb.write(&chunk[offset..]);
                        offset += n;
                        if n == 0 {
                            std::thread::yield_now();
                        }
                    }
                    next += 64;
                }
            })
        };

        let mut received: Vec<f32> = Vec::with_capacity(10_000);
        let mut out = vec![0.0f32; 128];
        while received.len() < 10_000 {
            let n = rb.read(&mut out);
            received.extend_from_slice(&out[..n]);
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();

        // FIFO order holds across the thread boundary
        for (i, sample) in received.iter().enumerate() {
            assert_eq!(*sample, i as f32);
        }
    }
}

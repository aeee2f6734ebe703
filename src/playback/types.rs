//! Shared playback types

use std::sync::atomic::{AtomicI64, Ordering};

/// Fixed stream parameters, set when the decode worker starts
///
/// Immutable once the stream is open. `declared_total_frames` comes from
/// upstream metadata and may be 0 (unknown) or wrong; the renderer adapter
/// inflates it with a safety margin and the watchdog decides real completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Declared track length in frames (0 = unknown)
    pub declared_total_frames: u64,

    /// Wire format tag of the decoder output
    pub format: &'static str,
}

impl StreamInfo {
    /// Declared duration in seconds (0.0 when unknown)
    pub fn declared_duration_secs(&self) -> f64 {
        self.declared_total_frames as f64 / self.sample_rate as f64
    }
}

/// Why the watchdog decided to advance to the next track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Decoder exited and the buffer drained
    EndOfStream,

    /// No playback progress past the declared duration for the grace period
    Stalled,

    /// The renderer consumed the entire inflated declared length
    MarginExhausted,
}

/// Pending seek request shared between the coordinator, the reader, and the
/// watchdog
///
/// At most one request is pending per stream; a new request supersedes the
/// old one. Stored as a frame index, -1 meaning none.
#[derive(Debug)]
pub struct PendingSeek {
    target: AtomicI64,
}

impl PendingSeek {
    pub fn new() -> Self {
        Self {
            target: AtomicI64::new(-1),
        }
    }

    /// Record a pending request, superseding any previous one
    pub fn set(&self, frame: u64) {
        self.target.store(frame as i64, Ordering::Release);
    }

    /// Clear the pending request
    pub fn clear(&self) {
        self.target.store(-1, Ordering::Release);
    }

    /// Frame index of the pending request, if any
    pub fn frame(&self) -> Option<u64> {
        let v = self.target.load(Ordering::Acquire);
        (v >= 0).then_some(v as u64)
    }

    pub fn is_pending(&self) -> bool {
        self.frame().is_some()
    }
}

impl Default for PendingSeek {
    fn default() -> Self {
        Self::new()
    }
}

//! End-of-stream watchdog
//!
//! The engine never trusts a single end-of-stream signal. Three imperfect
//! ones exist, each covering a different failure mode:
//!
//! 1. the reader's end-of-stream flag (decoder exited and buffer drained) -
//!    the normal case,
//! 2. a progress-stall timeout once playback has passed the declared
//!    duration - covers a decoder that hung without exiting,
//! 3. the renderer running out of its deliberately inflated declared
//!    length - the last-resort fallback when both others failed.
//!
//! The watchdog runs once per renderer tick, reconciles the three into a
//! single advance decision, and de-duplicates by stream token so the
//! decision fires exactly once per stream. A pending seek suppresses all
//! advance decisions: a stream mid-restart looks exactly like a dead one.

use crate::playback::types::AdvanceReason;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-tick snapshot of the signals the watchdog reconciles
#[derive(Debug, Clone, Copy)]
pub struct TickInputs {
    /// Token of the stream being observed
    pub stream_token: u64,

    /// Reader's logical playback position
    pub current_frame: u64,

    /// Reader-reported end of stream (latched)
    pub end_of_stream: bool,

    /// A seek is in flight
    pub pending_seek: bool,

    /// The renderer consumed its entire inflated declared length
    pub renderer_exhausted: bool,

    /// Declared (pre-inflation) track length in frames; 0 = unknown
    pub declared_frames: u64,

    /// Tick timestamp; injected for testability
    pub now: Instant,
}

/// Reconciles end-of-stream signals into at most one advance per stream
pub struct EofWatchdog {
    stall_timeout: Duration,

    /// Stream the progress tracker currently follows
    tracked_token: Option<u64>,

    /// Token whose advance decision already fired
    last_handled_token: Option<u64>,

    last_frame: u64,
    last_progress_at: Instant,
}

impl EofWatchdog {
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            stall_timeout,
            tracked_token: None,
            last_handled_token: None,
            last_frame: 0,
            last_progress_at: Instant::now(),
        }
    }

    /// Evaluate one tick; returns the advance decision at most once per
    /// stream token
    ///
    /// Rules in order, first match wins:
    /// 1. pending seek suppresses everything,
    /// 2. stalled past the declared duration,
    /// 3. reader end of stream,
    /// 4. renderer margin exhausted (should be unreachable; reaching it
    ///    means the other two signals failed).
    pub fn evaluate(&mut self, inputs: TickInputs) -> Option<AdvanceReason> {
        // New stream: restart progress tracking
        if self.tracked_token != Some(inputs.stream_token) {
            self.tracked_token = Some(inputs.stream_token);
            self.last_frame = inputs.current_frame;
            self.last_progress_at = inputs.now;
        } else if inputs.current_frame != self.last_frame {
            self.last_frame = inputs.current_frame;
            self.last_progress_at = inputs.now;
        }

        if self.last_handled_token == Some(inputs.stream_token) {
            return None;
        }

        if inputs.pending_seek {
            // A mid-seek stream must not be mistaken for an ended one
            self.last_progress_at = inputs.now;
            return None;
        }

        let past_declared =
            inputs.declared_frames > 0 && inputs.current_frame >= inputs.declared_frames;
        if past_declared
            && inputs.now.duration_since(self.last_progress_at) >= self.stall_timeout
        {
            warn!(
                "Stream {} stalled at frame {} past declared length for {:?}, advancing",
                inputs.stream_token, inputs.current_frame, self.stall_timeout
            );
            self.last_handled_token = Some(inputs.stream_token);
            return Some(AdvanceReason::Stalled);
        }

        if inputs.end_of_stream {
            info!("Stream {} end of stream, advancing", inputs.stream_token);
            self.last_handled_token = Some(inputs.stream_token);
            return Some(AdvanceReason::EndOfStream);
        }

        if inputs.renderer_exhausted {
            warn!(
                "Stream {} exhausted the renderer margin without an end-of-stream signal, advancing",
                inputs.stream_token
            );
            self.last_handled_token = Some(inputs.stream_token);
            return Some(AdvanceReason::MarginExhausted);
        }

        None
    }
}

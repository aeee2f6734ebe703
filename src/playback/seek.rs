//! Seek coordination for press-drag-release gestures
//!
//! Restarting the decoder subprocess is expensive; seeking on every slider
//! event during a drag would spawn dozens of subprocesses per second. The
//! coordinator runs a small state machine (Idle -> Dragging -> Committing ->
//! Idle) over an explicit reader handle:
//!
//! - pointer down enters Dragging and records a preview target only,
//! - drag events update the preview (UI-visible, never applied),
//! - pointer up commits: a repeat of the just-committed target inside the
//!   debounce window is dropped (a click delivers press and release as two
//!   events for the same frame), otherwise the reader seeks.
//!
//! While a commit is in flight the shared pending-seek state is set so the
//! watchdog and progress reporting know not to treat the stream as ended.

use crate::playback::stream_reader::StreamReader;
use crate::playback::types::PendingSeek;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Gesture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gesture {
    Idle,
    Dragging,
}

struct CoordinatorState {
    gesture: Gesture,

    /// Target shown in the UI while dragging; never applied directly
    preview_frame: Option<u64>,

    /// Last committed target and when, for the press+release double-fire
    /// debounce
    last_commit: Option<(u64, Instant)>,
}

/// Collapses rapid and duplicate seek requests into single decoder restarts
pub struct SeekCoordinator {
    reader: Arc<StreamReader>,
    pending: Arc<PendingSeek>,
    state: Mutex<CoordinatorState>,
    debounce: Duration,
}

impl SeekCoordinator {
    pub fn new(reader: Arc<StreamReader>, debounce: Duration) -> Self {
        let pending = reader.pending_seek();
        Self {
            reader,
            pending,
            state: Mutex::new(CoordinatorState {
                gesture: Gesture::Idle,
                preview_frame: None,
                last_commit: None,
            }),
            debounce,
        }
    }

    /// Pointer pressed on the progress control
    pub fn pointer_down(&self, frame: u64) {
        let mut state = self.state.lock().unwrap();
        state.gesture = Gesture::Dragging;
        state.preview_frame = Some(frame);
        debug!("Seek gesture started at frame {}", frame);
    }

    /// Pointer moved while dragging; updates the preview only
    pub fn drag(&self, frame: u64) {
        let mut state = self.state.lock().unwrap();
        if state.gesture == Gesture::Dragging {
            state.preview_frame = Some(frame);
        }
    }

    /// Pointer released: commit the seek unless debounced
    ///
    /// Returns true if a seek was issued and succeeded.
    pub fn pointer_up(&self, frame: u64) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            state.gesture = Gesture::Idle;
            state.preview_frame = None;

            let now = Instant::now();
            if let Some((last_frame, at)) = state.last_commit {
                if last_frame == frame && now.duration_since(at) < self.debounce {
                    debug!("Dropped duplicate seek to frame {} (debounce)", frame);
                    return false;
                }
            }
            state.last_commit = Some((frame, now));
        }

        // Pending state is visible to the watchdog for the whole restart
        self.pending.set(frame);
        let ok = self.reader.seek(frame);
        self.pending.clear();

        if ok {
            info!("Committed seek to frame {}", frame);
        }
        ok
    }

    /// Abandon the gesture and any pending request without seeking
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.gesture = Gesture::Idle;
        state.preview_frame = None;
        self.pending.clear();
        debug!("Seek gesture cancelled");
    }

    /// Preview target while a drag is in progress
    pub fn preview_frame(&self) -> Option<u64> {
        self.state.lock().unwrap().preview_frame
    }

    pub fn is_dragging(&self) -> bool {
        self.state.lock().unwrap().gesture == Gesture::Dragging
    }
}

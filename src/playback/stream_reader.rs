//! Stream reader façade presented to the renderer
//!
//! Wraps one decode worker and one ring buffer behind a stable
//! info/read/seek/dispose contract:
//!
//! - `read_frames` always returns exactly the requested frame count,
//!   zero-filling whatever the buffer cannot supply, so the renderer's
//!   "fully populated buffer" pull contract holds even under starvation.
//!   A starved stream produces a moment of silence, never a stall.
//! - `seek` is a hard resource handoff: the old worker is stopped (bounded
//!   join) before the new one spawns, so at most one decoder subprocess is
//!   ever alive per stream.
//! - `is_end_of_stream` latches: once the decoder has exited and the buffer
//!   has drained, the stream stays ended for the rest of its lifetime.

use crate::config::Config;
use crate::error::Result;
use crate::playback::decode_worker::DecodeWorker;
use crate::playback::types::{PendingSeek, StreamInfo};
use crate::stream::SampleRingBuffer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Source of unique stream tokens (watchdog de-duplication keys)
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Pull-based reader over one decoded PCM stream
pub struct StreamReader {
    config: Config,
    url: String,
    info: StreamInfo,

    /// Unique token identifying this stream to the watchdog
    token: u64,

    buffer: Arc<SampleRingBuffer>,

    /// Live worker; None after dispose or a failed seek respawn
    worker: Mutex<Option<DecodeWorker>>,

    /// Logical playback position in frames; advanced by every read, reset
    /// by seek. Frame-accurate only while the buffer kept up.
    current_frame: AtomicU64,

    /// Real (non-silence) frames delivered since open; used to recognize
    /// the spurious seek-to-0 right after construction
    frames_consumed: AtomicU64,

    /// End-of-stream latch
    eos_latched: AtomicBool,

    disposed: AtomicBool,

    /// Seek request in flight, shared with the coordinator and watchdog
    pending_seek: Arc<PendingSeek>,
}

impl StreamReader {
    /// Open a stream and start decoding from the beginning
    ///
    /// `declared_duration_secs` is the upstream metadata duration; 0.0 means
    /// unknown. Spawn failure is reported synchronously.
    pub fn open(config: Config, url: &str, declared_duration_secs: f64) -> Result<Arc<Self>> {
        let info = StreamInfo {
            sample_rate: config.sample_rate,
            channels: config.channels,
            declared_total_frames: (config.sample_rate as f64 * declared_duration_secs) as u64,
            format: "pcm_s16le",
        };

        let buffer = Arc::new(SampleRingBuffer::new(config.buffer_capacity_samples()));
        let worker = DecodeWorker::spawn(&config, url, 0.0, Arc::clone(&buffer))?;
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);

        info!(
            "Stream {} opened: {} ({} Hz, {} ch, declared {:.1}s)",
            token,
            url,
            info.sample_rate,
            info.channels,
            declared_duration_secs
        );

        Ok(Arc::new(Self {
            config,
            url: url.to_string(),
            info,
            token,
            buffer,
            worker: Mutex::new(Some(worker)),
            current_frame: AtomicU64::new(0),
            frames_consumed: AtomicU64::new(0),
            eos_latched: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            pending_seek: Arc::new(PendingSeek::new()),
        }))
    }

    /// Fixed stream parameters
    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Watchdog de-duplication token for this stream
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Fill `out` with exactly `frames` frames, silence-padded on underrun
    ///
    /// Never blocks and never fails; the position counter advances by the
    /// full request either way. Safe to call from the real-time thread:
    /// touches only the ring buffer and atomics.
    pub fn read_frames(&self, out: &mut [f32], frames: usize) -> usize {
        let channels = self.info.channels as usize;
        let frames = frames.min(out.len() / channels);
        let samples = frames * channels;

        if self.disposed.load(Ordering::Acquire) {
            out[..samples].fill(0.0);
            return frames;
        }

        let got = self.buffer.read(&mut out[..samples]);
        if got < samples {
            out[got..samples].fill(0.0);
        }

        self.current_frame.fetch_add(frames as u64, Ordering::Relaxed);
        self.frames_consumed
            .fetch_add((got / channels) as u64, Ordering::Relaxed);
        frames
    }

    /// Logical playback position in frames
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Relaxed)
    }

    /// True once the decoder has exited and the buffer has drained; latched
    pub fn is_end_of_stream(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return true;
        }
        if self.eos_latched.load(Ordering::Acquire) {
            return true;
        }

        let exited = {
            let worker = self.worker.lock().unwrap();
            worker.as_ref().map_or(true, |w| w.is_exited())
        };

        if exited && self.buffer.is_empty() {
            if !self.eos_latched.swap(true, Ordering::AcqRel) {
                info!("Stream {} reached end of stream", self.token);
            }
            true
        } else {
            false
        }
    }

    pub fn can_seek(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    /// Ring buffer occupancy as a percentage
    pub fn cache_progress_percent(&self) -> f64 {
        self.buffer.fill_percent() as f64
    }

    /// True once the decoder has produced everything it will produce
    pub fn is_cache_complete(&self) -> bool {
        let worker = self.worker.lock().unwrap();
        worker.as_ref().map_or(true, |w| w.is_exited())
    }

    pub fn has_pending_seek(&self) -> bool {
        self.pending_seek.is_pending()
    }

    pub fn pending_seek_frame(&self) -> Option<u64> {
        self.pending_seek.frame()
    }

    pub fn cancel_pending_seek(&self) {
        self.pending_seek.clear();
    }

    /// Shared pending-seek state handed to the coordinator
    pub(crate) fn pending_seek(&self) -> Arc<PendingSeek> {
        Arc::clone(&self.pending_seek)
    }

    /// Restart decoding at `target_frame`
    ///
    /// Tears down the current worker (bounded join, subprocess killed),
    /// clears the buffer, and starts a new worker at the offset. Returns
    /// false only if the replacement worker fails to start; the stream then
    /// reports end-of-stream once drained so the sequencer skips it.
    ///
    /// A seek to frame 0 before any audio has been consumed is the
    /// renderer's spurious position-0 callback, not a user action, and is
    /// ignored without restarting the decoder.
    pub fn seek(&self, target_frame: u64) -> bool {
        if self.disposed.load(Ordering::Acquire) || self.eos_latched.load(Ordering::Acquire) {
            return false;
        }

        if target_frame == 0
            && self.frames_consumed.load(Ordering::Relaxed) == 0
            && self.current_frame.load(Ordering::Relaxed) == 0
        {
            debug!("Stream {} ignoring position-0 seek at stream start", self.token);
            return true;
        }

        let start_secs = target_frame as f64 / self.info.sample_rate as f64;
        let mut slot = self.worker.lock().unwrap();

        // Old worker down before the new one starts: at most one subprocess
        // alive per stream, ever.
        if let Some(mut old) = slot.take() {
            old.stop();
        }
        self.buffer.clear();

        match DecodeWorker::spawn(&self.config, &self.url, start_secs, Arc::clone(&self.buffer)) {
            Ok(worker) => {
                *slot = Some(worker);
                self.current_frame.store(target_frame, Ordering::Relaxed);
                info!(
                    "Stream {} seeked to frame {} ({:.3}s)",
                    self.token, target_frame, start_secs
                );
                true
            }
            Err(e) => {
                warn!("Stream {} seek failed to restart decoder: {}", self.token, e);
                false
            }
        }
    }

    /// Stop decoding and release the buffer; idempotent
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut slot = self.worker.lock().unwrap();
        if let Some(mut worker) = slot.take() {
            worker.stop();
        }
        self.buffer.clear();
        self.pending_seek.clear();
        debug!("Stream {} disposed", self.token);
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.dispose();
    }
}

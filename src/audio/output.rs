//! Audio output adapter using cpal
//!
//! Bridges the pull-based renderer to a stream reader: the cpal data
//! callback asks the reader for exactly the frames the device wants, and
//! the reader's silence-fill contract guarantees the callback returns a
//! fully populated buffer without ever blocking.
//!
//! The adapter owns the active reader handle (there is no process-wide
//! "current reader"), keeps the declared-length inflation bookkeeping, and
//! drives the end-of-stream watchdog from `tick()`, delivering the advance
//! decision to the track sequencer over a channel.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::playback::stream_reader::StreamReader;
use crate::playback::types::AdvanceReason;
use crate::playback::watchdog::{EofWatchdog, TickInputs};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Frames delivered to the renderer, measured against the inflated length
///
/// The renderer is handed a deliberately oversized declared length because
/// upstream duration metadata is unreliable and the clip length cannot be
/// changed after creation. This counter decides when even that margin has
/// been fully consumed.
struct RendererProgress {
    frames_rendered: Arc<AtomicU64>,

    /// Declared + margin; 0 means unlimited (unknown duration, no margin)
    inflated_total_frames: u64,
}

impl RendererProgress {
    fn new(declared_frames: u64, margin_frames: u64) -> Self {
        Self {
            frames_rendered: Arc::new(AtomicU64::new(0)),
            inflated_total_frames: declared_frames.saturating_add(margin_frames),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.inflated_total_frames > 0
            && self.frames_rendered.load(Ordering::Relaxed) >= self.inflated_total_frames
    }
}

/// A position-0 report that is not the result of an explicit seek is the
/// renderer resetting a freshly created clip, not a user action
fn is_spurious_position_reset(target_frame: u64, current_frame: u64, has_pending_seek: bool) -> bool {
    target_frame == 0 && current_frame == 0 && !has_pending_seek
}

/// Renderer adapter for one active stream
pub struct AudioOutput {
    stream: Option<Stream>,
    reader: Arc<StreamReader>,
    progress: RendererProgress,
    watchdog: Mutex<EofWatchdog>,
    advance_tx: crossbeam_channel::Sender<AdvanceReason>,
}

impl AudioOutput {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the output device and bind the reader to its data callback
    pub fn new(
        reader: Arc<StreamReader>,
        config: &Config,
        device_name: Option<String>,
        advance_tx: crossbeam_channel::Sender<AdvanceReason>,
    ) -> Result<Self> {
        let device = Self::pick_device(device_name)?;
        let info = reader.info();

        let stream_config = StreamConfig {
            channels: info.channels,
            sample_rate: SampleRate(info.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let progress = RendererProgress::new(
            info.declared_total_frames,
            config.renderer_margin_frames(),
        );

        let callback_reader = Arc::clone(&reader);
        let frames_rendered = Arc::clone(&progress.frames_rendered);
        let channels = info.channels as usize;

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Real-time thread: read_frames fully populates the
                    // buffer (silence on underrun) without blocking
                    let frames = data.len() / channels;
                    callback_reader.read_frames(data, frames);
                    frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
                },
                |e| error!("Audio stream error: {}", e),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build output stream: {}", e)))?;

        info!(
            "Audio output opened: {} Hz, {} ch, inflated length {} frames",
            info.sample_rate, info.channels, progress.inflated_total_frames
        );

        Ok(Self {
            stream: Some(stream),
            reader,
            progress,
            watchdog: Mutex::new(EofWatchdog::new(config.stall_timeout())),
            advance_tx,
        })
    }

    fn pick_device(device_name: Option<String>) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(&name)) {
                info!("Using requested audio device: {}", name);
                return Ok(device);
            }
            warn!("Requested device '{}' not found, falling back to default", name);
        }

        host.default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
    }

    /// Begin pulling audio
    pub fn play(&self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e))),
            None => Err(Error::InvalidState("Audio output already closed".to_string())),
        }
    }

    /// The renderer declared a new playback position
    ///
    /// Position-0 resets that are not the result of an explicit seek are
    /// ignored; a freshly created clip reports position 0 on its own and a
    /// decoder restart for it would be pure waste.
    pub fn set_position(&self, seconds: f64) {
        let target_frame = (seconds * self.reader.info().sample_rate as f64) as u64;

        if is_spurious_position_reset(
            target_frame,
            self.reader.current_frame(),
            self.reader.has_pending_seek(),
        ) {
            debug!("Ignoring spurious position-0 reset from renderer");
            return;
        }

        self.reader.seek(target_frame);
    }

    /// Run one watchdog tick; sends the advance decision at most once
    pub fn tick(&self) -> Option<AdvanceReason> {
        let inputs = TickInputs {
            stream_token: self.reader.token(),
            current_frame: self.reader.current_frame(),
            end_of_stream: self.reader.is_end_of_stream(),
            pending_seek: self.reader.has_pending_seek(),
            renderer_exhausted: self.progress.is_exhausted(),
            declared_frames: self.reader.info().declared_total_frames,
            now: Instant::now(),
        };

        let decision = self.watchdog.lock().unwrap().evaluate(inputs);
        if let Some(reason) = decision {
            if self.advance_tx.try_send(reason).is_err() {
                warn!("Advance decision {:?} dropped: sequencer channel closed", reason);
            }
        }
        decision
    }

    /// Active stream handle
    pub fn reader(&self) -> &Arc<StreamReader> {
        &self.reader
    }

    /// Stop the device stream and dispose the reader
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.reader.dispose();
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

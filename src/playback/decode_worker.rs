//! Decode worker: one decoder subprocess plus one producer thread
//!
//! The worker spawns the external decoder (ffmpeg-style invocation: seek
//! offset, reconnect flags, request headers, raw s16le on stdout) and runs a
//! producer thread that converts the byte stream to normalized f32 samples
//! and feeds the shared ring buffer. A full buffer is handled by sleeping
//! and retrying the unwritten remainder; samples are never dropped.
//!
//! A side thread drains the subprocess's stderr for the child's lifetime so
//! the decoder can never block on its diagnostic pipe; only lines carrying
//! known fatal markers are surfaced to the log.
//!
//! Cancellation is cooperative (`should_stop`) except for the subprocess
//! itself, which is force-killed. Every producer exit path, including
//! panics, runs through a kill guard that terminates the child and raises
//! `process_exited`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stream::SampleRingBuffer;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Bytes read from the decoder's stdout per iteration
const READ_CHUNK_BYTES: usize = 8192;

/// Consecutive read failures tolerated before the stream is treated as ended
const MAX_READ_ERRORS: u32 = 3;

/// Decode worker owning one subprocess and one producer thread
///
/// One worker is live at a time per stream; seeking tears the worker down
/// and creates a new one bound to a new start offset.
pub struct DecodeWorker {
    /// Cooperative cancellation flag for the producer thread
    should_stop: Arc<AtomicBool>,

    /// Set on every producer exit path (natural EOS, error, or stop)
    process_exited: Arc<AtomicBool>,

    /// Frames produced so far, advanced only by the producer thread
    frames_produced: Arc<AtomicU64>,

    /// Subprocess handle, shared so stop() can kill a blocked producer free
    child: Arc<Mutex<Option<Child>>>,

    /// Producer thread handle
    producer: Option<JoinHandle<()>>,

    /// Bounded join timeout used by stop()
    stop_join_timeout: Duration,
}

impl DecodeWorker {
    /// Spawn the decoder at `start_secs` and start the producer thread
    ///
    /// Spawn failure is reported synchronously; nothing is left running.
    pub fn spawn(
        config: &Config,
        url: &str,
        start_secs: f64,
        buffer: Arc<SampleRingBuffer>,
    ) -> Result<Self> {
        let args = decoder_args(config, url, start_secs);
        debug!(
            "Spawning decoder: {} (start={:.3}s)",
            config.decoder_path, start_secs
        );

        let mut child = Command::new(&config.decoder_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", config.decoder_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("decoder stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("decoder stderr not captured".to_string()))?;

        // Drain stderr continuously so the child never blocks writing
        // diagnostics; only fatal markers reach the log.
        std::thread::Builder::new()
            .name("pcmflow-stderr".to_string())
            .spawn(move || drain_stderr(stderr))
            .map_err(|e| Error::Spawn(format!("stderr drain thread: {}", e)))?;

        let should_stop = Arc::new(AtomicBool::new(false));
        let process_exited = Arc::new(AtomicBool::new(false));
        let frames_produced = Arc::new(AtomicU64::new(0));
        let child = Arc::new(Mutex::new(Some(child)));

        let producer = {
            let should_stop = Arc::clone(&should_stop);
            let process_exited = Arc::clone(&process_exited);
            let frames_produced = Arc::clone(&frames_produced);
            let child = Arc::clone(&child);
            let channels = config.channels as u64;
            let backpressure_sleep = Duration::from_millis(config.backpressure_sleep_ms);

            std::thread::Builder::new()
                .name("pcmflow-producer".to_string())
                .spawn(move || {
                    // Kills the child and raises process_exited on every
                    // exit path, panics included.
                    let _guard = ExitGuard {
                        child: Arc::clone(&child),
                        process_exited: Arc::clone(&process_exited),
                    };

                    producer_loop(
                        stdout,
                        &buffer,
                        &should_stop,
                        &frames_produced,
                        channels,
                        backpressure_sleep,
                    );
                })
                .map_err(|e| Error::Spawn(format!("producer thread: {}", e)))?
        };

        info!("Decode worker started at offset {:.3}s", start_secs);

        Ok(Self {
            should_stop,
            process_exited,
            frames_produced,
            child,
            producer: Some(producer),
            stop_join_timeout: Duration::from_millis(config.stop_join_timeout_ms),
        })
    }

    /// True once the producer has exited for any reason
    pub fn is_exited(&self) -> bool {
        self.process_exited.load(Ordering::Acquire)
    }

    /// Frames produced so far (monotonic estimate)
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    /// Stop the worker: signal the thread, kill the subprocess, and join
    /// with a bounded timeout
    ///
    /// Killing the child unblocks a producer stuck in a pipe read. A
    /// producer that still fails to exit within the timeout is detached
    /// rather than joined indefinitely; the subprocess is dead either way.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        kill_child(&self.child);

        if let Some(handle) = self.producer.take() {
            let deadline = Instant::now() + self.stop_join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }

            if handle.is_finished() {
                let _ = handle.join();
                debug!("Decode worker stopped");
            } else {
                warn!(
                    "Producer thread did not exit within {:?}, detaching",
                    self.stop_join_timeout
                );
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Kill guard run on every producer exit path
struct ExitGuard {
    child: Arc<Mutex<Option<Child>>>,
    process_exited: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.process_exited.store(true, Ordering::Release);
        kill_child(&self.child);
    }
}

/// Force-terminate and reap the subprocess; safe to call more than once
fn kill_child(child: &Arc<Mutex<Option<Child>>>) {
    let mut slot = child.lock().unwrap();
    if let Some(mut child) = slot.take() {
        if let Err(e) = child.kill() {
            // Already-exited children report InvalidInput; nothing to do
            trace!("Decoder kill: {}", e);
        }
        let _ = child.wait();
    }
}

/// Producer loop: stdout bytes -> f32 samples -> ring buffer
fn producer_loop(
    mut stdout: impl Read,
    buffer: &SampleRingBuffer,
    should_stop: &AtomicBool,
    frames_produced: &AtomicU64,
    channels: u64,
    backpressure_sleep: Duration,
) {
    let mut byte_buf = [0u8; READ_CHUNK_BYTES];
    let mut sample_buf = [0f32; READ_CHUNK_BYTES / 2];
    // A chunk may end mid-sample; the odd byte carries into the next read
    let mut carry: Option<u8> = None;
    let mut read_errors: u32 = 0;

    while !should_stop.load(Ordering::Acquire) {
        let offset = if let Some(b) = carry.take() {
            byte_buf[0] = b;
            1
        } else {
            0
        };

        let n = match stdout.read(&mut byte_buf[offset..]) {
            Ok(0) => {
                debug!("Decoder stdout reached end of stream");
                break;
            }
            Ok(n) => {
                read_errors = 0;
                offset + n
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                read_errors += 1;
                if read_errors >= MAX_READ_ERRORS {
                    error!("Decoder read failed {} times, giving up: {}", read_errors, e);
                    break;
                }
                warn!("Decoder read error (attempt {}): {}", read_errors, e);
                continue;
            }
        };

        let samples = n / 2;
        if n % 2 == 1 {
            carry = Some(byte_buf[n - 1]);
        }
        if samples == 0 {
            continue;
        }

        for i in 0..samples {
            let raw = i16::from_le_bytes([byte_buf[i * 2], byte_buf[i * 2 + 1]]);
            sample_buf[i] = raw as f32 / 32768.0;
        }

        // Backpressure: retry the unwritten remainder instead of dropping
        let mut written = 0;
        while written < samples && !should_stop.load(Ordering::Acquire) {
            let w = buffer.write(&sample_buf[written..samples]);
            written += w;
            if written < samples {
                std::thread::sleep(backpressure_sleep);
            }
        }

        frames_produced.fetch_add(written as u64 / channels, Ordering::Relaxed);
    }
}

/// Surface only fatal decoder diagnostics, discarding the rest
fn drain_stderr(stderr: impl Read) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if line.contains("403") || line.contains("Error") || line.contains("error") {
                    warn!("[decoder] {}", line);
                }
            }
            Err(_) => break,
        }
    }
}

/// Build the decoder invocation for a stream starting at `start_secs`
fn decoder_args(config: &Config, url: &str, start_secs: f64) -> Vec<String> {
    let mut args = Vec::new();

    let mut headers = String::new();
    if !config.referer.is_empty() {
        headers.push_str(&format!("Referer: {}\r\n", config.referer));
    }
    if !config.user_agent.is_empty() {
        headers.push_str(&format!("User-Agent: {}\r\n", config.user_agent));
    }
    if !headers.is_empty() {
        args.push("-headers".to_string());
        args.push(headers);
    }

    args.push("-ss".to_string());
    args.push(format!("{:.3}", start_secs));

    if config.reconnect {
        args.push("-reconnect".to_string());
        args.push("1".to_string());
        args.push("-reconnect_streamed".to_string());
        args.push("1".to_string());
        args.push("-reconnect_delay_max".to_string());
        args.push(config.reconnect_delay_max_secs.to_string());
    }

    args.push("-i".to_string());
    args.push(url.to_string());
    args.push("-f".to_string());
    args.push("s16le".to_string());
    args.push("-ac".to_string());
    args.push(config.channels.to_string());
    args.push("-ar".to_string());
    args.push(config.sample_rate.to_string());
    args.push("-loglevel".to_string());
    args.push("warning".to_string());
    args.push("pipe:1".to_string());

    args
}

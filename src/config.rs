//! Engine configuration
//!
//! All tunables for the streaming engine: the decoder subprocess invocation,
//! ring buffer sizing, and the seek/watchdog timing windows. Loadable from a
//! TOML file; `Default` provides the reference constants.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Streaming engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decoder subprocess binary (resolved via PATH when not absolute)
    pub decoder_path: String,

    /// Referer header passed to the decoder for network sources
    pub referer: String,

    /// User-Agent header passed to the decoder for network sources
    pub user_agent: String,

    /// Ask the decoder to reconnect on network errors
    pub reconnect: bool,

    /// Maximum reconnect backoff in seconds
    pub reconnect_delay_max_secs: u32,

    /// Output sample rate fixed for the whole stream (Hz)
    pub sample_rate: u32,

    /// Output channel count (interleaved)
    pub channels: u16,

    /// Ring buffer capacity in seconds of audio
    pub buffer_secs: f32,

    /// Producer retry interval when the ring buffer is full (ms)
    pub backpressure_sleep_ms: u64,

    /// Bounded join timeout when stopping a producer thread (ms)
    pub stop_join_timeout_ms: u64,

    /// Grace period with no playback progress before a stream past its
    /// declared duration is treated as ended (secs)
    pub stall_timeout_secs: f32,

    /// Window in which a repeated seek to the same frame is dropped (ms)
    pub seek_debounce_ms: u64,

    /// Extra length declared to the renderer beyond the upstream duration,
    /// consumed only when both EOS signals fail (secs; 0 disables inflation)
    pub renderer_margin_secs: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decoder_path: "ffmpeg".to_string(),
            referer: String::new(),
            user_agent: "pcmflow/0.1".to_string(),
            reconnect: true,
            reconnect_delay_max_secs: 5,
            sample_rate: 44_100,
            channels: 2,
            buffer_secs: 10.0,
            backpressure_sleep_ms: 10,
            stop_join_timeout_ms: 200,
            stall_timeout_secs: 10.0,
            seek_debounce_ms: 100,
            renderer_margin_secs: 1800.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Ring buffer capacity in interleaved samples
    pub fn buffer_capacity_samples(&self) -> usize {
        (self.sample_rate as f32 * self.channels as f32 * self.buffer_secs) as usize
    }

    /// Stall grace period as a Duration
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.stall_timeout_secs)
    }

    /// Seek debounce window as a Duration
    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }

    /// Renderer margin converted to frames
    pub fn renderer_margin_frames(&self) -> u64 {
        (self.sample_rate as f64 * self.renderer_margin_secs as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reference_constants() {
        let config = Config::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        // 10 seconds of stereo at 44.1kHz
        assert_eq!(config.buffer_capacity_samples(), 882_000);
        assert_eq!(config.stall_timeout(), Duration::from_secs(10));
        assert_eq!(config.seek_debounce(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_partial_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcmflow.toml");
        std::fs::write(
            &path,
            "decoder_path = \"/opt/ffmpeg/bin/ffmpeg\"\nbuffer_secs = 5.0\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.decoder_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.buffer_capacity_samples(), 441_000);
        // Untouched fields keep defaults
        assert_eq!(config.sample_rate, 44_100);
        assert!(config.reconnect);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "decoder_path = [not valid").unwrap();
        assert!(Config::load(&path).is_err());
    }
}

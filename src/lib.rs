//! pcmflow - streaming PCM delivery engine
//!
//! Feeds a pull-based audio renderer from a remote compressed stream by
//! driving an external decoder subprocess. Each stream gets a bounded ring
//! buffer of interleaved f32 samples, a decode worker that owns the
//! subprocess and applies backpressure, and a reader facade whose
//! `read_frames` call is safe on a real-time audio thread: it always
//! fills the requested frames, padding with silence when the network is
//! behind.
//!
//! Seeks restart the decoder at the target offset; the watchdog decides
//! when a stream is truly finished (decoder end-of-stream, stall past the
//! declared duration, or exhaustion of the inflated renderer length).

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod stream;

pub use audio::AudioOutput;
pub use config::Config;
pub use error::{Error, Result};
pub use playback::{AdvanceReason, EofWatchdog, SeekCoordinator, StreamInfo, StreamReader, TickInputs};
pub use stream::SampleRingBuffer;

#[cfg(test)]
pub mod test_support {
    //! Helpers shared by the unit tests: fake decoder scripts stand in for
    //! the real external decoder so pipeline behavior is deterministic.

    use std::io::Write;
    use std::time::{Duration, Instant};

    /// Write an executable shell script acting as the decoder binary.
    ///
    /// Returns the holding directory (kept alive by the caller) and the
    /// script path to use as `decoder_path`.
    pub fn fake_decoder(body: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-decoder.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        (dir, path.to_string_lossy().into_owned())
    }

    /// Poll `condition` until it holds or `timeout` elapses
    pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }
}

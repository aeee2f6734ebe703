//! End-to-end pipeline tests
//!
//! Drive the full decode-worker / ring-buffer / stream-reader stack with
//! fake decoder scripts instead of the real external decoder, so the tests
//! are deterministic and need no network or media files.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pcmflow::{Config, StreamReader};

fn fake_decoder(body: &str) -> (tempfile::TempDir, String) {
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

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_finite_stream_delivers_every_sample_then_ends() {
    // 88,200 bytes of 0xFF = 44,100 samples of i16 -1, audibly non-zero,
    // so delivered samples are distinguishable from silence padding
    let (_dir, script) = fake_decoder("head -c 88200 /dev/zero | tr '\\0' '\\377'");
    let config = Config {
        decoder_path: script,
        ..Config::default()
    };
    let reader = StreamReader::open(config, "test://finite", 0.0).unwrap();

    let expected_sample = -1.0 / 32768.0;
    let mut delivered = 0usize;
    let mut out = vec![0.0f32; 512 * 2];

    let deadline = Instant::now() + Duration::from_secs(10);
    while !reader.is_end_of_stream() {
        assert!(Instant::now() < deadline, "stream never reached EOS");
        let frames = reader.read_frames(&mut out, 512);
        assert_eq!(frames, 512, "read_frames must always fill the request");
        delivered += out.iter().filter(|s| **s != 0.0).count();
        for sample in &out {
            assert!(
                *sample == 0.0 || (*sample - expected_sample).abs() < 1e-9,
                "unexpected sample value {}",
                sample
            );
        }
    }

    assert_eq!(delivered, 44_100);
    // EOS is latched: further reads stay silent and the flag holds
    reader.read_frames(&mut out, 512);
    assert!(out.iter().all(|s| *s == 0.0));
    assert!(reader.is_end_of_stream());
}

#[test]
fn test_position_advances_through_underruns() {
    // Decoder produces nothing and hangs; the reader still honors every
    // read with silence and keeps the playback position moving
    let (_dir, script) = fake_decoder("exec sleep 60");
    let config = Config {
        decoder_path: script,
        ..Config::default()
    };
    let reader = StreamReader::open(config, "test://stalled", 0.0).unwrap();

    let mut out = vec![0.0f32; 256 * 2];
    for _ in 0..4 {
        assert_eq!(reader.read_frames(&mut out, 256), 256);
        assert!(out.iter().all(|s| *s == 0.0));
    }
    assert_eq!(reader.current_frame(), 1024);
    assert!(!reader.is_end_of_stream());
}

#[test]
fn test_rapid_seeks_leave_single_working_decoder() {
    let (dir, script) = fake_decoder("echo run >> \"$(dirname \"$0\")/spawns\"; exec sleep 60");
    let config = Config {
        decoder_path: script,
        ..Config::default()
    };
    let reader = StreamReader::open(config, "test://seeky", 300.0).unwrap();
    let marker = dir.path().join("spawns");
    assert!(wait_until(Duration::from_secs(2), || marker.exists()));

    assert!(reader.seek(44_100));
    assert!(reader.seek(88_200));
    assert!(reader.seek(132_300));

    // Initial spawn plus one per seek, each previous decoder stopped first
    let spawns = || {
        std::fs::read_to_string(&marker)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    };
    assert!(wait_until(Duration::from_secs(2), || spawns() == 4));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(spawns(), 4, "a seek must not leave extra decoders running");

    // Reader is still serviceable after the churn
    let mut out = vec![0.0f32; 128 * 2];
    assert_eq!(reader.read_frames(&mut out, 128), 128);
    assert!(!reader.is_end_of_stream());
    assert_eq!(reader.current_frame(), 132_300 + 128);
}

#[test]
fn test_dispose_tears_down_decoder() {
    let (_dir, script) = fake_decoder("exec sleep 60");
    let config = Config {
        decoder_path: script,
        ..Config::default()
    };
    let reader = StreamReader::open(config, "test://dispose", 0.0).unwrap();

    reader.dispose();
    assert!(reader.is_end_of_stream());

    // Disposed readers keep the silence contract for any renderer still
    // holding the handle
    let mut out = vec![1.0f32; 64 * 2];
    assert_eq!(reader.read_frames(&mut out, 64), 64);
    assert!(out.iter().all(|s| *s == 0.0));
}

#[test]
fn test_seek_restarts_at_requested_offset() {
    // The script records its arguments, proving the restart carries the
    // target timestamp to the decoder
    let (dir, script) =
        fake_decoder("echo \"$@\" >> \"$(dirname \"$0\")/args\"; exec sleep 60");
    let config = Config {
        decoder_path: script,
        // Header values embed CRLFs and would break the line-per-invocation
        // args file
        user_agent: String::new(),
        ..Config::default()
    };
    let reader = StreamReader::open(config, "test://offsets", 600.0).unwrap();
    let args_path = dir.path().join("args");
    assert!(wait_until(Duration::from_secs(2), || args_path.exists()));

    // 10 seconds at 44.1kHz
    assert!(reader.seek(441_000));
    assert!(wait_until(Duration::from_secs(2), || {
        std::fs::read_to_string(&args_path)
            .map(|s| s.lines().count() == 2)
            .unwrap_or(false)
    }));

    let recorded = std::fs::read_to_string(&args_path).unwrap();
    let restart = recorded.lines().nth(1).unwrap();
    assert!(
        restart.contains("-ss 10.000"),
        "restart args missing offset: {}",
        restart
    );
    assert_eq!(reader.current_frame(), 441_000);
}

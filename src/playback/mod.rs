//! Streaming playback pipeline
//!
//! One decode worker feeds one ring buffer which one stream reader drains.
//! Seeks tear down and respawn the worker; the watchdog decides when the
//! stream is finished.

pub mod decode_worker;
pub mod seek;
pub mod stream_reader;
pub mod types;
pub mod watchdog;

pub use decode_worker::DecodeWorker;
pub use seek::SeekCoordinator;
pub use stream_reader::StreamReader;
pub use types::{AdvanceReason, StreamInfo};
pub use watchdog::{EofWatchdog, TickInputs};

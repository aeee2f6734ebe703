//! Audio rendering

pub mod output;

pub use output::AudioOutput;

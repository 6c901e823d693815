//! Measurement of external media assets.

pub mod probe;

pub use probe::{probe_durations, DurationProbe, FfprobeDurationProbe};

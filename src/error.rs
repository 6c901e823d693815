//! Error types for the video assembly pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// A single failed duration probe, identified by its position in the input
/// batch so callers can tell exactly which assets were unusable.
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    /// Position of the asset in the probe batch.
    pub index: usize,
    /// Path of the asset that failed to probe.
    pub path: PathBuf,
    /// Why the probe failed (tool crash, missing file, unparseable output).
    pub reason: String,
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({}): {}", self.index, self.path.display(), self.reason)
    }
}

/// Errors produced by the assembly pipeline.
///
/// The pipeline never retries and never terminates the process; every failure
/// is surfaced here, after scoped resources (temp files, the encoder progress
/// channel) have been released.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An input precondition failed before any expensive work started:
    /// zero audio segments, a non-positive total duration, a malformed
    /// timing sidecar, or a missing input file.
    #[error("input validation error: {0}")]
    InputValidation(String),

    /// One or more duration probes failed. Raised only after every probe in
    /// the batch has settled; successful siblings are discarded since a
    /// partial duration set cannot produce a correct timeline.
    #[error("duration probe failed for {} asset(s): {}", failures.len(), format_failures(failures))]
    Probe { failures: Vec<ProbeFailure> },

    /// Overlapping or out-of-order overlay events, or the narration running
    /// past the available background duration. Always fatal to the render
    /// attempt, never silently clamped or truncated.
    #[error("timeline inconsistency: {0}")]
    Timeline(String),

    /// The external encoder exited non-zero, its progress stream was
    /// malformed, or the caller's progress callback panicked.
    #[error("encode failure: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[ProbeFailure]) -> String {
    failures
        .iter()
        .map(ProbeFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_lists_every_failed_index() {
        let err = PipelineError::Probe {
            failures: vec![
                ProbeFailure {
                    index: 3,
                    path: PathBuf::from("mp3/3.mp3"),
                    reason: "corrupt header".to_string(),
                },
                ProbeFailure {
                    index: 7,
                    path: PathBuf::from("mp3/7.mp3"),
                    reason: "ffprobe exited with code 1".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 asset(s)"));
        assert!(msg.contains("#3 (mp3/3.mp3)"));
        assert!(msg.contains("#7 (mp3/7.mp3)"));
    }
}

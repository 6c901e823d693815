//! Concurrent duration probing of audio and video assets via ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use tokio::process::Command;

use crate::config::DEFAULT_PROBE_CONCURRENCY;
use crate::error::{PipelineError, ProbeFailure, Result};

/// Measures the playback duration of a single media asset.
///
/// The production implementation shells out to ffprobe; tests substitute a
/// deterministic mock.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_of(&self, path: &Path) -> anyhow::Result<f64>;
}

/// Probes durations with `ffprobe -show_entries format=duration`.
pub struct FfprobeDurationProbe;

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration_of(&self, path: &Path) -> anyhow::Result<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to execute ffprobe")?;

        if !output.status.success() {
            bail!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = stdout
            .trim()
            .parse::<f64>()
            .with_context(|| format!("failed to parse ffprobe duration: {:?}", stdout.trim()))?;
        debug!("probed {} -> {:.3}s", path.display(), duration);
        Ok(duration)
    }
}

/// Probe the durations of `paths`, preserving input order in the output
/// regardless of completion order.
///
/// At most `min(paths.len(), max_concurrent)` probes run at once, so a large
/// batch cannot exhaust process slots against the external tool. Every probe
/// is allowed to settle; if any failed, a single aggregate error identifying
/// all failed positions is raised and the sibling successes are discarded.
pub async fn probe_durations<P>(
    probe: &P,
    paths: &[PathBuf],
    max_concurrent: usize,
) -> Result<Vec<f64>>
where
    P: DurationProbe + ?Sized,
{
    if paths.is_empty() {
        // An empty batch is the caller's precondition to report, not ours.
        return Ok(Vec::new());
    }

    let workers = paths
        .len()
        .min(if max_concurrent == 0 { DEFAULT_PROBE_CONCURRENCY } else { max_concurrent });
    info!(
        "probing {} asset(s) with {} concurrent worker(s)",
        paths.len(),
        workers
    );

    // `buffered` keeps output in input order while running up to `workers`
    // probes concurrently.
    let results: Vec<std::result::Result<f64, ProbeFailure>> =
        stream::iter(paths.iter().enumerate())
            .map(|(index, path)| async move {
                probe.duration_of(path).await.map_err(|e| ProbeFailure {
                    index,
                    path: path.clone(),
                    reason: format!("{e:#}"),
                })
            })
            .buffered(workers)
            .collect()
            .await;

    let mut durations = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(duration) => durations.push(duration),
            Err(failure) => failures.push(failure),
        }
    }

    if failures.is_empty() {
        Ok(durations)
    } else {
        Err(PipelineError::Probe { failures })
    }
}

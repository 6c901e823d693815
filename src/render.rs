//! Render orchestration: drives the external ffmpeg encode and reports
//! fractional progress through a side-channel file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

use crate::config::EncodeParams;
use crate::error::{PipelineError, Result};

/// How often the progress side-channel file is polled.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Render lifecycle. `Encoding` is entered only after every input has
/// validated; `Failed` is reachable from `Encoding` on a non-zero encoder
/// exit, malformed progress data, or a panicking progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Encoding,
    Completed,
    Failed,
}

/// Optional background music mixed under the narration track.
#[derive(Debug, Clone)]
pub struct BackgroundAudio {
    pub path: PathBuf,
    /// Mix volume (0.0 - 1.0); a volume of zero skips the mix entirely.
    pub volume: f64,
}

/// Everything the encoder needs for one output file.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub background_video: PathBuf,
    /// The concatenated narration track.
    pub narration_audio: PathBuf,
    pub background_audio: Option<BackgroundAudio>,
    /// Ordered drawtext filters from the overlay generator; may be empty.
    pub overlay_filters: Vec<String>,
    pub width: u32,
    pub height: u32,
    /// Total target duration in seconds; progress is mapped against this and
    /// the output is bounded to it.
    pub total_duration: f64,
    pub output: PathBuf,
}

/// Drives one encode invocation through its state machine.
pub struct RenderOrchestrator {
    encode: EncodeParams,
    state: RenderState,
}

impl RenderOrchestrator {
    pub fn new(encode: EncodeParams) -> Self {
        Self {
            encode,
            state: RenderState::Idle,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Run the encode, invoking `on_progress` with fractions in `[0, 1]`
    /// while it runs.
    ///
    /// The progress side-channel file is a scoped acquisition: it is removed
    /// on every exit path, including encoder failure. The observer task
    /// terminates only after the encode it is monitoring.
    pub async fn render<F>(&mut self, plan: &RenderPlan, on_progress: F) -> Result<()>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        // Inputs must validate before `Encoding` is entered; the callback is
        // never invoked when the total duration is unknown.
        validate_plan(plan)?;
        self.state = RenderState::Encoding;
        info!(
            "encoding {} ({:.1}s at {}x{})",
            plan.output.display(),
            plan.total_duration,
            plan.width,
            plan.height
        );

        let result = run_encode(plan, &self.encode, on_progress).await;
        self.state = match &result {
            Ok(()) => RenderState::Completed,
            Err(e) => {
                error!("encode failed: {e}");
                RenderState::Failed
            }
        };
        result
    }
}

fn validate_plan(plan: &RenderPlan) -> Result<()> {
    if !plan.total_duration.is_finite() || plan.total_duration <= 0.0 {
        return Err(PipelineError::InputValidation(format!(
            "total target duration must be known and positive before progress \
             mapping, got {}",
            plan.total_duration
        )));
    }
    for (path, description) in [
        (&plan.background_video, "background video"),
        (&plan.narration_audio, "narration audio"),
    ] {
        if !path.exists() {
            return Err(PipelineError::InputValidation(format!(
                "{description} not found: {}",
                path.display()
            )));
        }
    }
    if let Some(background_audio) = &plan.background_audio {
        if !background_audio.path.exists() {
            return Err(PipelineError::InputValidation(format!(
                "background audio not found: {}",
                background_audio.path.display()
            )));
        }
    }
    Ok(())
}

async fn run_encode<F>(plan: &RenderPlan, encode: &EncodeParams, on_progress: F) -> Result<()>
where
    F: Fn(f32) + Send + Sync + 'static,
{
    // TempPath removes the side-channel file when dropped, on every exit
    // path; leaking it would exhaust temp storage across repeated runs.
    let progress_path: TempPath = NamedTempFile::new()?.into_temp_path();
    let args = build_render_args(plan, encode, &progress_path);
    debug!("ffmpeg {}", args.join(" "));

    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain stderr concurrently so a chatty encoder can't block on the pipe.
    let mut stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buffer = String::new();
        if let Some(stream) = stderr.as_mut() {
            let _ = stream.read_to_string(&mut buffer).await;
        }
        buffer
    });

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let observer_path = progress_path.to_path_buf();
    let total = plan.total_duration;
    let on_progress = Arc::new(on_progress);
    let callback = Arc::clone(&on_progress);
    let observer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let content = tokio::fs::read_to_string(&observer_path)
                        .await
                        .unwrap_or_default();
                    if let Some(elapsed) = latest_progress_seconds(&content)? {
                        let fraction = (elapsed / total).clamp(0.0, 1.0) as f32;
                        callback(fraction);
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
        Ok::<(), PipelineError>(())
    });

    let wait_result = child.wait().await;
    let _ = stop_tx.send(true);
    let observer_result = observer.await;
    let stderr_output = stderr_task.await.unwrap_or_default();
    drop(progress_path); // progress channel released before any error propagates
    let status = wait_result?;

    match observer_result {
        Ok(Ok(())) => {}
        // Malformed progress data noticed mid-encode.
        Ok(Err(e)) => return Err(e),
        // A panicking callback is a failed render, never silently swallowed.
        Err(join_error) => {
            return Err(PipelineError::Encode(format!(
                "progress observer failed: {join_error}"
            )))
        }
    }

    if !status.success() {
        let tail = stderr_tail(&stderr_output, 12);
        return Err(PipelineError::Encode(format!(
            "ffmpeg exited with {status}: {tail}"
        )));
    }

    report_completion(on_progress.as_ref())?;
    Ok(())
}

/// Deliver the terminal progress tick. A panicking callback is contained
/// here and reported as a failed render, matching how mid-encode panics
/// surface through the observer task.
fn report_completion<F>(on_progress: &F) -> Result<()>
where
    F: Fn(f32),
{
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_progress(1.0))).map_err(|_| {
        PipelineError::Encode("progress callback panicked on completion".to_string())
    })
}

/// Build the full ffmpeg argument list for a plan. Encoding parameters are
/// forwarded unmodified.
pub fn build_render_args(
    plan: &RenderPlan,
    encode: &EncodeParams,
    progress_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-progress".into(),
        progress_path.display().to_string(),
        "-i".into(),
        plan.background_video.display().to_string(),
        "-i".into(),
        plan.narration_audio.display().to_string(),
    ];
    if let Some(background_audio) = &plan.background_audio {
        args.push("-i".into());
        args.push(background_audio.path.display().to_string());
    }

    // Video chain: crop the background to the target aspect, scale, then
    // apply the caption filters in schedule order.
    let mut video_chain = format!(
        "[0:v]crop=ih*({w}/{h}):ih,scale={w}:{h}",
        w = plan.width,
        h = plan.height
    );
    for filter in &plan.overlay_filters {
        video_chain.push(',');
        video_chain.push_str(filter);
    }
    video_chain.push_str("[vout]");

    let mut filters = vec![video_chain];
    let audio_map = match &plan.background_audio {
        Some(background_audio) => {
            filters.push(format!("[2:a]volume={}[bg]", background_audio.volume));
            filters.push("[1:a][bg]amix=inputs=2:duration=first[aout]".to_string());
            "[aout]".to_string()
        }
        None => "1:a".to_string(),
    };

    args.extend([
        "-filter_complex".into(),
        filters.join(";"),
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        audio_map,
        "-t".into(),
        format!("{:.3}", plan.total_duration),
    ]);
    args.extend(encode.to_args());
    args.push("-f".into());
    args.push("mp4".into());
    args.push(plan.output.display().to_string());
    args
}

/// Concatenate the per-segment audio assets into one narration track using
/// the ffmpeg concat demuxer.
pub async fn concat_audio(inputs: &[PathBuf], output: &Path, audio_bitrate: &str) -> Result<()> {
    if inputs.is_empty() {
        return Err(PipelineError::InputValidation(
            "no audio segments to concatenate".to_string(),
        ));
    }

    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut list = NamedTempFile::new_in(dir)?;
    for input in inputs {
        let absolute = std::fs::canonicalize(input)?;
        writeln!(list, "file '{}'", absolute.display())?;
    }
    list.flush()?;

    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(list.path())
        .args(["-b:a", audio_bitrate])
        .arg(output)
        .stdin(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        return Err(PipelineError::Encode(format!(
            "ffmpeg audio concat exited with {status}"
        )));
    }
    debug!("narration track written to {}", output.display());
    Ok(())
}

/// Parse the latest elapsed encode time out of the progress side-channel
/// content.
///
/// ffmpeg writes repeated key/value blocks; `out_time_ms` carries elapsed
/// microseconds. `N/A` markers (emitted before the first frame) are skipped;
/// any other unparseable value is malformed progress data and fails the
/// render rather than reporting a bogus fraction.
fn latest_progress_seconds(content: &str) -> Result<Option<f64>> {
    let mut latest = None;
    for line in content.lines() {
        if let Some(value) = line.trim().strip_prefix("out_time_ms=") {
            let value = value.trim();
            if value == "N/A" {
                continue;
            }
            let micros: i64 = value.parse().map_err(|_| {
                PipelineError::Encode(format!("malformed progress marker: {line:?}"))
            })?;
            latest = Some(micros as f64 / 1_000_000.0);
        }
    }
    Ok(latest)
}

fn stderr_tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().collect();
    let start = all.len().saturating_sub(lines);
    if all.is_empty() {
        warn!("ffmpeg produced no stderr output");
    }
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn plan_with_duration(total_duration: f64) -> RenderPlan {
        RenderPlan {
            background_video: PathBuf::from("/nonexistent/background.mp4"),
            narration_audio: PathBuf::from("/nonexistent/narration.mp3"),
            background_audio: None,
            overlay_filters: Vec::new(),
            width: 1080,
            height: 1920,
            total_duration,
            output: PathBuf::from("/nonexistent/out.mp4"),
        }
    }

    #[test]
    fn latest_marker_wins() {
        let content = "frame=10\nout_time_ms=1500000\nprogress=continue\n\
                       frame=20\nout_time_ms=3000000\nprogress=continue\n";
        assert_eq!(latest_progress_seconds(content).unwrap(), Some(3.0));
    }

    #[test]
    fn not_available_markers_are_skipped() {
        let content = "out_time_ms=N/A\nprogress=continue\n";
        assert_eq!(latest_progress_seconds(content).unwrap(), None);
        let mixed = "out_time_ms=N/A\nout_time_ms=500000\n";
        assert_eq!(latest_progress_seconds(mixed).unwrap(), Some(0.5));
    }

    #[test]
    fn malformed_marker_is_an_encode_error() {
        let content = "out_time_ms=garbage\n";
        assert!(matches!(
            latest_progress_seconds(content),
            Err(PipelineError::Encode(_))
        ));
    }

    #[test]
    fn empty_channel_has_no_progress_yet() {
        assert_eq!(latest_progress_seconds("").unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_total_duration_fails_fast_without_progress() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut orchestrator = RenderOrchestrator::new(EncodeParams::default());
        assert_eq!(orchestrator.state(), RenderState::Idle);

        let invoked = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&invoked);
        let result = orchestrator
            .render(&plan_with_duration(f64::NAN), move |_| {
                seen.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(PipelineError::InputValidation(_))));
        // Validation failed before the encode; the state machine never left
        // idle and the callback was never fed an undefined value.
        assert_eq!(orchestrator.state(), RenderState::Idle);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_total_duration_is_rejected() {
        let mut orchestrator = RenderOrchestrator::new(EncodeParams::default());
        let result = orchestrator.render(&plan_with_duration(0.0), |_| {}).await;
        assert!(matches!(result, Err(PipelineError::InputValidation(_))));
    }

    #[test]
    fn render_args_forward_the_encode_bundle() {
        let plan = plan_with_duration(42.0);
        let encode = EncodeParams {
            video_codec: "h264_nvenc".to_string(),
            video_bitrate: "20M".to_string(),
            audio_bitrate: "192k".to_string(),
            threads: 8,
        };
        let args = build_render_args(&plan, &encode, Path::new("/tmp/progress.txt"));

        let joined = args.join(" ");
        assert!(joined.contains("-progress /tmp/progress.txt"));
        assert!(joined.contains("-c:v h264_nvenc"));
        assert!(joined.contains("-b:v 20M"));
        assert!(joined.contains("-threads 8"));
        assert!(joined.contains("-t 42.000"));
        assert!(joined.contains("crop=ih*(1080/1920):ih,scale=1080:1920"));
        assert_eq!(args.last().unwrap(), "/nonexistent/out.mp4");
    }

    #[test]
    fn background_audio_adds_an_amix_stage() {
        let mut plan = plan_with_duration(10.0);
        plan.background_audio = Some(BackgroundAudio {
            path: PathBuf::from("/music/lofi.mp3"),
            volume: 0.15,
        });
        let args = build_render_args(&plan, &EncodeParams::default(), Path::new("/tmp/p"));
        let joined = args.join(" ");
        assert!(joined.contains("[2:a]volume=0.15[bg]"));
        assert!(joined.contains("amix=inputs=2:duration=first"));
        assert!(joined.contains("-map [aout]"));
    }

    #[test]
    fn no_background_audio_maps_the_narration_directly() {
        let plan = plan_with_duration(10.0);
        let args = build_render_args(&plan, &EncodeParams::default(), Path::new("/tmp/p"));
        let joined = args.join(" ");
        assert!(!joined.contains("amix"));
        assert!(joined.contains("-map 1:a"));
    }

    #[test]
    fn overlay_filters_join_the_video_chain_in_order() {
        let mut plan = plan_with_duration(10.0);
        plan.overlay_filters = vec![
            "drawtext=text='one'".to_string(),
            "drawtext=text='one two'".to_string(),
        ];
        let args = build_render_args(&plan, &EncodeParams::default(), Path::new("/tmp/p"));
        let filter_complex = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        let first = filter_complex.find("drawtext=text='one'").unwrap();
        let second = filter_complex.find("drawtext=text='one two'").unwrap();
        assert!(first < second);
        assert!(filter_complex.contains("[vout]"));
    }

    #[test]
    fn panicking_completion_callback_is_an_encode_error() {
        let result = report_completion(&|_: f32| panic!("caller bug"));
        match result {
            // The error reaches render(), whose state match then records the
            // run as failed instead of letting the panic unwind further.
            Err(PipelineError::Encode(message)) => {
                assert!(message.contains("panicked"));
            }
            other => panic!("expected Encode error, got {other:?}"),
        }
    }

    #[test]
    fn well_behaved_completion_callback_sees_the_full_fraction() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        report_completion(&move |fraction| sink.lock().unwrap().push(fraction)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn concat_rejects_an_empty_batch() {
        let result = concat_audio(&[], Path::new("/tmp/out.mp3"), "192k").await;
        assert!(matches!(result, Err(PipelineError::InputValidation(_))));
    }
}

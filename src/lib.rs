//! storyreel — assembly of narrated short-form videos.
//!
//! The pipeline takes a sequence of synthesized audio segments and a looping
//! background video and produces one rendered clip: durations are probed
//! concurrently, word-level timings are estimated and persisted as JSON
//! sidecars, a global timeline is composed, caption overlays are compiled
//! into timed drawtext filters, and an external ffmpeg encode is driven with
//! fractional progress reporting.
//!
//! [`VideoAssembler`] is the facade over the stages; each stage is also
//! usable on its own through its module.

pub mod config;
pub mod error;
pub mod media;
pub mod overlay;
pub mod render;
pub mod segment;
pub mod timeline;
pub mod timing;

use std::path::PathBuf;

use log::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::media::{probe_durations, DurationProbe, FfprobeDurationProbe};
use crate::render::{BackgroundAudio, RenderOrchestrator, RenderPlan};
use crate::segment::AudioSegment;
use crate::timing::{sidecar_path, save_word_timings, EqualSplitTiming, TimingSource, WordTiming};

pub use crate::config::{CaptionStyle, EncodeParams};
pub use crate::error::ProbeFailure;
pub use crate::render::RenderState;
pub use crate::segment::SegmentRole;

/// Inputs for one assembly run.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    /// Narration segments in playback order.
    pub segments: Vec<AudioSegment>,
    /// Looping background footage; must be at least as long as the narration.
    pub background_video: PathBuf,
    /// Optional music mixed under the narration.
    pub background_audio: Option<BackgroundAudio>,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// The assembly pipeline facade.
///
/// Holds the duration probe and the timing source behind trait objects so a
/// synthesis provider's native timestamps, or a deterministic test double,
/// can replace the defaults without touching the pipeline.
pub struct VideoAssembler {
    config: PipelineConfig,
    probe: Box<dyn DurationProbe>,
    timing: Box<dyn TimingSource>,
}

impl VideoAssembler {
    /// Assembler with the shipped defaults: ffprobe durations and equal-split
    /// word timing.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_sources(config, Box::new(FfprobeDurationProbe), Box::new(EqualSplitTiming))
    }

    pub fn with_sources(
        config: PipelineConfig,
        probe: Box<dyn DurationProbe>,
        timing: Box<dyn TimingSource>,
    ) -> Self {
        Self {
            config,
            probe,
            timing,
        }
    }

    /// Run the full pipeline and return the output path.
    ///
    /// `on_progress` receives encode fractions in `[0, 1]`. Validation
    /// failures surface before any encoding starts and before the callback is
    /// ever invoked.
    pub async fn assemble<F>(&self, request: &AssemblyRequest, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        validate_request(request)?;

        let audio_paths: Vec<PathBuf> =
            request.segments.iter().map(|s| s.path.clone()).collect();
        let durations = probe_durations(
            self.probe.as_ref(),
            &audio_paths,
            self.config.probe_concurrency,
        )
        .await?;

        let mut segments = request.segments.clone();
        for (segment, duration) in segments.iter_mut().zip(&durations) {
            segment.set_duration(*duration);
        }

        let background_duration = self
            .probe
            .duration_of(&request.background_video)
            .await
            .map_err(|e| {
                PipelineError::InputValidation(format!(
                    "background video {} is unusable: {e:#}",
                    request.background_video.display()
                ))
            })?;

        let timings = if self.config.captions_enabled {
            Some(self.estimate_and_persist_timings(&segments, &durations).await?)
        } else {
            None
        };

        let timeline = timeline::compose(
            &durations,
            timings.as_deref(),
            background_duration,
            self.config.inter_segment_gap,
        )?;

        let overlay_filters = overlay::drawtext_filters(
            &timeline.overlay_events,
            request.width,
            request.height,
            &self.config.caption_style,
        );

        // Intermediate assets live in a scoped working directory that is
        // removed when the run ends, success or failure.
        let workdir = tempfile::tempdir()?;
        let narration = workdir.path().join("narration.mp3");
        render::concat_audio(&audio_paths, &narration, &self.config.encode.audio_bitrate).await?;

        let background_audio = request
            .background_audio
            .clone()
            .filter(|audio| audio.volume > 0.0);

        let plan = RenderPlan {
            background_video: request.background_video.clone(),
            narration_audio: narration,
            background_audio,
            overlay_filters,
            width: request.width,
            height: request.height,
            total_duration: timeline.total_duration,
            output: request.output.clone(),
        };
        let mut orchestrator = RenderOrchestrator::new(self.config.encode.clone());
        orchestrator.render(&plan, on_progress).await?;

        info!(
            "assembled {} ({} segment(s), {:.3}s)",
            request.output.display(),
            segments.len(),
            timeline.total_duration
        );
        Ok(request.output.clone())
    }

    /// Estimate word timings for every segment and persist each sequence as
    /// a sidecar next to its audio asset.
    async fn estimate_and_persist_timings(
        &self,
        segments: &[AudioSegment],
        durations: &[f64],
    ) -> Result<Vec<Vec<WordTiming>>> {
        let mut all = Vec::with_capacity(segments.len());
        for (segment, duration) in segments.iter().zip(durations) {
            let timings = self.timing.word_timings(&segment.text, *duration).await?;
            save_word_timings(&timings, &sidecar_path(&segment.path))?;
            all.push(timings);
        }
        info!("wrote {} timing sidecar(s)", all.len());
        Ok(all)
    }
}

fn validate_request(request: &AssemblyRequest) -> Result<()> {
    if request.segments.is_empty() {
        return Err(PipelineError::InputValidation(
            "no audio segments to assemble".to_string(),
        ));
    }
    if request.width == 0 || request.height == 0 {
        return Err(PipelineError::InputValidation(format!(
            "target resolution must be non-zero, got {}x{}",
            request.width, request.height
        )));
    }
    for segment in &request.segments {
        if !segment.path.exists() {
            return Err(PipelineError::InputValidation(format!(
                "segment audio not found: {}",
                segment.path.display()
            )));
        }
    }
    if !request.background_video.exists() {
        return Err(PipelineError::InputValidation(format!(
            "background video not found: {}",
            request.background_video.display()
        )));
    }
    Ok(())
}
